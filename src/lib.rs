/*!
# JARVIS

A small browser-based knowledge-sharing chat application, built in Rust.

## Overview

Users sign up and log in against an embedded SQLite credential store; every
page except login and signup sits behind a session gate. Once in, the home
page is a chat interface: each submitted message is appended to an
in-process transcript and answered by a hosted chat-completion service,
with the reply streamed into the page fragment by fragment.

## Architecture

The application is a single axum server:

### Session gate
- Every protected request is intercepted before its handler runs
- Authentication state lives per browser session (cookie id mapped to
  server-side state), never globally
- The originally requested path is remembered across the login redirect
  and returned to after a successful login

### Credential store
- SQLite file via rusqlite, `user_creds` table
- All queries bind user input as parameters
- Passwords stored as Argon2 hashes only

### Chat
- Per-user in-process transcript with user/assistant roles
- OpenAI-compatible streaming completion client (reqwest + SSE)
- Fragments relayed to the browser as Server-Sent Events in arrival order

## Modules

- **app**: Routing, shared state and the server loop
- **login**: User authentication, sessions and the auth gate
- **db**: SQLite credential store
- **chat**: Message log, chat pages and the streaming relay
- **llm**: Hosted chat-completion client
- **sse**: Incremental text/event-stream parser
- **config**: Environment-driven configuration

## Endpoints

- `GET /login`, `POST /login` - Login page and credential check
- `GET /signup`, `POST /signup` - Signup page and registration
- `GET /logout` - Drop the session
- `GET /` - Chat home page (protected)
- `GET /account` - Account page (protected)
- `GET /api/history` - The caller's transcript (protected)
- `POST /api/chat` - Submit a message, stream the reply (protected)
*/

// Re-export all modules so they appear in the documentation
pub mod app;
pub mod chat;
pub mod config;
pub mod db;
pub mod llm;
pub mod login;
pub mod sse;

/// Re-export everything from these modules to make it easier to use
pub use chat::*;
pub use config::*;
pub use db::*;
pub use llm::*;
pub use login::*;
pub use sse::*;
