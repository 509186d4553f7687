use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{
        Html,
        sse::{Event, Sse},
    },
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::app::AppState;
use crate::llm::{ChatMessage, StreamChunk};
use crate::login::CurrentUser;

/// System prompt sent ahead of every conversation
const SYSTEM_PROMPT: &str =
    "You are JARVIS, a helpful knowledge-sharing assistant. Answer concisely.";

/// Who authored a message in the transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// The role string used by the chat-completion API
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One entry of a user's transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    /// Who wrote it (drives the bubble styling in the page)
    pub role: Role,

    /// Message text
    pub content: String,

    /// When the message was appended
    pub sent_at: DateTime<Utc>,
}

/// Body of a `POST /api/chat` request
#[derive(Debug, Deserialize)]
pub struct SendMessage {
    /// The user's message text
    pub content: String,
}

/// In-process message log, one transcript per user
///
/// Keyed by `user_uid` so a transcript survives re-login within one
/// server process. Messages are only ever appended; order is arrival
/// order.
#[derive(Default)]
pub struct ChatLog {
    messages: Mutex<HashMap<String, Vec<StoredMessage>>>,
}

impl ChatLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one message to a user's transcript
    pub fn append(&self, user_uid: &str, role: Role, content: &str) {
        let mut messages = self.messages.lock().unwrap();
        messages
            .entry(user_uid.to_string())
            .or_default()
            .push(StoredMessage {
                role,
                content: content.to_string(),
                sent_at: Utc::now(),
            });
    }

    /// Copy of a user's transcript, in arrival order
    pub fn history(&self, user_uid: &str) -> Vec<StoredMessage> {
        let messages = self.messages.lock().unwrap();
        messages.get(user_uid).cloned().unwrap_or_default()
    }
}

/// Convert a transcript into the wire conversation, system prompt first
fn wire_messages(history: &[StoredMessage]) -> Vec<ChatMessage> {
    let mut out = Vec::with_capacity(history.len() + 1);
    out.push(ChatMessage::new("system", SYSTEM_PROMPT));
    for message in history {
        out.push(ChatMessage::new(message.role.as_str(), &message.content));
    }
    out
}

/// Inject the current user into an embedded page template
///
/// The page script reads `CURRENT_USER` to render the greeting.
fn render_page(template: &'static str, user: &CurrentUser) -> Html<String> {
    let payload = serde_json::json!({
        "username": user.username,
        "user_uid": user.user_uid,
    });
    Html(template.replace(
        "</head>",
        &format!("    <script>const CURRENT_USER = {};</script>\n</head>", payload),
    ))
}

/// Serve the chat home page
pub async fn serve_chat_page(Extension(user): Extension<CurrentUser>) -> Html<String> {
    render_page(include_str!("./static/chat.html"), &user)
}

/// Serve the account page
pub async fn serve_account_page(Extension(user): Extension<CurrentUser>) -> Html<String> {
    render_page(include_str!("./static/account.html"), &user)
}

/// Return the caller's transcript
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
) -> Json<Vec<StoredMessage>> {
    Json(state.chat_log.history(&user.user_uid))
}

/// Handle a submitted chat message
///
/// Appends the user's message to the transcript, asks the hosted service
/// for a completion over the whole conversation, and relays the reply to
/// the browser as Server-Sent Events: one `{"delta": ...}` payload per
/// arriving fragment, an `error` event on provider failure, and a final
/// `[DONE]`. Whatever assistant text arrived (even partial) is appended
/// to the transcript when the stream ends.
///
/// # Arguments
/// * `state` - Shared application state
/// * `user` - Authenticated caller (attached by the auth gate)
/// * `message` - The submitted message
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Extension(user): Extension<CurrentUser>,
    Json(message): Json<SendMessage>,
) -> Result<Sse<UnboundedReceiverStream<Result<Event, Infallible>>>, (StatusCode, String)> {
    let content = message.content.trim().to_string();
    if content.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Message is empty".to_string()));
    }

    let Some(llm) = state.llm.clone() else {
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            "Chat service is not configured".to_string(),
        ));
    };

    state.chat_log.append(&user.user_uid, Role::User, &content);
    let conversation = wire_messages(&state.chat_log.history(&user.user_uid));

    let (sse_tx, sse_rx) = mpsc::unbounded_channel::<Result<Event, Infallible>>();
    let user_uid = user.user_uid.clone();

    tokio::spawn(async move {
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<StreamChunk>();
        let producer =
            tokio::spawn(async move { llm.generate_stream(conversation, chunk_tx).await });

        let mut reply = String::new();
        while let Some(chunk) = chunk_rx.recv().await {
            match chunk {
                StreamChunk::Text(text) => {
                    reply.push_str(&text);
                    let payload = serde_json::json!({ "delta": text });
                    // A failed send means the browser went away; keep
                    // draining so the reply still lands in the transcript.
                    let _ = sse_tx.send(Ok(Event::default().data(payload.to_string())));
                }
                StreamChunk::Done => break,
            }
        }

        match producer.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                log::error!("chat completion failed: {e}");
                let _ = sse_tx.send(Ok(Event::default()
                    .event("error")
                    .data("The chat service is unavailable right now")));
            }
            Err(e) => log::error!("chat task panicked: {e}"),
        }

        if !reply.is_empty() {
            state.chat_log.append(&user_uid, Role::Assistant, &reply);
        }
        let _ = sse_tx.send(Ok(Event::default().data("[DONE]")));
    });

    Ok(Sse::new(UnboundedReceiverStream::new(sse_rx)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_arrival_order() {
        let log = ChatLog::new();
        log.append("uid-1", Role::User, "first");
        log.append("uid-1", Role::Assistant, "second");
        log.append("uid-1", Role::User, "third");

        let history = log.history("uid-1");
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].content, "first");
        assert_eq!(history[1].content, "second");
        assert_eq!(history[2].content, "third");
        assert!(history[0].sent_at <= history[2].sent_at);
    }

    #[test]
    fn test_roles_are_distinct() {
        let log = ChatLog::new();
        log.append("uid-1", Role::User, "hi");
        log.append("uid-1", Role::Assistant, "hello");

        let history = log.history("uid-1");
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[1].role, Role::Assistant);
    }

    #[test]
    fn test_transcripts_are_per_user() {
        let log = ChatLog::new();
        log.append("uid-1", Role::User, "mine");
        log.append("uid-2", Role::User, "yours");

        assert_eq!(log.history("uid-1").len(), 1);
        assert_eq!(log.history("uid-2").len(), 1);
        assert!(log.history("uid-3").is_empty());
    }

    #[test]
    fn test_wire_messages_start_with_system_prompt() {
        let log = ChatLog::new();
        log.append("uid-1", Role::User, "question");
        log.append("uid-1", Role::Assistant, "answer");

        let wire = wire_messages(&log.history("uid-1"));
        assert_eq!(wire.len(), 3);
        assert_eq!(wire[0].role, "system");
        assert_eq!(wire[1].role, "user");
        assert_eq!(wire[1].content, "question");
        assert_eq!(wire[2].role, "assistant");
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[test]
    fn test_render_page_injects_user() {
        let user = CurrentUser {
            username: "ada".to_string(),
            user_uid: "uid-1".to_string(),
        };
        let Html(page) = render_page("<html><head></head><body></body></html>", &user);
        assert!(page.contains("CURRENT_USER"));
        assert!(page.contains("\"ada\""));
    }
}
