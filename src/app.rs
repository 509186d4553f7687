use axum::{
    Router,
    middleware,
    routing::{get, post},
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::chat::{self, ChatLog};
use crate::config::Config;
use crate::db::Database;
use crate::llm::ChatClient;
use crate::login;

/// Shared application state
pub struct AppState {
    /// Credential store
    pub db: Database,

    /// Per-user chat transcripts
    pub chat_log: ChatLog,

    /// Hosted chat-completion client; `None` when no API key is configured
    pub llm: Option<ChatClient>,
}

/// Build the application router
///
/// The chat pages and APIs sit behind the auth gate; the login and
/// signup pages (and static assets) stay reachable for everyone, so the
/// redirect target of the gate is never itself gated.
pub fn router(state: Arc<AppState>) -> Router {
    let protected = Router::new()
        .route("/", get(chat::serve_chat_page))
        .route("/account", get(chat::serve_account_page))
        .route("/api/history", get(chat::get_history))
        .route("/api/chat", post(chat::post_message))
        .route_layer(middleware::from_fn(login::require_auth));

    Router::new()
        .merge(protected)
        .route("/login", get(login::serve_login_page).post(login::handle_login))
        .route("/signup", get(login::serve_signup_page).post(login::handle_signup))
        .route("/logout", get(login::handle_logout))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}

/// Start the web application
///
/// Opens the credential store, builds the router and serves it on the
/// configured address until the process is stopped.
///
/// # Arguments
/// * `config` - Runtime configuration (address, database, chat service)
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.database_path)?;
    log::info!(
        "credential store '{}' ready ({} users)",
        config.database_path,
        db.user_count()?
    );

    let llm = config
        .api_key
        .as_deref()
        .map(|key| ChatClient::new(&config.api_base, key, &config.model));
    if llm.is_none() {
        log::warn!("JARVIS_API_KEY not set; chat requests will be rejected");
    }

    let state = Arc::new(AppState {
        db,
        chat_log: ChatLog::new(),
        llm,
    });

    let app = router(state);

    let listener = TcpListener::bind(&config.addr).await?;
    log::info!("Listening on http://{}", config.addr);
    axum::serve(listener, app).await?;

    Ok(())
}
