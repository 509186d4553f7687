use anyhow::{Result, anyhow};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

use crate::sse::EventStreamParser;

static SHARED_HTTP: LazyLock<Client> = LazyLock::new(|| {
    Client::builder()
        .timeout(Duration::from_secs(120))
        .pool_max_idle_per_host(2)
        .build()
        .expect("failed to build HTTP client")
});

/// One turn of the conversation, as sent to the hosted service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user" or "assistant"
    pub role: String,

    /// Message text
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// A fragment of the streamed reply
#[derive(Debug, Clone, PartialEq)]
pub enum StreamChunk {
    /// Text delta, forwarded in arrival order
    Text(String),

    /// End of the reply
    Done,
}

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text delta from one SSE data payload, if it carries any
fn delta_text(data: &str) -> Option<String> {
    let resp: StreamResponse = serde_json::from_str(data).ok()?;
    let choice = resp.choices.first()?;
    choice.delta.content.clone().filter(|c| !c.is_empty())
}

/// Whether this SSE data payload ends the reply
fn delta_finished(data: &str) -> bool {
    if data == "[DONE]" {
        return true;
    }
    serde_json::from_str::<StreamResponse>(data)
        .map(|resp| {
            resp.choices
                .first()
                .is_some_and(|c| c.finish_reason.is_some())
        })
        .unwrap_or(false)
}

/// Client for an OpenAI-compatible chat-completion endpoint
///
/// The service is treated as an opaque streaming text source: one POST,
/// one SSE response, text deltas relayed to the caller through a channel.
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    /// Create a client for the configured service
    ///
    /// # Arguments
    /// * `base_url` - Service origin, e.g. "https://api.openai.com"
    /// * `api_key` - Bearer token
    /// * `model` - Model identifier sent with each request
    pub fn new(base_url: &str, api_key: &str, model: &str) -> Self {
        Self {
            http: SHARED_HTTP.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: model.to_string(),
        }
    }

    /// Stream one completion for the given conversation
    ///
    /// Text fragments are sent through `tx` in arrival order, followed by
    /// `StreamChunk::Done`. Send failures are ignored (the receiver hung up).
    ///
    /// # Errors
    /// * Returns an error on connection failure, a non-success status
    ///   (with a truncated body for context), or a mid-stream read error
    pub async fn generate_stream(
        &self,
        messages: Vec<ChatMessage>,
        tx: UnboundedSender<StreamChunk>,
    ) -> Result<()> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let req = CompletionRequest {
            model: self.model.clone(),
            messages,
            stream: true,
        };

        let resp = self
            .http
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&req)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            let detail: String = body.chars().take(800).collect();
            if detail.trim().is_empty() {
                return Err(anyhow!("chat service error: {}", status));
            }
            return Err(anyhow!("chat service error: {}\n{}", status, detail));
        }

        let mut parser = EventStreamParser::new();
        let mut stream = resp.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| anyhow!("stream read error: {}", e))?;
            for event in parser.feed(&bytes) {
                if let Some(text) = delta_text(&event.data) {
                    let _ = tx.send(StreamChunk::Text(text));
                }
                if delta_finished(&event.data) {
                    let _ = tx.send(StreamChunk::Done);
                    return Ok(());
                }
            }
        }

        let _ = tx.send(StreamChunk::Done);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_text_extracts_content() {
        let data = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(delta_text(data), Some("Hel".to_string()));
    }

    #[test]
    fn test_delta_text_empty_content() {
        let data = r#"{"choices":[{"delta":{"content":""}}]}"#;
        assert_eq!(delta_text(data), None);

        let data = r#"{"choices":[{"delta":{}}]}"#;
        assert_eq!(delta_text(data), None);
    }

    #[test]
    fn test_delta_finished_on_done_sentinel() {
        assert!(delta_finished("[DONE]"));
        assert!(!delta_finished(r#"{"choices":[{"delta":{"content":"x"}}]}"#));
    }

    #[test]
    fn test_delta_finished_on_finish_reason() {
        let data = r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert!(delta_finished(data));
    }

    #[test]
    fn test_garbage_payload_is_ignored() {
        assert_eq!(delta_text("not json"), None);
        assert!(!delta_finished("not json"));
    }

    #[test]
    fn test_request_serializes_roles() {
        let req = CompletionRequest {
            model: "test-model".to_string(),
            messages: vec![
                ChatMessage::new("system", "be brief"),
                ChatMessage::new("user", "hi"),
            ],
            stream: true,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["model"], "test-model");
        assert_eq!(json["stream"], true);
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client = ChatClient::new("https://api.example.com/", "k", "m");
        assert_eq!(client.base_url, "https://api.example.com");
    }
}
