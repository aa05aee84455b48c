//! Upstream conversational backends
//!
//! Two backends are supported:
//! - [`KeyedClient`]: credential-authenticated, OpenAI-compatible chat completions
//! - [`SessionClient`]: a shared, pre-authenticated web session speaking the
//!   conversation protocol
//!
//! Both expose the same contract: [`ChatBackend::send_message`] returns an
//! ordered stream of progress events terminated by exactly one completion
//! (or an error), and honours a cooperative cancellation token.

mod history;
mod keyed;
mod session;

pub use history::{MessageHistory, Role, StoredMessage};
pub use keyed::KeyedClient;
pub use session::SessionClient;

use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::turn::ProxyReturn;

/// Which kind of backend a client talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Keyed,
    Session,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Keyed => "keyed",
            BackendKind::Session => "session",
        }
    }
}

/// Per-call options passed to a backend
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Model to use; the backend's own default applies when absent
    pub model: Option<String>,
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
    /// Fired when the caller goes away
    pub cancel: CancellationToken,
}

/// Message shape produced by the keyed backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyedMessage {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
}

/// Message shape produced by the session backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMessage {
    pub message_id: String,
    pub response: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub parent_message_id: Option<String>,
}

/// A partial or final backend message in either backend's shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BackendMessage {
    Keyed(KeyedMessage),
    Session(SessionMessage),
}

impl BackendMessage {
    pub fn id(&self) -> &str {
        match self {
            BackendMessage::Keyed(m) => &m.id,
            BackendMessage::Session(m) => &m.message_id,
        }
    }

    pub fn text(&self) -> &str {
        match self {
            BackendMessage::Keyed(m) => &m.text,
            BackendMessage::Session(m) => &m.response,
        }
    }

    pub fn conversation_id(&self) -> Option<&str> {
        match self {
            BackendMessage::Keyed(m) => m.conversation_id.as_deref(),
            BackendMessage::Session(m) => m.conversation_id.as_deref(),
        }
    }

    pub fn parent_message_id(&self) -> Option<&str> {
        match self {
            BackendMessage::Keyed(m) => m.parent_message_id.as_deref(),
            BackendMessage::Session(m) => m.parent_message_id.as_deref(),
        }
    }

    /// Map either shape onto the canonical `{id, conversationId, text}` record.
    ///
    /// `fallback_conversation` fills in the conversation id when the backend
    /// did not report one.
    pub fn normalize(&self, fallback_conversation: Option<&str>) -> ProxyReturn {
        ProxyReturn {
            id: Some(self.id().to_string()),
            conversation_id: self
                .conversation_id()
                .or(fallback_conversation)
                .map(str::to_string),
            text: self.text().to_string(),
        }
    }
}

/// One item of a backend's event stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// Accumulated text so far
    Progress(BackendMessage),
    /// The final message; always the last event of a successful call
    Completed(BackendMessage),
}

/// Error reported by a backend call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct BackendError {
    /// HTTP status from the upstream; `None` for transport-level failures
    pub status_code: Option<u16>,
    /// Upstream status detail (carries markers such as `model_cap_exceeded`)
    pub status_text: String,
    pub message: String,
}

impl BackendError {
    pub fn http(status_code: u16, status_text: impl Into<String>) -> Self {
        let status_text = status_text.into();
        Self {
            status_code: Some(status_code),
            message: format!("Upstream returned {status_code}: {status_text}"),
            status_text,
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status_code: None,
            status_text: String::new(),
            message: message.into(),
        }
    }

    /// Build an error from a non-success upstream response, consuming its body
    pub async fn from_response(response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let status_text = status_text_from_body(&body).unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("Unknown error")
                .to_string()
        });
        Self::http(status.as_u16(), status_text)
    }

    pub fn from_reqwest(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::transport(format!("Request timed out: {e}"))
        } else if e.is_connect() {
            Self::transport(format!("Failed to connect to upstream: {e}"))
        } else {
            Self::transport(format!("Request failed: {e}"))
        }
    }
}

/// Extract a human-meaningful status detail from an upstream error body.
///
/// Understands `{"detail": ...}` (session protocol) and
/// `{"error": {"message": ...}}` (chat completions); structured details are
/// kept as compact JSON so markers like `clears_in` survive.
pub(crate) fn status_text_from_body(body: &str) -> Option<String> {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return None;
    }

    let Ok(json) = serde_json::from_str::<Value>(trimmed) else {
        return Some(trimmed.to_string());
    };

    if let Some(detail) = json.get("detail") {
        return Some(match detail {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        });
    }

    if let Some(error) = json.get("error") {
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            let code = error.get("code").and_then(Value::as_str);
            return Some(match code {
                Some(code) if !message.contains(code) => format!("{code}: {message}"),
                _ => message.to_string(),
            });
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }

    Some(trimmed.to_string())
}

/// Ordered stream of backend events
pub type BackendStream = BoxStream<'static, Result<BackendEvent, BackendError>>;

/// Contract shared by every upstream backend
pub trait ChatBackend: Send + Sync {
    /// Send `message` upstream, returning progress events followed by one
    /// completion. Dropping the stream or firing `options.cancel` abandons
    /// the in-flight request.
    fn send_message(&self, message: &str, options: SendOptions) -> BackendStream;

    fn kind(&self) -> BackendKind;
}

/// Run `producer` on its own task, exposing what it sends as a [`BackendStream`].
///
/// The producer is dropped as soon as `cancel` fires, which aborts any
/// pending upstream request and ends the stream.
pub(crate) fn spawn_backend_stream<F, Fut>(cancel: CancellationToken, producer: F) -> BackendStream
where
    F: FnOnce(mpsc::Sender<Result<BackendEvent, BackendError>>) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(32);
    let run = producer(tx);

    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("Backend request cancelled by caller");
            }
            _ = run => {}
        }
    });

    ReceiverStream::new(rx).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keyed_message() {
        let message = BackendMessage::Keyed(KeyedMessage {
            id: "1".into(),
            text: "ab".into(),
            conversation_id: None,
            parent_message_id: Some("0".into()),
        });

        let record = message.normalize(Some("c1"));
        assert_eq!(record, ProxyReturn::new(Some("1".into()), Some("c1".into()), "ab"));
    }

    #[test]
    fn test_normalize_session_message_prefers_backend_conversation() {
        let message = BackendMessage::Session(SessionMessage {
            message_id: "m9".into(),
            response: "hello".into(),
            conversation_id: Some("from-backend".into()),
            parent_message_id: None,
        });

        let record = message.normalize(Some("from-caller"));
        assert_eq!(record.id.as_deref(), Some("m9"));
        assert_eq!(record.conversation_id.as_deref(), Some("from-backend"));
        assert_eq!(record.text, "hello");
    }

    #[test]
    fn test_backend_message_deserializes_either_shape() {
        let keyed: BackendMessage = serde_json::from_str(r#"{"id":"1","text":"a"}"#).unwrap();
        assert!(matches!(keyed, BackendMessage::Keyed(_)));

        let session: BackendMessage =
            serde_json::from_str(r#"{"messageId":"2","response":"b"}"#).unwrap();
        assert!(matches!(session, BackendMessage::Session(_)));
        assert_eq!(session.text(), "b");
    }

    #[test]
    fn test_status_text_from_detail_object_keeps_markers() {
        let body = r#"{"detail":{"code":"model_cap_exceeded","clears_in":120}}"#;
        let text = status_text_from_body(body).unwrap();
        assert!(text.contains("model_cap_exceeded"));
        assert!(text.contains("clears_in"));
        assert!(text.contains("120"));
    }

    #[test]
    fn test_status_text_from_detail_string() {
        let body = r#"{"detail":"Conversation not found"}"#;
        assert_eq!(
            status_text_from_body(body).as_deref(),
            Some("Conversation not found")
        );
    }

    #[test]
    fn test_status_text_from_openai_error() {
        let body = r#"{"error":{"message":"Rate limit reached","code":"rate_limit_exceeded"}}"#;
        assert_eq!(
            status_text_from_body(body).as_deref(),
            Some("rate_limit_exceeded: Rate limit reached")
        );
    }

    #[test]
    fn test_status_text_from_plain_and_empty_bodies() {
        assert_eq!(status_text_from_body("Bad Gateway").as_deref(), Some("Bad Gateway"));
        assert!(status_text_from_body("   ").is_none());
    }

    #[test]
    fn test_backend_error_constructors() {
        let err = BackendError::http(404, "Conversation not found");
        assert_eq!(err.status_code, Some(404));
        assert!(err.to_string().contains("404"));

        let err = BackendError::transport("connection reset");
        assert!(err.status_code.is_none());
        assert!(err.status_text.is_empty());
        assert_eq!(err.to_string(), "connection reset");
    }

    #[tokio::test]
    async fn test_spawned_stream_ends_when_cancelled() {
        let cancel = CancellationToken::new();
        let mut stream = spawn_backend_stream(cancel.clone(), |tx| async move {
            let _ = tx
                .send(Ok(BackendEvent::Progress(BackendMessage::Keyed(KeyedMessage {
                    id: "1".into(),
                    text: "a".into(),
                    conversation_id: None,
                    parent_message_id: None,
                }))))
                .await;
            std::future::pending::<()>().await;
        });

        assert!(matches!(
            stream.next().await,
            Some(Ok(BackendEvent::Progress(_)))
        ));
        cancel.cancel();
        assert!(stream.next().await.is_none());
    }
}
