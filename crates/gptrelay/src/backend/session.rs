//! Session backend: a shared, pre-authenticated web session
//!
//! Speaks the web client's conversation protocol against a configured
//! endpoint using the session's access token. The upstream keeps the
//! conversation state, so no local history is needed.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    BackendError, BackendEvent, BackendKind, BackendMessage, BackendStream, ChatBackend,
    SendOptions, SessionMessage, spawn_backend_stream,
};
use crate::config::SessionConfig;

#[derive(Debug, Serialize)]
struct ConversationRequest {
    action: &'static str,
    messages: Vec<PromptMessage>,
    model: String,
    parent_message_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct PromptMessage {
    id: String,
    author: Author,
    content: PromptContent,
}

#[derive(Debug, Serialize, Deserialize)]
struct Author {
    role: String,
}

#[derive(Debug, Serialize)]
struct PromptContent {
    content_type: &'static str,
    parts: Vec<String>,
}

/// One conversation SSE payload
#[derive(Debug, Deserialize)]
struct ConversationEvent {
    #[serde(default)]
    message: Option<EventMessage>,
    #[serde(default)]
    conversation_id: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct EventMessage {
    id: String,
    #[serde(default)]
    author: Option<Author>,
    #[serde(default)]
    content: Option<EventContent>,
}

#[derive(Debug, Deserialize)]
struct EventContent {
    #[serde(default)]
    parts: Vec<Value>,
}

impl EventMessage {
    fn is_assistant(&self) -> bool {
        self.author
            .as_ref()
            .map(|a| a.role == "assistant")
            .unwrap_or(true)
    }

    fn text(&self) -> Option<&str> {
        self.content.as_ref()?.parts.first()?.as_str()
    }
}

/// The shared session client
#[derive(Clone)]
pub struct SessionClient {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    tier_model: String,
}

impl SessionClient {
    pub fn new(http: reqwest::Client, config: &SessionConfig, access_token: &str) -> Self {
        let endpoint = format!("{}/conversation", config.api_url.trim_end_matches('/'));
        info!("Session backend initialized at {endpoint}");
        Self {
            inner: Arc::new(SessionInner {
                http,
                endpoint,
                access_token: access_token.to_string(),
                tier_model: config.tier_model().to_string(),
            }),
        }
    }
}

impl ChatBackend for SessionClient {
    fn send_message(&self, message: &str, options: SendOptions) -> BackendStream {
        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        spawn_backend_stream(options.cancel.clone(), move |tx| async move {
            let outcome = match inner.converse(&message, &options, &tx).await {
                Ok(reply) => Ok(BackendEvent::Completed(BackendMessage::Session(reply))),
                Err(e) => Err(e),
            };
            let _ = tx.send(outcome).await;
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Session
    }
}

impl SessionInner {
    async fn converse(
        &self,
        message: &str,
        options: &SendOptions,
        tx: &mpsc::Sender<Result<BackendEvent, BackendError>>,
    ) -> Result<SessionMessage, BackendError> {
        let prompt_id = Uuid::new_v4().to_string();
        let request = ConversationRequest {
            action: "next",
            messages: vec![PromptMessage {
                id: prompt_id.clone(),
                author: Author {
                    role: "user".to_string(),
                },
                content: PromptContent {
                    content_type: "text",
                    parts: vec![message.to_string()],
                },
            }],
            model: options
                .model
                .clone()
                .unwrap_or_else(|| self.tier_model.clone()),
            parent_message_id: options
                .parent_message_id
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            conversation_id: options.conversation_id.clone(),
        };

        debug!("Calling session backend with model {}", request.model);

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.access_token)
            .header("accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await);
        }

        let mut reply: Option<SessionMessage> = None;
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| BackendError::transport(format!("SSE stream error: {e}")))?;
            if event.data == "[DONE]" {
                break;
            }

            let payload: ConversationEvent = match serde_json::from_str(&event.data) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Skipping unparseable conversation event: {e}");
                    continue;
                }
            };

            if let Some(error) = payload.error.filter(|e| !e.is_null()) {
                let text = match error {
                    Value::String(s) => s,
                    other => other.to_string(),
                };
                return Err(BackendError::transport(format!("Session error: {text}")));
            }

            let Some(message) = payload.message.filter(EventMessage::is_assistant) else {
                continue;
            };
            let Some(text) = message.text().filter(|t| !t.is_empty()) else {
                continue;
            };

            let conversation_id = payload
                .conversation_id
                .or_else(|| options.conversation_id.clone());
            let current = SessionMessage {
                message_id: message.id.clone(),
                response: text.to_string(),
                conversation_id,
                parent_message_id: Some(prompt_id.clone()),
            };

            let progress = BackendEvent::Progress(BackendMessage::Session(current.clone()));
            if tx.send(Ok(progress)).await.is_err() {
                return Err(BackendError::transport("Caller stopped listening"));
            }
            reply = Some(current);
        }

        reply.ok_or_else(|| BackendError::transport("Session stream ended without a response"))
    }
}
