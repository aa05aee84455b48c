//! Keyed backend: OpenAI-compatible streaming chat completions
//!
//! One client exists per caller credential. Each turn replays the parent
//! chain from the client's [`MessageHistory`], streams the completion over
//! SSE and reports the accumulated text as progress.

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::history::{MessageHistory, Role, StoredMessage};
use super::{
    BackendError, BackendEvent, BackendKind, BackendMessage, BackendStream, ChatBackend,
    KeyedMessage, SendOptions, spawn_backend_stream,
};
use crate::config::KeyedConfig;

/// Chat completion request body
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

/// One `chat.completion.chunk` SSE payload
#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Client for a single credential
#[derive(Clone)]
pub struct KeyedClient {
    inner: Arc<KeyedInner>,
}

struct KeyedInner {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_message: Option<String>,
    history: MessageHistory,
}

impl KeyedClient {
    pub fn new(http: reqwest::Client, config: &KeyedConfig, api_key: &str) -> Self {
        let endpoint = format!("{}/chat/completions", config.api_url.trim_end_matches('/'));
        Self {
            inner: Arc::new(KeyedInner {
                http,
                endpoint,
                api_key: api_key.to_string(),
                model: config.model.clone(),
                system_message: config.system_message.clone(),
                history: MessageHistory::new(
                    config.history_capacity,
                    config.max_context_messages,
                ),
            }),
        }
    }

    /// Model used when a turn does not override it
    pub fn default_model(&self) -> &str {
        &self.inner.model
    }

    pub fn history(&self) -> &MessageHistory {
        &self.inner.history
    }
}

impl ChatBackend for KeyedClient {
    fn send_message(&self, message: &str, options: SendOptions) -> BackendStream {
        let inner = Arc::clone(&self.inner);
        let message = message.to_string();
        spawn_backend_stream(options.cancel.clone(), move |tx| async move {
            let outcome = match inner.complete(&message, &options, &tx).await {
                Ok(reply) => Ok(BackendEvent::Completed(BackendMessage::Keyed(reply))),
                Err(e) => Err(e),
            };
            let _ = tx.send(outcome).await;
        })
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Keyed
    }
}

impl KeyedInner {
    async fn complete(
        &self,
        message: &str,
        options: &SendOptions,
        tx: &mpsc::Sender<Result<BackendEvent, BackendError>>,
    ) -> Result<KeyedMessage, BackendError> {
        let user_id = Uuid::new_v4().to_string();
        let request = ChatCompletionRequest {
            model: options.model.clone().unwrap_or_else(|| self.model.clone()),
            messages: self.build_messages(message, options.parent_message_id.as_deref()),
            stream: true,
        };

        self.history.insert(StoredMessage {
            id: user_id.clone(),
            role: Role::User,
            text: message.to_string(),
            parent_message_id: options.parent_message_id.clone(),
        });

        debug!(
            "Calling keyed backend at {} with {} messages",
            self.endpoint,
            request.messages.len()
        );

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(BackendError::from_reqwest)?;

        if !response.status().is_success() {
            return Err(BackendError::from_response(response).await);
        }

        let mut reply = KeyedMessage {
            id: Uuid::new_v4().to_string(),
            text: String::new(),
            conversation_id: options.conversation_id.clone(),
            parent_message_id: Some(user_id.clone()),
        };
        let mut events = response.bytes_stream().eventsource();

        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| BackendError::transport(format!("SSE stream error: {e}")))?;
            if event.data == "[DONE]" {
                break;
            }

            let chunk: ChatCompletionChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!("Skipping unparseable completion chunk: {e}");
                    continue;
                }
            };

            if let Some(error) = chunk.error {
                let text = error
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(BackendError::transport(format!("SSE API error: {text}")));
            }

            if let Some(id) = chunk.id {
                reply.id = id;
            }

            let delta = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();
            if delta.is_empty() {
                continue;
            }

            reply.text.push_str(delta);
            let progress = BackendEvent::Progress(BackendMessage::Keyed(reply.clone()));
            if tx.send(Ok(progress)).await.is_err() {
                return Err(BackendError::transport("Caller stopped listening"));
            }
        }

        self.history.insert(StoredMessage {
            id: reply.id.clone(),
            role: Role::Assistant,
            text: reply.text.clone(),
            parent_message_id: Some(user_id),
        });

        Ok(reply)
    }

    fn build_messages(&self, message: &str, parent_message_id: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        if let Some(ref system) = self.system_message {
            messages.push(ChatMessage {
                role: "system",
                content: system.clone(),
            });
        }

        for prior in self.history.context(parent_message_id) {
            messages.push(ChatMessage {
                role: prior.role.as_str(),
                content: prior.text,
            });
        }

        messages.push(ChatMessage {
            role: Role::User.as_str(),
            content: message.to_string(),
        });
        messages
    }
}
