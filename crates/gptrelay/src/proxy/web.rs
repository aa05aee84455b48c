//! Routes compatible with the chatgpt-web front end
//!
//! `chat-process` runs turns through the same relay as `/api/conversation`
//! but frames partials as newline-separated JSON.

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::Response,
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use super::framing::Framing;
use super::handlers::parse_json_body;
use super::server::{AppState, create_error_response, stream_turn};
use crate::turn::ConversationTurn;

/// Model name reported to the front end
pub const WEB_API_MODEL: &str = "ChatGPTUnofficialProxyAPI";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebEnvelope {
    pub status: String,
    pub message: String,
    pub data: Value,
}

impl WebEnvelope {
    fn success(message: &str, data: Value) -> Self {
        Self {
            status: "Success".to_string(),
            message: message.to_string(),
            data,
        }
    }

    fn fail(message: &str) -> Self {
        Self {
            status: "Fail".to_string(),
            message: message.to_string(),
            data: Value::Null,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct VerifyRequest {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProcessOptions {
    pub parent_message_id: Option<String>,
    pub conversation_id: Option<String>,
    pub model: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProcessRequest {
    pub prompt: Option<String>,
    #[serde(default)]
    pub options: Option<ChatProcessOptions>,
    pub api_key: Option<String>,
}

impl ChatProcessRequest {
    fn merge(self, other: ChatProcessRequest) -> ChatProcessRequest {
        ChatProcessRequest {
            prompt: other.prompt.or(self.prompt),
            options: other.options.or(self.options),
            api_key: other.api_key.or(self.api_key),
        }
    }

    fn into_turn(self) -> Option<ConversationTurn> {
        let prompt = self.prompt.filter(|p| !p.trim().is_empty())?;
        let options = self.options.unwrap_or_default();
        let mut turn = ConversationTurn::new(prompt).with_conversation(
            options.conversation_id.filter(|c| !c.is_empty()),
            options.parent_message_id.filter(|p| !p.is_empty()),
        );
        if let Some(model) = options.model.filter(|m| !m.is_empty()) {
            turn = turn.with_model(model);
        }
        if let Some(key) = self.api_key.filter(|k| !k.is_empty()) {
            turn = turn.with_credential(key);
        }
        Some(turn)
    }
}

/// Query-string form of `chat-process`; options cannot be nested there
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProcessQuery {
    prompt: Option<String>,
    api_key: Option<String>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/session", post(session_handler))
        .route("/config", post(config_handler))
        .route("/verify", post(verify_handler))
        .route("/chat-process", post(chat_process_handler))
}

async fn session_handler(State(state): State<Arc<AppState>>) -> Json<WebEnvelope> {
    Json(WebEnvelope::success(
        "",
        serde_json::json!({
            "auth": state.web_secret.is_some(),
            "model": WEB_API_MODEL,
        }),
    ))
}

async fn config_handler() -> Json<Value> {
    Json(serde_json::json!({
        "type": "Success",
        "data": {
            "apiModel": WEB_API_MODEL,
            "reverseProxy": "-",
            "timeoutMs": "-",
            "socksProxy": "-",
            "httpsProxy": "-",
            "usage": "-",
        }
    }))
}

async fn verify_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Json<WebEnvelope> {
    let request: VerifyRequest = parse_json_body(&body).unwrap_or_default();

    let Some(token) = request.token.filter(|t| !t.is_empty()) else {
        return Json(WebEnvelope::fail("Secret key is empty"));
    };

    if state.web_secret.as_deref() != Some(token.as_str()) {
        tracing::warn!("Web client verification failed");
        return Json(WebEnvelope::fail("Secret key is invalid"));
    }

    Json(WebEnvelope::success("Verify successfully", Value::Null))
}

async fn chat_process_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChatProcessQuery>,
    body: Bytes,
) -> Response<Body> {
    let from_query = ChatProcessRequest {
        prompt: query.prompt,
        options: None,
        api_key: query.api_key,
    };
    let request = match parse_json_body::<ChatProcessRequest>(&body) {
        Ok(from_body) => from_query.merge(from_body),
        Err(e) => {
            return create_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("Invalid JSON body: {e}"),
            );
        }
    };

    let Some(turn) = request.into_turn() else {
        return create_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "prompt is required",
        );
    };

    stream_turn(&state, turn, Framing::Ndjson)
}
