//! Conversation endpoint

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::framing::Framing;
use super::server::{AppState, create_error_response, stream_turn};
use crate::dispatch::{RelayFrame, relay_turn};
use crate::turn::ConversationTurn;

/// A boolean-ish flag as sent by browsers and scripts (`1`, `"1"`, `true`)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Number(i64),
    Text(String),
}

impl Flag {
    pub fn is_set(&self) -> bool {
        match self {
            Flag::Bool(b) => *b,
            Flag::Number(n) => *n != 0,
            Flag::Text(s) => matches!(s.trim(), "1" | "true"),
        }
    }
}

/// Turn parameters accepted from the query string and JSON body
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnParams {
    pub message: Option<String>,
    pub conversation_id: Option<String>,
    pub parent_message_id: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub no_streaming: Option<Flag>,
    pub client_version: Option<String>,
}

impl TurnParams {
    /// Combine with `other`, whose fields win on conflict
    pub fn merge(self, other: TurnParams) -> TurnParams {
        TurnParams {
            message: other.message.or(self.message),
            conversation_id: other.conversation_id.or(self.conversation_id),
            parent_message_id: other.parent_message_id.or(self.parent_message_id),
            model: other.model.or(self.model),
            api_key: other.api_key.or(self.api_key),
            no_streaming: other.no_streaming.or(self.no_streaming),
            client_version: other.client_version.or(self.client_version),
        }
    }

    /// Build the turn; `None` when the message is missing or blank
    pub fn into_turn(self) -> Option<ConversationTurn> {
        let message = self.message.filter(|m| !m.trim().is_empty())?;
        Some(ConversationTurn {
            message,
            conversation_id: non_empty(self.conversation_id),
            parent_message_id: non_empty(self.parent_message_id),
            requested_model: non_empty(self.model),
            credential: non_empty(self.api_key),
            streaming: !self.no_streaming.is_some_and(|f| f.is_set()),
            client_version: non_empty(self.client_version),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// Parse an optional JSON request body; an empty body yields defaults
pub(crate) fn parse_json_body<T: DeserializeOwned + Default>(
    body: &Bytes,
) -> Result<T, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body)
}

/// `GET|POST /api/conversation`
pub async fn conversation_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TurnParams>,
    body: Bytes,
) -> Response<Body> {
    let params = match parse_json_body::<TurnParams>(&body) {
        Ok(from_body) => query.merge(from_body),
        Err(e) => {
            tracing::warn!("Invalid conversation request body: {e}");
            return create_error_response(
                StatusCode::BAD_REQUEST,
                "invalid_request",
                &format!("Invalid JSON body: {e}"),
            );
        }
    };

    let Some(turn) = params.into_turn() else {
        return create_error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "message is required",
        );
    };

    if turn.streaming {
        stream_turn(&state, turn, Framing::Sse)
    } else {
        complete_turn(&state, turn).await
    }
}

/// Run a non-streaming turn and answer with one JSON body
async fn complete_turn(state: &AppState, turn: ConversationTurn) -> Response<Body> {
    let (tx, mut rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let _abandon_on_disconnect = cancel.clone().drop_guard();

    let relay = tokio::spawn(relay_turn(Arc::clone(&state.relay), turn, tx, cancel));

    let mut response = None;
    while let Some(frame) = rx.recv().await {
        match frame {
            RelayFrame::Final(mut result) => {
                // The caller's own credential is kept out of the response
                result.credential = None;
                response = Some(Json(result).into_response());
            }
            RelayFrame::Failed(record) => response = Some(Json(record).into_response()),
            RelayFrame::Partial(_) | RelayFrame::Done => {}
        }
    }

    if let Err(e) = relay.await {
        tracing::error!("Relay task failed: {e}");
    }

    response.unwrap_or_else(|| {
        create_error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "relay_error",
            "Turn ended without a response",
        )
    })
}
