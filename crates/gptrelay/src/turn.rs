//! Inbound turns, outbound records and completed-turn results

use serde::{Deserialize, Serialize};

/// One inbound message/response exchange requested by a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    /// User message; never empty once accepted by the HTTP layer
    pub message: String,
    /// Existing conversation to continue (absent starts a new one)
    pub conversation_id: Option<String>,
    /// Message this turn replies to
    pub parent_message_id: Option<String>,
    /// Model override requested by the caller
    pub requested_model: Option<String>,
    /// Caller credential for the keyed backend
    pub credential: Option<String>,
    /// Write partial results incrementally
    pub streaming: bool,
    /// Version declared by the calling client
    pub client_version: Option<String>,
}

impl ConversationTurn {
    /// Create a streaming turn for `message` with no linkage
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_id: None,
            parent_message_id: None,
            requested_model: None,
            credential: None,
            streaming: true,
            client_version: None,
        }
    }

    pub fn with_credential(mut self, credential: impl Into<String>) -> Self {
        self.credential = Some(credential.into());
        self
    }

    pub fn with_conversation(
        mut self,
        conversation_id: Option<String>,
        parent_message_id: Option<String>,
    ) -> Self {
        self.conversation_id = conversation_id;
        self.parent_message_id = parent_message_id;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.requested_model = Some(model.into());
        self
    }

    pub fn with_client_version(mut self, version: impl Into<String>) -> Self {
        self.client_version = Some(version.into());
        self
    }

    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }
}

/// Canonical outbound record written for every partial and terminal message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyReturn {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    pub text: String,
}

impl ProxyReturn {
    pub fn new(id: Option<String>, conversation_id: Option<String>, text: impl Into<String>) -> Self {
        Self {
            id,
            conversation_id,
            text: text.into(),
        }
    }
}

/// A successfully completed turn; also the unit persisted by the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub message_id: String,
    #[serde(default)]
    pub parent_message_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// The caller's input message
    #[serde(rename = "message")]
    pub input_message: String,
    /// Full response text
    #[serde(rename = "response")]
    pub response_text: String,
    /// Model the backend was asked to use
    #[serde(rename = "model")]
    pub effective_model: String,
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}
