//! HTTP client for a running gptrelay daemon

use eventsource_stream::Eventsource;
use futures::StreamExt;
use gptrelay::admin::ModeResponse;
use gptrelay::audit::LogEntry;
use gptrelay::proxy::UNAUTHORIZED_ID;
use gptrelay::turn::{ProxyReturn, TurnResult};
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

use crate::error::{CliError, CliResult};

/// Body of a conversation request
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_streaming: Option<u8>,
}

/// Outcome of a non-streaming turn
#[derive(Debug, Clone)]
pub enum ChatReply {
    Completed(TurnResult),
    Failed(ProxyReturn),
}

pub struct DaemonClient {
    http: reqwest::Client,
    base: Url,
    admin_key: Option<String>,
}

impl DaemonClient {
    pub fn new(base_url: &str, admin_key: Option<String>) -> CliResult<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            admin_key,
        })
    }

    fn endpoint(&self, path: &str) -> CliResult<Url> {
        Ok(self.base.join(path)?)
    }

    fn admin_endpoint(&self, path: &str) -> CliResult<Url> {
        let mut url = self.endpoint(path)?;
        if let Some(ref key) = self.admin_key {
            url.query_pairs_mut().append_pair("apiKey", key);
        }
        Ok(url)
    }

    pub async fn health(&self) -> CliResult<serde_json::Value> {
        let response = self.http.get(self.endpoint("health")?).send().await?;
        if !response.status().is_success() {
            return Err(CliError(format!(
                "Daemon reported status {}",
                response.status()
            )));
        }
        Ok(response.json().await?)
    }

    pub async fn toggle_mode(&self) -> CliResult<ModeResponse> {
        let response = self.http.get(self.admin_endpoint("sys/model")?).send().await?;
        let response = check_admin_response(response).await?;
        Ok(response.json().await?)
    }

    pub async fn logs(&self) -> CliResult<Vec<LogEntry>> {
        let response = self.http.get(self.admin_endpoint("sys/logs")?).send().await?;
        let response = check_admin_response(response).await?;
        Ok(response.json().await?)
    }

    /// Send a streaming turn, calling `on_record` for every record received.
    pub async fn chat_stream<F>(&self, request: &ChatRequest, mut on_record: F) -> CliResult<()>
    where
        F: FnMut(ProxyReturn),
    {
        let response = self
            .http
            .post(self.endpoint("api/conversation")?)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CliError(format!("Daemon returned {status}: {body}")));
        }

        let mut events = response.bytes_stream().eventsource();
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| CliError(format!("Stream error: {e}")))?;
            if event.data == "[DONE]" {
                break;
            }
            on_record(serde_json::from_str(&event.data)?);
        }
        Ok(())
    }

    /// Send a turn with streaming disabled
    pub async fn chat_once(&self, request: &ChatRequest) -> CliResult<ChatReply> {
        let request = ChatRequest {
            no_streaming: Some(1),
            ..request.clone()
        };
        let response = self
            .http
            .post(self.endpoint("api/conversation")?)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CliError(format!("Daemon returned {status}: {body}")));
        }

        match serde_json::from_str::<TurnResult>(&body) {
            Ok(result) => Ok(ChatReply::Completed(result)),
            Err(_) => Ok(ChatReply::Failed(serde_json::from_str(&body)?)),
        }
    }
}

async fn check_admin_response(response: reqwest::Response) -> CliResult<reqwest::Response> {
    match response.status() {
        status if status.is_success() => Ok(response),
        StatusCode::UNAUTHORIZED => {
            let body = response.text().await.unwrap_or_default();
            let text = body
                .trim()
                .strip_prefix("data: ")
                .and_then(|json| serde_json::from_str::<ProxyReturn>(json).ok())
                .filter(|record| record.id.as_deref() == Some(UNAUTHORIZED_ID))
                .map(|record| record.text)
                .unwrap_or(body);
            Err(CliError(format!(
                "Unauthorized ({text}); pass the daemon's admin key with --admin-key"
            )))
        }
        status => {
            let body = response.text().await.unwrap_or_default();
            Err(CliError(format!("Daemon returned {status}: {body}")))
        }
    }
}
