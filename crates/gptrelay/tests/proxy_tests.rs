//! Integration tests for the HTTP surface
//!
//! Drives the router with `oneshot` requests against scripted backends, plus
//! one end-to-end run against a mocked chat completions upstream.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use gptrelay::audit::{MemoryTurnLog, TurnLog};
use gptrelay::backend::{ChatBackend, KeyedClient};
use gptrelay::config::{CooldownConfig, KeyedConfig};
use gptrelay::dispatch::{
    BackendSelector, ClientFactory, CredentialRegistry, ModelCooldown, RelayContext,
};
use gptrelay::proxy::{AppState, create_router};
use gptrelay::testing::ScriptedBackend;
use gptrelay::turn::TurnResult;

// =============================================================================
// Test Fixtures
// =============================================================================

struct Harness {
    router: Router,
    state: Arc<AppState>,
    log: Arc<MemoryTurnLog>,
}

fn harness_with(keyed: ScriptedBackend, session: Option<ScriptedBackend>, admin_key: Option<&str>) -> Harness {
    let factory: ClientFactory = Arc::new(move |_: &str| Arc::new(keyed.clone()) as Arc<dyn ChatBackend>);
    let session = session.map(|s| Arc::new(s) as Arc<dyn ChatBackend>);
    let log = Arc::new(MemoryTurnLog::new());
    let relay = RelayContext::new(
        BackendSelector::new(CredentialRegistry::new(factory), session, None, true),
        ModelCooldown::new(CooldownConfig::default(), None, "text-davinci-002-render-sha"),
        "gpt-3.5-turbo",
        log.clone(),
    );

    let mut state = AppState::new(Arc::new(relay)).with_web_secret("web-secret");
    if let Some(key) = admin_key {
        state = state.with_admin_key(key);
    }
    let state = Arc::new(state);

    Harness {
        router: create_router(Arc::clone(&state)),
        state,
        log,
    }
}

fn harness() -> Harness {
    harness_with(ScriptedBackend::keyed(), Some(ScriptedBackend::session()), None)
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// =============================================================================
// Conversation Endpoint Tests
// =============================================================================

mod conversation_tests {
    use super::*;

    #[tokio::test]
    async fn test_streaming_turn_writes_partials_then_done() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json(
                "/api/conversation",
                serde_json::json!({"message": "hi", "apiKey": "k1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );

        let body = body_string(response).await;
        let records: Vec<&str> = body.split("\n\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], r#"data: {"id":"reply-1","text":"a"}"#);
        assert_eq!(records[1], r#"data: {"id":"reply-1","text":"ab"}"#);
        assert_eq!(records[2], "data: [DONE]");
    }

    #[tokio::test]
    async fn test_get_with_query_parameters() {
        let h = harness();
        let response = h
            .router
            .oneshot(get("/api/conversation?message=hi&conversationId=c1"))
            .await
            .unwrap();

        let body = body_string(response).await;
        assert!(body.contains(r#""conversationId":"c1""#));
        assert!(body.ends_with("data: [DONE]\n\n"));
    }

    #[tokio::test]
    async fn test_no_streaming_returns_single_json_body() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json(
                "/api/conversation",
                serde_json::json!({"message": "hi", "apiKey": "k1", "noStreaming": 1}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(!body.contains("[DONE]"));

        let result: TurnResult = serde_json::from_str(&body).unwrap();
        assert_eq!(result.response_text, "ab");
        assert_eq!(result.input_message, "hi");
        assert!(result.credential.is_none());
    }

    #[tokio::test]
    async fn test_no_streaming_flag_from_query_string() {
        let h = harness();
        let response = h
            .router
            .oneshot(get("/api/conversation?message=hi&noStreaming=1"))
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["response"], "ab");
    }

    #[tokio::test]
    async fn test_body_wins_over_query() {
        let h = harness();
        let response = h
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/conversation?message=query&noStreaming=1")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"message":"body"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["message"], "body");
    }

    #[tokio::test]
    async fn test_missing_message_is_bad_request() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json("/api/conversation", serde_json::json!({})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["error"]["type"], "invalid_request");
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_bad_request() {
        let h = harness();
        let response = h
            .router
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/conversation")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_no_backend_streams_configuration_error() {
        let h = harness_with(ScriptedBackend::keyed(), None, None);
        let response = h
            .router
            .oneshot(post_json("/api/conversation", serde_json::json!({"message": "hi"})))
            .await
            .unwrap();

        assert_eq!(
            body_string(response).await,
            "data: {\"text\":\"Please configure your apiKey\"}\n\ndata: [DONE]\n\n"
        );
    }

    #[tokio::test]
    async fn test_upstream_rate_limit_is_terminal_message() {
        let keyed = ScriptedBackend::keyed()
            .with_chunks(&[])
            .failing(gptrelay::backend::BackendError::http(429, "Too Many Requests"));
        let h = harness_with(keyed, None, None);
        let response = h
            .router
            .oneshot(post_json(
                "/api/conversation",
                serde_json::json!({"message": "hi", "apiKey": "k1", "parentMessageId": "p1"}),
            ))
            .await
            .unwrap();

        let body = body_string(response).await;
        let records: Vec<&str> = body.split("\n\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(records.len(), 2);
        let record: serde_json::Value =
            serde_json::from_str(records[0].trim_start_matches("data: ")).unwrap();
        assert_eq!(record["id"], "p1");
        assert!(record["text"].as_str().unwrap().contains("rate limit"));
        assert_eq!(records[1], "data: [DONE]");
    }

    #[tokio::test]
    async fn test_completed_turns_reach_audit_log() {
        let h = harness();
        h.router
            .oneshot(post_json(
                "/api/conversation",
                serde_json::json!({"message": "hi", "apiKey": "k1", "noStreaming": true}),
            ))
            .await
            .unwrap();

        for _ in 0..50 {
            if !h.log.list().await.unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        let entries = h.log.list().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].turn.credential.as_deref(), Some("k1"));
    }
}

// =============================================================================
// Admin Route Tests
// =============================================================================

mod admin_tests {
    use super::*;

    #[tokio::test]
    async fn test_toggle_mode_without_admin_key() {
        let h = harness();
        assert!(h.state.relay.selector.prefers_session());

        let response = h.router.clone().oneshot(get("/sys/model")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["useCrawlerDefault"], false);

        let response = h.router.oneshot(get("/sys/model")).await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["useCrawlerDefault"], true);
        assert!(h.state.relay.selector.prefers_session());
    }

    #[tokio::test]
    async fn test_toggle_mode_requires_admin_key() {
        let h = harness_with(ScriptedBackend::keyed(), None, Some("sk-admin"));

        let response = h.router.clone().oneshot(get("/sys/model")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_string(response).await;
        assert!(body.starts_with("data: "));
        assert!(body.contains(r#""id":"Unauthorized""#));
        assert!(h.state.relay.selector.prefers_session());

        let response = h
            .router
            .oneshot(get("/sys/model?apiKey=%20sk-admin%20"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!h.state.relay.selector.prefers_session());
    }

    #[tokio::test]
    async fn test_logs_lists_recorded_turns() {
        let h = harness_with(ScriptedBackend::keyed(), None, Some("sk-admin"));
        let turn = TurnResult {
            message_id: "m1".into(),
            parent_message_id: None,
            conversation_id: Some("c1".into()),
            input_message: "hi".into(),
            response_text: "hello".into(),
            effective_model: "gpt-3.5-turbo".into(),
            credential: None,
        };
        h.log.append(&turn).await.unwrap();

        let response = h
            .router
            .clone()
            .oneshot(get("/sys/logs?apiKey=sk-admin"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["messageId"], "m1");
        assert!(json[0]["timestamp"].is_string());

        let response = h.router.oneshot(get("/sys/logs")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

// =============================================================================
// chatgpt-web Route Tests
// =============================================================================

mod web_tests {
    use super::*;

    #[tokio::test]
    async fn test_session_reports_auth_and_model() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json("/chatgpt-web/session", serde_json::json!({})))
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["status"], "Success");
        assert_eq!(json["data"]["auth"], true);
        assert_eq!(json["data"]["model"], "ChatGPTUnofficialProxyAPI");
    }

    #[tokio::test]
    async fn test_config_document() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json("/chatgpt-web/config", serde_json::json!({})))
            .await
            .unwrap();

        let json: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(json["type"], "Success");
        assert_eq!(json["data"]["apiModel"], "ChatGPTUnofficialProxyAPI");
    }

    #[tokio::test]
    async fn test_verify_token() {
        let h = harness();

        let cases = [
            (serde_json::json!({}), "Fail", "Secret key is empty"),
            (serde_json::json!({"token": "wrong"}), "Fail", "Secret key is invalid"),
            (serde_json::json!({"token": "web-secret"}), "Success", "Verify successfully"),
        ];

        for (body, status, message) in cases {
            let response = h
                .router
                .clone()
                .oneshot(post_json("/chatgpt-web/verify", body))
                .await
                .unwrap();
            let json: serde_json::Value =
                serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(json["status"], status);
            assert_eq!(json["message"], message);
        }
    }

    #[tokio::test]
    async fn test_chat_process_writes_newline_separated_json() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json(
                "/chatgpt-web/chat-process",
                serde_json::json!({"prompt": "hi", "options": {"conversationId": "c1"}}),
            ))
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = body_string(response).await;
        let lines: Vec<serde_json::Value> = body
            .split('\n')
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["text"], "a");
        assert_eq!(lines[1]["text"], "ab");
        assert_eq!(lines[1]["conversationId"], "c1");
    }

    #[tokio::test]
    async fn test_chat_process_requires_prompt() {
        let h = harness();
        let response = h
            .router
            .oneshot(post_json("/chatgpt-web/chat-process", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

// =============================================================================
// End-to-end Keyed Backend Tests
// =============================================================================

mod keyed_end_to_end_tests {
    use super::*;

    fn completion_chunk(content: &str) -> String {
        let payload = serde_json::json!({
            "id": "chatcmpl-1",
            "object": "chat.completion.chunk",
            "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
        });
        format!("data: {payload}\n\n")
    }

    #[tokio::test]
    async fn test_keyed_turn_through_mock_upstream() {
        let upstream = MockServer::start().await;
        let body = format!(
            "{}{}data: [DONE]\n\n",
            completion_chunk("Hel"),
            completion_chunk("lo")
        );
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/v1/chat/completions"))
            .and(matchers::header("authorization", "Bearer sk-caller"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .expect(1)
            .mount(&upstream)
            .await;

        let keyed_config = KeyedConfig {
            api_url: format!("{}/v1", upstream.uri()),
            ..KeyedConfig::default()
        };
        let http = reqwest::Client::new();
        let factory: ClientFactory = Arc::new(move |credential: &str| {
            Arc::new(KeyedClient::new(http.clone(), &keyed_config, credential))
                as Arc<dyn ChatBackend>
        });
        let relay = RelayContext::new(
            BackendSelector::new(CredentialRegistry::new(factory), None, None, true),
            ModelCooldown::new(CooldownConfig::default(), None, "text-davinci-002-render-sha"),
            "gpt-3.5-turbo",
            Arc::new(MemoryTurnLog::new()),
        );
        let router = create_router(Arc::new(AppState::new(Arc::new(relay))));

        let response = router
            .oneshot(post_json(
                "/api/conversation",
                serde_json::json!({"message": "hi", "apiKey": "sk-caller"}),
            ))
            .await
            .unwrap();

        let body = body_string(response).await;
        let records: Vec<&str> = body.split("\n\n").filter(|r| !r.is_empty()).collect();
        assert_eq!(records.len(), 3);
        assert!(records[0].contains(r#""text":"Hel""#));
        assert!(records[1].contains(r#""text":"Hello""#));
        assert_eq!(records[2], "data: [DONE]");
    }
}
