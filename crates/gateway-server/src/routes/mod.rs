// Export route modules
pub mod capabilities;
pub mod chat;
pub mod embeddings;
pub mod health;
pub mod tools;

use crate::state::AppState;
use axum::Router;

// Function to configure all routes
pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(chat::routes(state.clone()))
        .merge(capabilities::routes(state.clone()))
        .merge(health::routes(state.clone()))
        .merge(embeddings::routes(state.clone()))
        .merge(tools::routes(state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, Bytes},
        http::{header, Request, StatusCode},
    };
    use gateway::{
        budget::{BudgetGate, BudgetLimits},
        gateway::Gateway,
        providers::{configs::ProviderConfigs, factory::ProviderRouter},
        tools::{filesystem::register_builtin_tools, ToolBridge, Workspace},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::{
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc,
        },
        time::Duration,
    };
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn state_with(mut configs: ProviderConfigs, budget: BudgetLimits) -> (TempDir, AppState) {
        let dir = TempDir::new().unwrap();
        let mut bridge = ToolBridge::new();
        register_builtin_tools(&mut bridge, Arc::new(Workspace::new(dir.path()).unwrap()));

        configs.agent.command = "definitely-not-an-installed-agent".into();
        let router = ProviderRouter::new(configs, "mock").unwrap();
        let gateway = Gateway::new(router, Arc::new(bridge)).with_budget(BudgetGate::new(budget));
        (dir, AppState::new(gateway, 16))
    }

    fn test_state() -> (TempDir, AppState) {
        state_with(ProviderConfigs::default(), BudgetLimits::default())
    }

    async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Bytes) {
        let response = configure(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    async fn post_json(state: &AppState, uri: &str, body: Value) -> (StatusCode, Bytes) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(state, request).await
    }

    async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let (status, body) = send(state, request).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Split an SSE body into (event, data) pairs
    fn parse_sse(body: &[u8]) -> Vec<(String, Value)> {
        let text = std::str::from_utf8(body).unwrap();
        text.split("\n\n")
            .filter(|frame| !frame.trim().is_empty())
            .map(|frame| {
                let mut event = String::new();
                let mut data = Value::Null;
                for line in frame.lines() {
                    if let Some(name) = line.strip_prefix("event: ") {
                        event = name.to_string();
                    } else if let Some(payload) = line.strip_prefix("data: ") {
                        data = serde_json::from_str(payload).unwrap();
                    }
                }
                (event, data)
            })
            .collect()
    }

    fn event_names(events: &[(String, Value)]) -> Vec<&str> {
        events.iter().map(|(name, _)| name.as_str()).collect()
    }

    fn error_code(body: &[u8]) -> String {
        let value: Value = serde_json::from_slice(body).unwrap();
        value["error"]["code"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_chat_hello_world() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/chat",
            json!({"messages": [{"role": "user", "content": "hello world"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = parse_sse(&body);
        let names = event_names(&events);
        assert!(names.iter().filter(|n| **n == "token").count() >= 1);
        assert_eq!(names.iter().filter(|n| **n == "done").count(), 1);
        assert_eq!(names[names.len() - 2..], ["usage", "done"]);

        let (_, usage) = &events[events.len() - 2];
        let cost = usage["cost_usd"].as_f64().unwrap();
        assert!(cost.is_finite() && cost >= 0.0);
    }

    #[tokio::test]
    async fn test_chat_disconnect_cancels_tool_in_flight() {
        let finished = Arc::new(AtomicBool::new(false));
        let mut bridge = ToolBridge::new();
        let flag = finished.clone();
        bridge.register_fn("sleepy", "Sleeps, then records that it finished", move |_args, _ctx| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                Ok(json!({}))
            }
        });

        let mut configs = ProviderConfigs::default();
        configs.agent.command = "definitely-not-an-installed-agent".into();
        let router = ProviderRouter::new(configs, "mock").unwrap();
        let state = AppState::new(Gateway::new(router, Arc::new(bridge)), 16);

        let request = Request::builder()
            .method("POST")
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({"messages": [{"role": "user", "content": "CALL_TOOL: sleepy"}]}).to_string(),
            ))
            .unwrap();
        let response = configure(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let mut body = response.into_body();
        let first = body.frame().await.unwrap().unwrap();
        assert!(first.is_data());
        drop(body);

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_chat_missing_messages_is_422() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(&state, "/chat", json!({"model": "x"})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(error_code(&body), "invalid_request");

        let (status, _) = post_json(&state, "/chat", json!({"messages": []})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_chat_duplicate_tool_names_is_422() {
        let (_dir, state) = test_state();
        let tool = json!({"name": "echo", "description": "", "parameters": {"type": "object"}});
        let (status, _) = post_json(
            &state,
            "/chat",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "tools": [tool.clone(), tool],
            }),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_chat_unmet_requirement_is_412_without_events() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/chat",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "requires": {"tool_calling": "native"},
            }),
        )
        .await;
        assert_eq!(status, StatusCode::PRECONDITION_FAILED);
        assert_eq!(error_code(&body), "requirement_unmet");
        assert!(!std::str::from_utf8(&body).unwrap().contains("event:"));
    }

    #[tokio::test]
    async fn test_chat_budget_rejects_crossing_request() {
        let (_dir, state) = state_with(
            ProviderConfigs::default(),
            BudgetLimits {
                requests_per_minute: 1,
                ..BudgetLimits::default()
            },
        );
        let body = json!({"messages": [{"role": "user", "content": "hi"}]});

        let (status, _) = post_json(&state, "/chat?personaId=alice", body.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, response) = post_json(&state, "/chat?personaId=alice", body.clone()).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(error_code(&response), "budget_exceeded");

        // other personas are unaffected
        let (status, _) = post_json(&state, "/chat?personaId=bob", body).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_marker_dispatches_echo() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/chat",
            json!({"messages": [{"role": "user", "content": "CALL_TOOL: echo"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = parse_sse(&body);
        let names = event_names(&events);
        let call_at = names.iter().position(|n| *n == "tool_call").unwrap();
        let result_at = names.iter().position(|n| *n == "tool_result").unwrap();
        assert!(call_at < result_at);
        assert_eq!(events[call_at].1["name"], "echo");
        assert_eq!(events[call_at].1["id"], events[result_at].1["id"]);
        assert_eq!(names[names.len() - 2..], ["usage", "done"]);
    }

    #[tokio::test]
    async fn test_chat_json_mode_tokens_parse() {
        let (_dir, state) = test_state();
        let (_, body) = post_json(
            &state,
            "/chat",
            json!({
                "messages": [{"role": "user", "content": "give me json"}],
                "response_format": {"type": "json"},
            }),
        )
        .await;

        let text: String = parse_sse(&body)
            .iter()
            .filter(|(name, _)| name == "token")
            .filter_map(|(_, data)| data["text"].as_str().map(str::to_string))
            .collect();
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["echo"], "give me json");
    }

    #[tokio::test]
    async fn test_chat_auto_without_credentials_falls_back() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/chat?provider=auto",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let events = parse_sse(&body);
        let names = event_names(&events);
        assert!(names.contains(&"token"));
        assert_eq!(names.last(), Some(&"done"));
        let (_, usage) = &events[events.len() - 2];
        assert_ne!(usage["provider"], "mock");
    }

    #[tokio::test]
    async fn test_tools_write_then_read() {
        let (_dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/tools/invoke",
            json!({"name": "fs_write", "args": {"path": "notes/a.txt", "content": "hello"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({"name": "fs_write", "result": {"bytes": 5}}));

        let (status, body) = post_json(
            &state,
            "/tools/invoke",
            json!({"name": "fs_read", "args": {"path": "notes/a.txt"}}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["result"]["content"], "hello");
    }

    #[tokio::test]
    async fn test_tools_traversal_is_400_without_write() {
        let (dir, state) = test_state();
        let (status, body) = post_json(
            &state,
            "/tools/invoke",
            json!({"name": "fs_write", "args": {"path": "../../evil.txt", "content": "x"}}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(error_code(&body), "path_escape");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_tools_unknown_is_404() {
        let (_dir, state) = test_state();
        let (status, body) =
            post_json(&state, "/tools/invoke", json!({"name": "nope", "args": {}})).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(error_code(&body), "tool_not_found");
    }

    #[tokio::test]
    async fn test_tools_list() {
        let (_dir, state) = test_state();
        let (status, value) = get_json(&state, "/tools").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|spec| spec["name"].as_str())
            .collect();
        assert_eq!(names, vec!["echo", "fs_list", "fs_read", "fs_write"]);
    }

    #[tokio::test]
    async fn test_embeddings() {
        let (_dir, state) = test_state();
        let (status, body) =
            post_json(&state, "/embeddings", json!({"input": ["a", "b", "a"]})).await;
        assert_eq!(status, StatusCode::OK);

        let value: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["dimensions"], 16);
        let data = value["data"].as_array().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[2]["index"], 2);
        assert_eq!(data[0]["embedding"].as_array().unwrap().len(), 16);
        assert_eq!(data[0]["embedding"], data[2]["embedding"]);
        assert_ne!(data[0]["embedding"], data[1]["embedding"]);

        let (status, _) = post_json(&state, "/embeddings", json!({"input": []})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let (status, _) = post_json(&state, "/embeddings", json!({})).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_capabilities() {
        let (_dir, state) = test_state();
        let (status, value) = get_json(&state, "/capabilities").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["provider"], "mock");
        assert_eq!(value["capabilities"]["tool_calling"], "simulated");
        assert_eq!(value["capabilities"]["json_mode"], true);

        let (_, value) = get_json(&state, "/capabilities?provider=openai").await;
        assert_eq!(value["provider"], "openai");
        assert_eq!(value["capabilities"]["tool_calling"], "native");
    }

    #[tokio::test]
    async fn test_health_reports_without_secrets() {
        let mut configs = ProviderConfigs::default();
        configs.openai.api_key = Some("sk-very-secret".into());
        let (_dir, state) = state_with(configs, BudgetLimits::default());

        let (status, value) = get_json(&state, "/health/providers").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value["openai"]["configured"], true);
        assert_eq!(value["anthropic"]["configured"], false);
        assert_eq!(value["agent"]["sdk"], false);
        assert!(!value.to_string().contains("sk-very-secret"));

        let (status, value) = get_json(&state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(value, json!({"status": "ok"}));
    }
}
