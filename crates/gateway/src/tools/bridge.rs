use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use tracing::debug;

use super::error::{ToolError, ToolResult};
use crate::models::tool::{empty_object_schema, ToolSpec};

/// Who a tool is running for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolContext {
    pub request_id: String,
    pub persona: String,
}

impl ToolContext {
    pub fn new<R: Into<String>, P: Into<String>>(request_id: R, persona: P) -> Self {
        Self {
            request_id: request_id.into(),
            persona: persona.into(),
        }
    }
}

/// Something the gateway can invoke on behalf of a model
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, ctx: &ToolContext) -> ToolResult<Value>;

    fn description(&self) -> &str {
        ""
    }

    /// JSON schema of the accepted arguments
    fn parameters(&self) -> Value {
        empty_object_schema()
    }
}

type HandlerFn = dyn Fn(Value, ToolContext) -> BoxFuture<'static, ToolResult<Value>> + Send + Sync;

/// Adapts an async closure into a handler
pub struct FnHandler {
    description: String,
    func: Box<HandlerFn>,
}

#[async_trait]
impl ToolHandler for FnHandler {
    async fn call(&self, args: Value, ctx: &ToolContext) -> ToolResult<Value> {
        (self.func)(args, ctx.clone()).await
    }

    fn description(&self) -> &str {
        &self.description
    }
}

/// Registry of invocable tools keyed by name.
///
/// Populated before traffic starts and shared read-only afterwards.
#[derive(Default)]
pub struct ToolBridge {
    handlers: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name
    pub fn register<N, H>(&mut self, name: N, handler: H) -> &mut Self
    where
        N: Into<String>,
        H: ToolHandler + 'static,
    {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    pub fn register_fn<N, D, F, Fut>(&mut self, name: N, description: D, func: F) -> &mut Self
    where
        N: Into<String>,
        D: Into<String>,
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult<Value>> + Send + 'static,
    {
        let handler = FnHandler {
            description: description.into(),
            func: Box::new(move |args, ctx| Box::pin(func(args, ctx))),
        };
        self.register(name, handler)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered tools described as specs a model can be offered
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.handlers
            .iter()
            .map(|(name, handler)| {
                ToolSpec::new(name.clone(), handler.description(), handler.parameters())
            })
            .collect()
    }

    pub async fn invoke(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult<Value> {
        let handler = self
            .handlers
            .get(name)
            .ok_or_else(|| ToolError::ToolNotFound(name.to_string()))?;

        debug!(tool = %name, request_id = %ctx.request_id, "invoking tool");
        handler.call(args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Upper;

    #[async_trait]
    impl ToolHandler for Upper {
        async fn call(&self, args: Value, _ctx: &ToolContext) -> ToolResult<Value> {
            let text = args
                .get("text")
                .and_then(|v| v.as_str())
                .ok_or_else(|| ToolError::InvalidParameters("Missing 'text' parameter".into()))?;
            Ok(json!({ "text": text.to_uppercase() }))
        }

        fn description(&self) -> &str {
            "Uppercase some text"
        }
    }

    #[tokio::test]
    async fn test_invoke_registered_handler() {
        let mut bridge = ToolBridge::new();
        bridge.register("upper", Upper);

        let ctx = ToolContext::new("req-1", "alice");
        let result = bridge.invoke("upper", json!({"text": "hi"}), &ctx).await;
        assert_eq!(result, Ok(json!({"text": "HI"})));

        let result = bridge.invoke("upper", json!({}), &ctx).await;
        assert!(matches!(result, Err(ToolError::InvalidParameters(_))));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let bridge = ToolBridge::new();
        let result = bridge
            .invoke("nope", json!({}), &ToolContext::default())
            .await;
        assert_eq!(result, Err(ToolError::ToolNotFound("nope".into())));
    }

    #[tokio::test]
    async fn test_register_fn_sees_context() {
        let mut bridge = ToolBridge::new();
        bridge.register_fn("whoami", "Report the caller", |_args, ctx: ToolContext| async move {
            Ok(json!({ "persona": ctx.persona, "request_id": ctx.request_id }))
        });

        let result = bridge
            .invoke("whoami", json!({}), &ToolContext::new("req-9", "bob"))
            .await
            .unwrap();
        assert_eq!(result, json!({"persona": "bob", "request_id": "req-9"}));
    }

    #[test]
    fn test_specs_are_sorted_by_name() {
        let mut bridge = ToolBridge::new();
        bridge.register("upper", Upper);
        bridge.register_fn("echo", "Echo", |args, _ctx| async move { Ok(args) });

        let specs = bridge.specs();
        assert_eq!(specs.len(), 2);
        assert_eq!(specs[0].name, "echo");
        assert_eq!(specs[1].description, "Uppercase some text");
        assert!(bridge.contains("upper"));
        assert!(!bridge.contains("lower"));
    }
}
