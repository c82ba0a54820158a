//! Built-in action handlers

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use super::{ActionContext, ActionHandler, ActionOutcome};

/// Emits a message into the log stream
///
/// Params: `{"message": "...", "level": "info"}`. Useful for tracing
/// workflow paths in development and as a no-op step in tests.
pub struct LogMessageHandler;

#[async_trait]
impl ActionHandler for LogMessageHandler {
    fn action_type(&self) -> &str {
        "log_message"
    }

    async fn execute(&self, params: &Value, ctx: &ActionContext) -> ActionOutcome {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("(no message)");

        info!(run_id = %ctx.run_id, "{}", message);
        ActionOutcome::ok(json!({"logged": message}))
    }
}

/// Stores a literal value into the step's result data
///
/// Params: `{"key": "...", "value": <any>}`. Later condition steps can
/// read it via `steps.<step_id>.<key>`.
pub struct SetValueHandler;

#[async_trait]
impl ActionHandler for SetValueHandler {
    fn action_type(&self) -> &str {
        "set_value"
    }

    async fn execute(&self, params: &Value, _ctx: &ActionContext) -> ActionOutcome {
        let Some(key) = params.get("key").and_then(Value::as_str) else {
            return ActionOutcome::fail("set_value requires a 'key' param");
        };
        let value = params.get("value").cloned().unwrap_or(Value::Null);

        let mut data = serde_json::Map::new();
        data.insert(key.to_string(), value);
        ActionOutcome::ok(Value::Object(data))
    }
}
