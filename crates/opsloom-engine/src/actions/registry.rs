//! Handler registry

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{ActionContext, ActionHandler, ActionOutcome};

/// Dispatch table from `action_type` to handler
#[derive(Default)]
pub struct ActionRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its declared action type
    pub fn register(&mut self, handler: Arc<dyn ActionHandler>) {
        self.handlers
            .insert(handler.action_type().to_string(), handler);
    }

    /// Registry with the built-in handlers pre-registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::LogMessageHandler));
        registry.register(Arc::new(super::SetValueHandler));
        registry
    }

    pub fn action_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Execute the handler registered for `action_type`
    ///
    /// An unknown type is a failed outcome, not an engine error, so the
    /// step's error policy decides what happens to the run.
    pub async fn execute(
        &self,
        action_type: &str,
        params: &Value,
        ctx: &ActionContext,
    ) -> ActionOutcome {
        let Some(handler) = self.handlers.get(action_type) else {
            return ActionOutcome::fail(format!("unknown action type: {action_type}"));
        };

        debug!(%action_type, run_id = %ctx.run_id, "executing action");
        handler.execute(params, ctx).await
    }
}
