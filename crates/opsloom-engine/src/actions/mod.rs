//! Action handlers
//!
//! Action steps name a handler by `action_type`; the registry dispatches
//! to the matching [`ActionHandler`]. Handler failures are data, not
//! errors: they come back as unsuccessful [`ActionOutcome`]s and the
//! runner folds them into failed step results per the step's error
//! policy. An unregistered `action_type` is the same kind of failure.

mod builtin;
mod registry;

pub use builtin::{LogMessageHandler, SetValueHandler};
pub use registry::ActionRegistry;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// Execution context passed to every handler
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub run_id: Uuid,
    pub organization_id: Uuid,

    /// Trigger context the run was started with
    pub trigger: Value,
}

/// What a handler produced
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub success: bool,

    /// Handler output, persisted as the step result's data
    pub data: Option<Value>,

    pub error: Option<String>,

    /// Entity the action touched, when one exists
    pub target_type: Option<String>,
    pub target_id: Option<String>,
}

impl ActionOutcome {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            target_type: None,
            target_id: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            target_type: None,
            target_id: None,
        }
    }

    pub fn with_target(mut self, target_type: impl Into<String>, target_id: impl Into<String>) -> Self {
        self.target_type = Some(target_type.into());
        self.target_id = Some(target_id.into());
        self
    }
}

/// A named side-effecting operation invocable from action steps
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// The `action_type` this handler serves
    fn action_type(&self) -> &str;

    /// Execute with the step's declared params
    async fn execute(&self, params: &Value, ctx: &ActionContext) -> ActionOutcome;
}
