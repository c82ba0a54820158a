// Tool Abstraction for the Reasoning Loop
//
// Tools are defined via the `Tool` trait and registered with a
// `ToolRegistry`, which dispatches a named call to its handler and
// returns a structured outcome. An unregistered tool name is an error
// surfaced to the loop boundary rather than a silent no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{AgentRunError, Result};
use crate::execution::AgentRecommendation;

/// Structured result of a tool execution
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    /// Whether the tool succeeded
    pub success: bool,

    /// Result payload on success
    pub data: Option<Value>,

    /// Error message on failure (safe to feed back into reasoning)
    pub error: Option<String>,

    /// Tokens consumed by the tool itself, if it made model calls
    pub tokens_used: Option<u64>,

    /// Wall-clock duration of the call in milliseconds
    pub duration_ms: Option<u64>,
}

impl ToolOutcome {
    /// Successful outcome with a payload
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            tokens_used: None,
            duration_ms: None,
        }
    }

    /// Failed outcome with an error message
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            tokens_used: None,
            duration_ms: None,
        }
    }

    /// Attach token usage
    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }
}

/// Context handed to every tool call
///
/// Carries the identifiers scoping the call plus the task payload the
/// execution was triggered with. Recommendations pushed here are
/// collected into the execution's outcome.
#[derive(Clone)]
pub struct ToolContext {
    pub organization_id: Uuid,
    pub agent_id: Uuid,
    pub execution_id: Uuid,

    /// Raw task input (rows, config) the execution operates on
    pub task: Value,

    recommendations: Arc<Mutex<Vec<AgentRecommendation>>>,
}

impl ToolContext {
    pub fn new(organization_id: Uuid, agent_id: Uuid, execution_id: Uuid, task: Value) -> Self {
        Self {
            organization_id,
            agent_id,
            execution_id,
            task,
            recommendations: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Record a proposed resolution
    pub fn recommend(&self, recommendation: AgentRecommendation) {
        self.recommendations.lock().push(recommendation);
    }

    /// Recommendations collected so far
    pub fn recommendations(&self) -> Vec<AgentRecommendation> {
        self.recommendations.lock().clone()
    }
}

/// A named capability the reasoning loop can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the reasoning provider uses to select this tool
    fn name(&self) -> &str;

    /// Execute the tool with the given input
    async fn execute(&self, input: &Value, ctx: &ToolContext) -> ToolOutcome;
}

/// Registry dispatching tool calls by name
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its declared name
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Names of all registered tools
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.keys().map(String::as_str).collect()
    }

    /// Dispatch a named call; unknown names are an error
    pub async fn execute(&self, name: &str, input: &Value, ctx: &ToolContext) -> Result<ToolOutcome> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| AgentRunError::tool(format!("unknown tool: {name}")))?;

        debug!(tool = name, execution_id = %ctx.execution_id, "executing tool");
        let started = std::time::Instant::now();
        let mut outcome = tool.execute(input, ctx).await;
        if outcome.duration_ms.is_none() {
            outcome.duration_ms = Some(started.elapsed().as_millis() as u64);
        }
        Ok(outcome)
    }
}
