//! Reasoning provider seam
//!
//! The reasoning component produces exactly one [`Decision`] per loop
//! iteration. The provider itself (LLM transport, prompt assembly) is
//! the host's concern; the loop only depends on this trait.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{AgentRunError, Result};
use crate::execution::ExecutionStep;
use crate::memory::Memory;

/// What the reasoning component chose to do this iteration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecisionAction {
    /// Invoke a named tool with the given input
    ToolCall {
        tool: String,
        input: serde_json::Value,
    },

    /// The task is done; finalize with this summary
    Finish { summary: String },

    /// A human needs to take over; finalize for review
    Escalate { message: String },
}

/// Resource consumption of one reasoning call
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ReasoningUsage {
    pub tokens: u64,
    pub cost_usd: f64,
    #[serde(with = "duration_millis")]
    pub duration: Duration,
}

/// One decision produced by the reasoning component
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// Natural-language reasoning behind the action
    pub reasoning: String,

    pub action: DecisionAction,

    #[serde(default)]
    pub usage: ReasoningUsage,
}

impl Decision {
    /// Convenience constructor for a tool-call decision
    pub fn tool_call(
        reasoning: impl Into<String>,
        tool: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: DecisionAction::ToolCall {
                tool: tool.into(),
                input,
            },
            usage: ReasoningUsage::default(),
        }
    }

    /// Convenience constructor for a finish decision
    pub fn finish(reasoning: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: DecisionAction::Finish {
                summary: summary.into(),
            },
            usage: ReasoningUsage::default(),
        }
    }

    /// Convenience constructor for an escalation decision
    pub fn escalate(reasoning: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            reasoning: reasoning.into(),
            action: DecisionAction::Escalate {
                message: message.into(),
            },
            usage: ReasoningUsage::default(),
        }
    }

    /// Attach usage metadata
    pub fn with_usage(mut self, tokens: u64, cost_usd: f64) -> Self {
        self.usage.tokens = tokens;
        self.usage.cost_usd = cost_usd;
        self
    }
}

/// Everything the reasoning component sees for one iteration
#[derive(Debug, Clone)]
pub struct ReasoningRequest {
    /// Fixed system instructions
    pub system_prompt: String,

    /// Goal text of the execution
    pub goal: String,

    /// Running natural-language summary of current state
    pub state_summary: String,

    /// Retrieved lessons
    pub memories: Vec<Memory>,

    /// Full step history so far
    pub history: Vec<ExecutionStep>,

    /// 1-based iteration counter
    pub iteration: u32,
}

/// The reasoning component: given goal, state, history and memories,
/// produce one decision
#[async_trait]
pub trait ReasoningService: Send + Sync {
    async fn decide(&self, request: &ReasoningRequest) -> Result<Decision>;
}

// ============================================================================
// ScriptedReasoner - deterministic double for tests and examples
// ============================================================================

enum ScriptEntry {
    Decide(Decision),
    Fail(String),
}

/// Reasoning double that replays a fixed script of decisions
///
/// Each call pops the next entry; an exhausted script is a reasoning
/// error, which exercises the loop's fallback path.
#[derive(Default)]
pub struct ScriptedReasoner {
    script: Mutex<VecDeque<ScriptEntry>>,
}

impl ScriptedReasoner {
    pub fn new(decisions: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(decisions.into_iter().map(ScriptEntry::Decide).collect()),
        }
    }

    /// Append a decision to the script
    pub fn then(self, decision: Decision) -> Self {
        self.script.lock().push_back(ScriptEntry::Decide(decision));
        self
    }

    /// Append a failing call to the script
    pub fn then_error(self, message: impl Into<String>) -> Self {
        self.script.lock().push_back(ScriptEntry::Fail(message.into()));
        self
    }
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn decide(&self, _request: &ReasoningRequest) -> Result<Decision> {
        match self.script.lock().pop_front() {
            Some(ScriptEntry::Decide(decision)) => Ok(decision),
            Some(ScriptEntry::Fail(message)) => Err(AgentRunError::reasoning(message)),
            None => Err(AgentRunError::reasoning("script exhausted")),
        }
    }
}

/// Serde support for Duration (as milliseconds)
mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> ReasoningRequest {
        ReasoningRequest {
            system_prompt: String::new(),
            goal: "test".to_string(),
            state_summary: String::new(),
            memories: vec![],
            history: vec![],
            iteration: 1,
        }
    }

    #[test]
    fn test_decision_action_serialization() {
        let action = DecisionAction::ToolCall {
            tool: "load_rows".to_string(),
            input: json!({"source": "bank"}),
        };

        let text = serde_json::to_string(&action).unwrap();
        assert!(text.contains("\"type\":\"tool_call\""));

        let parsed: DecisionAction = serde_json::from_str(&text).unwrap();
        assert_eq!(action, parsed);
    }

    #[tokio::test]
    async fn test_scripted_reasoner_replays_in_order() {
        let reasoner = ScriptedReasoner::new(vec![
            Decision::tool_call("load first", "load_rows", json!({})),
            Decision::finish("done", "all rows matched"),
        ]);

        let first = reasoner.decide(&request()).await.unwrap();
        assert!(matches!(first.action, DecisionAction::ToolCall { .. }));

        let second = reasoner.decide(&request()).await.unwrap();
        assert!(matches!(second.action, DecisionAction::Finish { .. }));
    }

    #[tokio::test]
    async fn test_scripted_reasoner_error_entry() {
        let reasoner = ScriptedReasoner::default().then_error("provider unavailable");
        let result = reasoner.decide(&request()).await;
        assert!(matches!(result, Err(AgentRunError::Reasoning(_))));
    }

    #[tokio::test]
    async fn test_exhausted_script_errors() {
        let reasoner = ScriptedReasoner::default();
        assert!(reasoner.decide(&request()).await.is_err());
    }
}
