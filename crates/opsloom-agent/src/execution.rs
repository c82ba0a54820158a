//! Agent execution entities
//!
//! An [`AgentExecution`] records one invocation of the reasoning loop:
//! the goal, every iteration's [`ExecutionStep`], aggregate usage, and a
//! single terminal outcome. Executions are created at start, appended to
//! per iteration, and finalized exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Terminal and non-terminal states of an agent execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Execution is iterating
    Running,

    /// Loop finished with a usable result
    Completed,

    /// Loop escalated to a human reviewer
    NeedsReview,

    /// Execution was cancelled externally
    Cancelled,

    /// Loop (and possibly the fallback) failed
    Failed,
}

impl ExecutionStatus {
    /// Whether this status is terminal
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::NeedsReview => write!(f, "needs_review"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What triggered an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Started directly by a user
    Manual,

    /// Delegated from a workflow step
    Workflow,

    /// Started by a schedule
    Schedule,
}

/// Outcome of a single loop iteration's tool call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// One iteration of the reasoning loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    /// 1-based iteration counter
    pub iteration: u32,

    /// Reasoning text produced by the decision
    pub reasoning: String,

    /// Short action label ("tool_call", "finish", "escalate")
    pub action: String,

    /// Tool invoked this iteration, if any
    pub tool_name: Option<String>,

    /// Input passed to the tool
    pub tool_input: Option<serde_json::Value>,

    /// Output returned by the tool
    pub tool_output: Option<serde_json::Value>,

    /// Whether the iteration's tool call succeeded
    pub status: StepStatus,

    /// Tokens consumed by this iteration
    pub tokens_used: u64,

    /// Dollar cost of this iteration
    pub cost_usd: f64,

    /// Wall-clock duration of this iteration in milliseconds
    pub duration_ms: u64,

    /// When the iteration finished
    pub completed_at: DateTime<Utc>,
}

/// Aggregate resource usage across an execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub tokens: u64,
    pub cost_usd: f64,
    pub elapsed_ms: u64,
}

/// Whether the deterministic fallback produced the final result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FallbackInfo {
    /// True when the fallback computation produced the outcome
    pub used: bool,

    /// Why the fallback ran (or why it could not)
    pub reason: Option<String>,
}

impl FallbackInfo {
    /// Fallback ran and produced the outcome
    pub fn used(reason: impl Into<String>) -> Self {
        Self {
            used: true,
            reason: Some(reason.into()),
        }
    }

    /// Fallback was attempted but could not produce a result
    pub fn unusable(reason: impl Into<String>) -> Self {
        Self {
            used: false,
            reason: Some(reason.into()),
        }
    }
}

/// A proposed resolution produced by a tool call during reasoning
///
/// Recommendations are collected into the execution's outcome and never
/// mutated after creation; human feedback on them is captured elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub id: Uuid,

    /// Kind of resolution proposed ("match", "adjustment", ...)
    pub kind: String,

    /// Human-readable summary of the proposal
    pub summary: String,

    /// Structured payload backing the proposal
    pub payload: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl AgentRecommendation {
    pub fn new(kind: impl Into<String>, summary: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind: kind.into(),
            summary: summary.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Terminal outcome of an execution
///
/// The summary is always present regardless of success, fallback, or
/// failure. Numeric fields are populated only when the loop or the
/// fallback had usable input data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// Human-readable result summary (never empty)
    pub summary: String,

    /// Matched rows, when the task computed matches
    pub matched_count: Option<u64>,

    /// Match percentage (0-100), when a total row count was available
    pub match_rate: Option<u32>,

    /// Resolutions proposed during the run
    #[serde(default)]
    pub recommendations: Vec<AgentRecommendation>,
}

impl ExecutionOutcome {
    /// Create an outcome carrying only a summary
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            summary: text.into(),
            matched_count: None,
            match_rate: None,
            recommendations: vec![],
        }
    }

    /// Attach recommendations
    pub fn with_recommendations(mut self, recommendations: Vec<AgentRecommendation>) -> Self {
        self.recommendations = recommendations;
        self
    }
}

/// One invocation of the reasoning loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentExecution {
    pub id: Uuid,

    /// Agent definition this execution ran under
    pub agent_id: Uuid,

    pub organization_id: Uuid,

    pub trigger: TriggerType,

    /// Goal text the loop pursued
    pub goal: String,

    /// Ordered iteration history
    pub steps: Vec<ExecutionStep>,

    pub status: ExecutionStatus,

    /// Present once the execution is finalized
    pub outcome: Option<ExecutionOutcome>,

    pub fallback: FallbackInfo,

    pub usage: UsageTotals,

    pub started_at: DateTime<Utc>,

    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentExecution {
    /// Create a new running execution
    pub fn new(
        agent_id: Uuid,
        organization_id: Uuid,
        trigger: TriggerType,
        goal: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            agent_id,
            organization_id,
            trigger,
            goal: goal.into(),
            steps: vec![],
            status: ExecutionStatus::Running,
            outcome: None,
            fallback: FallbackInfo::default(),
            usage: UsageTotals::default(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Summary string of the terminal outcome, if finalized
    pub fn outcome_summary(&self) -> Option<&str> {
        self.outcome.as_ref().map(|o| o.summary.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionStatus::NeedsReview.to_string(), "needs_review");
        assert_eq!(ExecutionStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_terminal() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ExecutionStatus::NeedsReview).unwrap();
        assert_eq!(json, "\"needs_review\"");
    }

    #[test]
    fn test_new_execution_is_running() {
        let exec = AgentExecution::new(
            Uuid::now_v7(),
            Uuid::now_v7(),
            TriggerType::Manual,
            "reconcile the ledgers",
        );

        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.outcome.is_none());
        assert!(exec.steps.is_empty());
        assert!(!exec.fallback.used);
    }
}
