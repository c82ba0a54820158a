//! Run records and step results
//!
//! A [`WorkflowRun`] is the durable record of one execution of a
//! definition. Its `step_results` list is append-only and keyed by step
//! id; a result, once written, is never replaced. Resume logic relies on
//! this: any step with a persisted result is skipped on replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle states of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet started
    Pending,

    /// Actively executing steps
    Running,

    /// Suspended on a human-approval step
    WaitingApproval,

    /// All steps executed, or skipped per policy
    Completed,

    /// A step failed with `on_error: fail`
    Failed,

    /// Cancelled by approval rejection or timeout
    Cancelled,
}

impl RunStatus {
    /// Terminal states admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// How a single step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Success,
    Failed,
}

/// The persisted result of one executed step
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepResult {
    pub step_id: String,

    /// Type label of the step that produced this result
    pub step_type: String,

    pub outcome: StepOutcome,

    /// Handler output; condition steps store the evaluated boolean here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(step_id: impl Into<String>, step_type: &str, data: Option<Value>) -> Self {
        Self {
            step_id: step_id.into(),
            step_type: step_type.to_string(),
            outcome: StepOutcome::Success,
            data,
            error: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failed(step_id: impl Into<String>, step_type: &str, error: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            step_type: step_type.to_string(),
            outcome: StepOutcome::Failed,
            data: None,
            error: Some(error.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == StepOutcome::Success
    }
}

/// Marker persisted while a run is suspended on an approval step
///
/// The expiry is absolute so a resumed process can compute the remaining
/// wait instead of restarting the full timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingApproval {
    pub step_id: String,
    pub expires_at: DateTime<Utc>,
}

/// One execution of a workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,

    pub definition_id: Uuid,

    pub organization_id: Uuid,

    pub status: RunStatus,

    /// Trigger context the run was started with; read by conditions and
    /// passed to action handlers
    pub trigger: Value,

    /// Append-only, in execution order
    pub step_results: Vec<StepResult>,

    /// Present only while status is `WaitingApproval`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<WaitingApproval>,

    /// Human-readable cause for failed or cancelled runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(definition_id: Uuid, organization_id: Uuid, trigger: Value) -> Self {
        Self::with_id(Uuid::now_v7(), definition_id, organization_id, trigger)
    }

    /// Construct a run under a caller-supplied id
    ///
    /// Triggers carry the run id, so a re-delivered trigger names the
    /// same run and the idempotent create turns the retry into a resume.
    pub fn with_id(
        id: Uuid,
        definition_id: Uuid,
        organization_id: Uuid,
        trigger: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            definition_id,
            organization_id,
            status: RunStatus::Pending,
            trigger,
            step_results: Vec::new(),
            waiting: None,
            reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The persisted result for a step, if the step has already run
    pub fn result_for(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}
