//! Workflow definitions and steps
//!
//! A [`WorkflowDefinition`] is an immutable graph of [`WorkflowStep`]s.
//! Step behavior is a closed tagged variant ([`StepKind`]) dispatched
//! exhaustively by the runner; an unrecognized type deserializes into
//! `StepKind::Unknown` and always fails at dispatch rather than being
//! probed dynamically.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::Condition;

/// What to do when a step fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Fail the run immediately with the step's error (default)
    #[default]
    Fail,

    /// Record the failure and advance as if the step had not failed
    /// destructively
    Skip,
}

/// Type-specific step behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Call a named action handler with declared parameters
    Action {
        action_type: String,

        #[serde(default)]
        params: serde_json::Value,

        /// Explicit successor; declaration order is used when absent
        #[serde(default)]
        next: Option<String>,
    },

    /// Evaluate a predicate and branch
    Condition {
        condition: Condition,

        /// Successor when the predicate holds; end of graph when absent
        #[serde(default)]
        on_true: Option<String>,

        /// Successor when the predicate does not hold
        #[serde(default)]
        on_false: Option<String>,
    },

    /// Suspend until an external approval signal or timeout
    HumanApproval {
        #[serde(default)]
        recipients: Vec<String>,

        /// Per-step override of the approval timeout
        #[serde(default, with = "option_duration_serde")]
        timeout: Option<Duration>,

        #[serde(default)]
        next: Option<String>,
    },

    /// Delegate to the agent reasoning loop
    AgentRun {
        agent_id: Uuid,

        /// Goal text for the execution; the step label is used when absent
        #[serde(default)]
        goal: Option<String>,

        #[serde(default)]
        next: Option<String>,
    },

    /// Unrecognized step type; always fails at dispatch
    #[serde(other)]
    Unknown,
}

impl StepKind {
    /// Stable label for persistence and logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Action { .. } => "action",
            Self::Condition { .. } => "condition",
            Self::HumanApproval { .. } => "human_approval",
            Self::AgentRun { .. } => "agent_run",
            Self::Unknown => "unknown",
        }
    }

    /// Explicit successor declared on this step, if any
    pub fn declared_next(&self) -> Option<&str> {
        match self {
            Self::Action { next, .. }
            | Self::HumanApproval { next, .. }
            | Self::AgentRun { next, .. } => next.as_deref(),
            Self::Condition { .. } | Self::Unknown => None,
        }
    }
}

/// One node in a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    /// Unique within the definition
    pub id: String,

    pub label: String,

    #[serde(default)]
    pub on_error: ErrorPolicy,

    #[serde(flatten)]
    pub kind: StepKind,
}

impl WorkflowStep {
    /// Create an action step
    pub fn action(
        id: impl Into<String>,
        action_type: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            on_error: ErrorPolicy::default(),
            kind: StepKind::Action {
                action_type: action_type.into(),
                params,
                next: None,
            },
        }
    }

    /// Create a condition step with its branch targets
    pub fn condition(
        id: impl Into<String>,
        condition: Condition,
        on_true: Option<&str>,
        on_false: Option<&str>,
    ) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            on_error: ErrorPolicy::default(),
            kind: StepKind::Condition {
                condition,
                on_true: on_true.map(str::to_string),
                on_false: on_false.map(str::to_string),
            },
        }
    }

    /// Create a human-approval step
    pub fn approval(id: impl Into<String>, recipients: Vec<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            on_error: ErrorPolicy::default(),
            kind: StepKind::HumanApproval {
                recipients,
                timeout: None,
                next: None,
            },
        }
    }

    /// Create an agent-delegation step
    pub fn agent(id: impl Into<String>, agent_id: Uuid, goal: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            on_error: ErrorPolicy::default(),
            kind: StepKind::AgentRun {
                agent_id,
                goal: Some(goal.into()),
                next: None,
            },
        }
    }

    /// Set the error policy
    pub fn with_on_error(mut self, policy: ErrorPolicy) -> Self {
        self.on_error = policy;
        self
    }

    /// Set the approval timeout (human-approval steps only)
    pub fn with_timeout(mut self, duration: Duration) -> Self {
        if let StepKind::HumanApproval { timeout, .. } = &mut self.kind {
            *timeout = Some(duration);
        }
        self
    }

    /// Set the explicit successor
    pub fn with_next(mut self, next_id: impl Into<String>) -> Self {
        match &mut self.kind {
            StepKind::Action { next, .. }
            | StepKind::HumanApproval { next, .. }
            | StepKind::AgentRun { next, .. } => *next = Some(next_id.into()),
            StepKind::Condition { .. } | StepKind::Unknown => {}
        }
        self
    }
}

/// An immutable workflow graph owned by the automation rule that created it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            steps,
        }
    }

    /// The graph's entry step
    pub fn entry_step(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    /// Look up a step by id
    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Index of a step within declaration order
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }
}

/// Serde support for Option<Duration> (as milliseconds)
mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => d.as_millis().serialize(serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis: Option<u64> = Option::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
