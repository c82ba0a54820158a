//! Workflow graph types: definitions, steps, conditions, results, signals

mod condition;
mod definition;
mod result;
mod signal;

pub use condition::{Condition, ConditionOperator};
pub use definition::{ErrorPolicy, StepKind, WorkflowDefinition, WorkflowStep};
pub use result::{RunStatus, StepOutcome, StepResult, WaitingApproval, WorkflowRun};
pub use signal::{ApprovalDecision, ApprovalSignal};
