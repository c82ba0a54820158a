//! # Workflow Execution Engine
//!
//! A checkpoint-per-step runner for directed workflow graphs with human
//! approval gates and agent delegation.
//!
//! ## Features
//!
//! - **Checkpoint before advance**: every step result is persisted before the
//!   runner moves on, so a crashed run resumes from the last persisted step
//! - **At-most-once step effects**: step results are keyed by (run, step) and
//!   never overwritten; replays detect persisted results and skip re-execution
//! - **Approval suspension**: human-approval steps persist a waiting marker and
//!   resolve by external signal or timeout, never by polling
//! - **Agent delegation**: `agent_run` steps hand off to the bounded reasoning
//!   loop and map its terminal status back onto the step
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      WorkflowRunner                          │
//! │  (walks the step graph, suspends on approvals, checkpoints) │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                       │
//!          ▼                    ▼                       ▼
//! ┌──────────────────┐ ┌──────────────────┐ ┌─────────────────────┐
//! │    navigation    │ │  ActionRegistry  │ │    AgentDelegate    │
//! │ (pure next-step) │ │ (named handlers) │ │  (reasoning loop)   │
//! └──────────────────┘ └──────────────────┘ └─────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         RunStore                             │
//! │     (Postgres / in-memory: runs, step results, markers)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod engine;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod runner;
pub mod workflow;

/// Prelude for common imports
pub mod prelude {
    pub use crate::actions::{ActionContext, ActionHandler, ActionOutcome, ActionRegistry};
    pub use crate::engine::next_step;
    pub use crate::error::EngineError;
    pub use crate::notify::{LogNotifier, Notifier};
    pub use crate::persistence::{InMemoryRunStore, PostgresRunStore, RunStore, StepWrite, StoreError};
    pub use crate::runner::{
        AgentDelegate, ApprovalGate, DelegatedRun, RunnerConfig, WorkflowRunner,
    };
    pub use crate::workflow::{
        ApprovalDecision, ApprovalSignal, Condition, ConditionOperator, ErrorPolicy, RunStatus,
        StepKind, StepOutcome, StepResult, WorkflowDefinition, WorkflowRun, WorkflowStep,
    };
}

// Re-export key types at crate root
pub use actions::{ActionContext, ActionHandler, ActionOutcome, ActionRegistry};
pub use engine::next_step;
pub use error::EngineError;
pub use notify::{LogNotifier, Notifier};
pub use persistence::{InMemoryRunStore, PostgresRunStore, RunStore, StepWrite, StoreError};
pub use runner::{AgentDelegate, ApprovalGate, DelegatedRun, RunnerConfig, WorkflowRunner};
pub use workflow::{
    ApprovalDecision, ApprovalSignal, Condition, ConditionOperator, ErrorPolicy, RunStatus,
    StepKind, StepOutcome, StepResult, WorkflowDefinition, WorkflowRun, WorkflowStep,
};
