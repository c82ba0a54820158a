//! Store trait and error types

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::workflow::{StepResult, WaitingApproval, WorkflowDefinition, WorkflowRun};

/// Errors from store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Run not found
    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    /// Workflow definition not found
    #[error("definition not found: {0}")]
    DefinitionNotFound(Uuid),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of a step-result write
///
/// Step results are keyed by (run, step). The first write for a key is
/// recorded; every later write for the same key returns the persisted
/// result untouched, which is how replays detect already-executed steps.
#[derive(Debug, Clone)]
pub enum StepWrite {
    /// This call persisted the result
    Recorded,

    /// A result for this (run, step) already existed; it is returned
    /// unchanged and the new value was discarded
    AlreadyRecorded(StepResult),
}

/// Persistence operations required by the runner
///
/// Every mutation here is idempotent. Terminal status writes are
/// first-write-wins: once a run is completed, failed, or cancelled, all
/// further status writes are no-ops. This lets the runner retry any
/// write after a crash without corrupting the record.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Store a workflow definition
    async fn put_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError>;

    /// Load a workflow definition
    async fn load_definition(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError>;

    /// Persist a new run record; replaying the same run id is a no-op
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError>;

    /// Load a run with its step results
    async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError>;

    /// Transition a non-terminal run to running
    async fn mark_running(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Record a step result, at most once per (run, step)
    async fn record_step_result(
        &self,
        run_id: Uuid,
        result: &StepResult,
    ) -> Result<StepWrite, StoreError>;

    /// Suspend the run on an approval step
    async fn set_waiting_approval(
        &self,
        run_id: Uuid,
        waiting: &WaitingApproval,
    ) -> Result<(), StoreError>;

    /// Clear the waiting marker and return the run to running
    async fn resume_run(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Mark the run completed
    async fn complete_run(&self, run_id: Uuid) -> Result<(), StoreError>;

    /// Mark the run failed with a cause
    async fn fail_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError>;

    /// Mark the run cancelled with a cause
    async fn cancel_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError>;
}
