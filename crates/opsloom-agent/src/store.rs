//! Execution persistence contract
//!
//! The loop checkpoints every iteration through this trait before it
//! advances. Finalization is first-write-wins: an execution already in a
//! terminal status keeps that status, so a racing or retried finalize is
//! a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{AgentRunError, Result};
use crate::execution::{
    AgentExecution, ExecutionOutcome, ExecutionStep, ExecutionStatus, FallbackInfo, UsageTotals,
};

/// Store for agent executions
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Persist a newly created execution
    async fn create_execution(&self, execution: &AgentExecution) -> Result<()>;

    /// Append one iteration's checkpoint
    async fn append_step(&self, execution_id: Uuid, step: &ExecutionStep) -> Result<()>;

    /// Write the terminal state; the first terminal write wins
    async fn finalize_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
        fallback: FallbackInfo,
        usage: UsageTotals,
    ) -> Result<()>;

    /// Load an execution by id
    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<AgentExecution>>;

    /// Persist aggregate metrics after finalization
    ///
    /// Callers swallow errors from this method; it must never retroactively
    /// fail a finished execution.
    async fn record_metrics(&self, execution_id: Uuid, usage: UsageTotals) -> Result<()> {
        let _ = (execution_id, usage);
        Ok(())
    }
}

/// In-memory execution store for examples and testing
#[derive(Debug, Default, Clone)]
pub struct InMemoryExecutionStore {
    executions: Arc<RwLock<HashMap<Uuid, AgentExecution>>>,
}

impl InMemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored executions
    pub fn execution_count(&self) -> usize {
        self.executions.read().len()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn create_execution(&self, execution: &AgentExecution) -> Result<()> {
        self.executions
            .write()
            .insert(execution.id, execution.clone());
        Ok(())
    }

    async fn append_step(&self, execution_id: Uuid, step: &ExecutionStep) -> Result<()> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| AgentRunError::store(format!("execution not found: {execution_id}")))?;

        execution.steps.push(step.clone());
        Ok(())
    }

    async fn finalize_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        outcome: ExecutionOutcome,
        fallback: FallbackInfo,
        usage: UsageTotals,
    ) -> Result<()> {
        let mut executions = self.executions.write();
        let execution = executions
            .get_mut(&execution_id)
            .ok_or_else(|| AgentRunError::store(format!("execution not found: {execution_id}")))?;

        if execution.status.is_terminal() {
            return Ok(());
        }

        execution.status = status;
        execution.outcome = Some(outcome);
        execution.fallback = fallback;
        execution.usage = usage;
        execution.finished_at = Some(Utc::now());
        Ok(())
    }

    async fn get_execution(&self, execution_id: Uuid) -> Result<Option<AgentExecution>> {
        Ok(self.executions.read().get(&execution_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::TriggerType;

    fn new_execution() -> AgentExecution {
        AgentExecution::new(Uuid::now_v7(), Uuid::now_v7(), TriggerType::Manual, "goal")
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryExecutionStore::new();
        let exec = new_execution();
        store.create_execution(&exec).await.unwrap();

        let loaded = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, exec.id);
        assert_eq!(loaded.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn test_finalize_first_write_wins() {
        let store = InMemoryExecutionStore::new();
        let exec = new_execution();
        store.create_execution(&exec).await.unwrap();

        store
            .finalize_execution(
                exec.id,
                ExecutionStatus::Completed,
                ExecutionOutcome::summary("matched everything"),
                FallbackInfo::default(),
                UsageTotals::default(),
            )
            .await
            .unwrap();

        // A second finalize must not overwrite the terminal state
        store
            .finalize_execution(
                exec.id,
                ExecutionStatus::Failed,
                ExecutionOutcome::summary("late failure"),
                FallbackInfo::default(),
                UsageTotals::default(),
            )
            .await
            .unwrap();

        let loaded = store.get_execution(exec.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Completed);
        assert_eq!(loaded.outcome_summary(), Some("matched everything"));
    }

    #[tokio::test]
    async fn test_append_step_to_missing_execution() {
        let store = InMemoryExecutionStore::new();
        let step = ExecutionStep {
            iteration: 1,
            reasoning: String::new(),
            action: "tool_call".to_string(),
            tool_name: None,
            tool_input: None,
            tool_output: None,
            status: crate::execution::StepStatus::Succeeded,
            tokens_used: 0,
            cost_usd: 0.0,
            duration_ms: 0,
            completed_at: Utc::now(),
        };

        let result = store.append_step(Uuid::now_v7(), &step).await;
        assert!(matches!(result, Err(AgentRunError::Store(_))));
    }
}
