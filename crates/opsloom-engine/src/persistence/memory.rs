//! In-memory store for tests and embedded use

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::{RunStore, StepWrite, StoreError};
use crate::workflow::{
    RunStatus, StepResult, WaitingApproval, WorkflowDefinition, WorkflowRun,
};

/// In-memory implementation of [`RunStore`]
///
/// All state is behind [`parking_lot::RwLock`] so the store is cheap to
/// clone across tasks via `Arc`. Not durable; intended for tests.
#[derive(Default)]
pub struct InMemoryRunStore {
    definitions: RwLock<HashMap<Uuid, WorkflowDefinition>>,
    runs: RwLock<HashMap<Uuid, WorkflowRun>>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored runs (test helper)
    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    /// Id of a run currently suspended on approval (test helper)
    pub fn waiting_run_id(&self) -> Option<Uuid> {
        self.runs
            .read()
            .values()
            .find(|r| r.status == RunStatus::WaitingApproval)
            .map(|r| r.id)
    }

    fn update_run<F, T>(&self, run_id: Uuid, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut WorkflowRun) -> T,
    {
        let mut runs = self.runs.write();
        let run = runs
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        let out = f(run);
        run.updated_at = Utc::now();
        Ok(out)
    }

    fn set_terminal(&self, run_id: Uuid, status: RunStatus, reason: Option<&str>) -> Result<(), StoreError> {
        self.update_run(run_id, |run| {
            // First terminal write wins
            if run.status.is_terminal() {
                return;
            }
            run.status = status;
            run.waiting = None;
            run.reason = reason.map(str::to_string);
        })
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn put_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        self.definitions
            .write()
            .insert(definition.id, definition.clone());
        Ok(())
    }

    async fn load_definition(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        self.definitions
            .read()
            .get(&id)
            .cloned()
            .ok_or(StoreError::DefinitionNotFound(id))
    }

    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        let mut runs = self.runs.write();
        runs.entry(run.id).or_insert_with(|| run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError> {
        self.runs
            .read()
            .get(&run_id)
            .cloned()
            .ok_or(StoreError::RunNotFound(run_id))
    }

    async fn mark_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update_run(run_id, |run| {
            if !run.status.is_terminal() {
                run.status = RunStatus::Running;
            }
        })
    }

    async fn record_step_result(
        &self,
        run_id: Uuid,
        result: &StepResult,
    ) -> Result<StepWrite, StoreError> {
        self.update_run(run_id, |run| {
            if let Some(existing) = run.result_for(&result.step_id) {
                return StepWrite::AlreadyRecorded(existing.clone());
            }
            run.step_results.push(result.clone());
            StepWrite::Recorded
        })
    }

    async fn set_waiting_approval(
        &self,
        run_id: Uuid,
        waiting: &WaitingApproval,
    ) -> Result<(), StoreError> {
        self.update_run(run_id, |run| {
            if !run.status.is_terminal() {
                run.status = RunStatus::WaitingApproval;
                run.waiting = Some(waiting.clone());
            }
        })
    }

    async fn resume_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update_run(run_id, |run| {
            if !run.status.is_terminal() {
                run.status = RunStatus::Running;
                run.waiting = None;
            }
        })
    }

    async fn complete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.set_terminal(run_id, RunStatus::Completed, None)
    }

    async fn fail_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.set_terminal(run_id, RunStatus::Failed, Some(reason))
    }

    async fn cancel_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.set_terminal(run_id, RunStatus::Cancelled, Some(reason))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn new_run(store: &InMemoryRunStore) -> WorkflowRun {
        let run = WorkflowRun::new(Uuid::now_v7(), Uuid::now_v7(), json!({}));
        store.create_run(&run).await.unwrap();
        run
    }

    #[tokio::test]
    async fn test_create_run_is_idempotent() {
        let store = InMemoryRunStore::new();
        let run = WorkflowRun::new(Uuid::now_v7(), Uuid::now_v7(), json!({"n": 1}));
        store.create_run(&run).await.unwrap();

        let mut replay = run.clone();
        replay.trigger = json!({"n": 2});
        store.create_run(&replay).await.unwrap();

        let loaded = store.load_run(run.id).await.unwrap();
        assert_eq!(loaded.trigger, json!({"n": 1}));
        assert_eq!(store.run_count(), 1);
    }

    #[tokio::test]
    async fn test_step_result_is_written_at_most_once() {
        let store = InMemoryRunStore::new();
        let run = new_run(&store).await;

        let first = StepResult::success("a", "action", Some(json!({"v": 1})));
        assert!(matches!(
            store.record_step_result(run.id, &first).await.unwrap(),
            StepWrite::Recorded
        ));

        let second = StepResult::success("a", "action", Some(json!({"v": 2})));
        match store.record_step_result(run.id, &second).await.unwrap() {
            StepWrite::AlreadyRecorded(kept) => {
                assert_eq!(kept.data, Some(json!({"v": 1})));
            }
            StepWrite::Recorded => panic!("second write must not be recorded"),
        }

        let loaded = store.load_run(run.id).await.unwrap();
        assert_eq!(loaded.step_results.len(), 1);
    }

    #[tokio::test]
    async fn test_terminal_status_is_first_write_wins() {
        let store = InMemoryRunStore::new();
        let run = new_run(&store).await;

        store.complete_run(run.id).await.unwrap();
        store.fail_run(run.id, "late failure").await.unwrap();

        let loaded = store.load_run(run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Completed);
        assert!(loaded.reason.is_none());
    }

    #[tokio::test]
    async fn test_waiting_marker_roundtrip() {
        let store = InMemoryRunStore::new();
        let run = new_run(&store).await;

        let waiting = WaitingApproval {
            step_id: "gate".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(72),
        };
        store.set_waiting_approval(run.id, &waiting).await.unwrap();

        let loaded = store.load_run(run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::WaitingApproval);
        assert_eq!(loaded.waiting.as_ref().unwrap().step_id, "gate");

        store.resume_run(run.id).await.unwrap();
        let loaded = store.load_run(run.id).await.unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert!(loaded.waiting.is_none());
    }

    #[tokio::test]
    async fn test_missing_run_errors() {
        let store = InMemoryRunStore::new();
        let ghost = Uuid::now_v7();

        assert!(matches!(
            store.load_run(ghost).await,
            Err(StoreError::RunNotFound(_))
        ));
        assert!(matches!(
            store.load_definition(ghost).await,
            Err(StoreError::DefinitionNotFound(_))
        ));
    }
}
