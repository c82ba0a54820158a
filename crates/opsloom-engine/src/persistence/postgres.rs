//! PostgreSQL implementation of RunStore
//!
//! Idempotency is enforced by the schema: runs insert with
//! `ON CONFLICT DO NOTHING`, step results are keyed by (run_id, step_id),
//! and terminal status updates are guarded by the current status so the
//! first terminal write wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};
use uuid::Uuid;

use super::store::{RunStore, StepWrite, StoreError};
use crate::workflow::{
    RunStatus, StepOutcome, StepResult, WaitingApproval, WorkflowDefinition, WorkflowRun,
};

const TERMINAL_STATUSES: &str = "('completed', 'failed', 'cancelled')";

/// PostgreSQL implementation of [`RunStore`]
///
/// Uses a connection pool; safe to clone and share across workers.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new store with the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the engine's schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn run_exists(&self, run_id: Uuid) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM workflow_runs WHERE id = $1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        Ok(row.is_some())
    }

    /// Status updates guarded against terminal states. A zero-row update
    /// against an existing run means the run is already terminal, which
    /// is a no-op by contract.
    async fn update_status(
        &self,
        run_id: Uuid,
        status: RunStatus,
        reason: Option<&str>,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(&format!(
            r#"
            UPDATE workflow_runs
            SET status = $2,
                reason = COALESCE($3, reason),
                waiting_step_id = NULL,
                waiting_expires_at = NULL,
                updated_at = now()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#,
        ))
        .bind(run_id)
        .bind(status.to_string())
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update run status: {}", e);
            StoreError::Database(e.to_string())
        })?
        .rows_affected();

        if updated == 0 && !self.run_exists(run_id).await? {
            return Err(StoreError::RunNotFound(run_id));
        }

        debug!(%run_id, %status, "updated run status");
        Ok(())
    }

    async fn load_step_results(&self, run_id: Uuid) -> Result<Vec<StepResult>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT step_id, step_type, outcome, data, error, completed_at
            FROM workflow_step_results
            WHERE run_id = $1
            ORDER BY ordinal
            "#,
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        rows.into_iter().map(|row| row_to_step_result(&row)).collect()
    }
}

#[async_trait]
impl RunStore for PostgresRunStore {
    #[instrument(skip(self, definition))]
    async fn put_definition(&self, definition: &WorkflowDefinition) -> Result<(), StoreError> {
        let steps = serde_json::to_value(&definition.steps)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_definitions (id, name, steps)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET name = $2, steps = $3
            "#,
        )
        .bind(definition.id)
        .bind(&definition.name)
        .bind(&steps)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to store definition: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_definition(&self, id: Uuid) -> Result<WorkflowDefinition, StoreError> {
        let row = sqlx::query("SELECT id, name, steps FROM workflow_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?
            .ok_or(StoreError::DefinitionNotFound(id))?;

        let steps: serde_json::Value = row.get("steps");
        Ok(WorkflowDefinition {
            id: row.get("id"),
            name: row.get("name"),
            steps: serde_json::from_value(steps)
                .map_err(|e| StoreError::Serialization(e.to_string()))?,
        })
    }

    #[instrument(skip(self, run), fields(run_id = %run.id))]
    async fn create_run(&self, run: &WorkflowRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, definition_id, organization_id, status, trigger, reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(run.definition_id)
        .bind(run.organization_id)
        .bind(run.status.to_string())
        .bind(&run.trigger)
        .bind(&run.reason)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create run: {}", e);
            StoreError::Database(e.to_string())
        })?;

        debug!(run_id = %run.id, "created run");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn load_run(&self, run_id: Uuid) -> Result<WorkflowRun, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, definition_id, organization_id, status, trigger,
                   waiting_step_id, waiting_expires_at, reason, created_at, updated_at
            FROM workflow_runs
            WHERE id = $1
            "#,
        )
        .bind(run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .ok_or(StoreError::RunNotFound(run_id))?;

        let status: String = row.get("status");
        let waiting_step_id: Option<String> = row.get("waiting_step_id");
        let waiting_expires_at: Option<DateTime<Utc>> = row.get("waiting_expires_at");
        let waiting = match (waiting_step_id, waiting_expires_at) {
            (Some(step_id), Some(expires_at)) => Some(WaitingApproval { step_id, expires_at }),
            _ => None,
        };

        Ok(WorkflowRun {
            id: row.get("id"),
            definition_id: row.get("definition_id"),
            organization_id: row.get("organization_id"),
            status: parse_run_status(&status)?,
            trigger: row.get("trigger"),
            step_results: self.load_step_results(run_id).await?,
            waiting,
            reason: row.get("reason"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }

    #[instrument(skip(self))]
    async fn mark_running(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update_status(run_id, RunStatus::Running, None).await
    }

    #[instrument(skip(self, result), fields(step_id = %result.step_id))]
    async fn record_step_result(
        &self,
        run_id: Uuid,
        result: &StepResult,
    ) -> Result<StepWrite, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO workflow_step_results
                (run_id, step_id, step_type, outcome, data, error, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (run_id, step_id) DO NOTHING
            "#,
        )
        .bind(run_id)
        .bind(&result.step_id)
        .bind(&result.step_type)
        .bind(outcome_name(result.outcome))
        .bind(&result.data)
        .bind(&result.error)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to record step result: {}", e);
            StoreError::Database(e.to_string())
        })?
        .rows_affected();

        if inserted > 0 {
            debug!(%run_id, step_id = %result.step_id, "recorded step result");
            return Ok(StepWrite::Recorded);
        }

        // Conflict: return the result that won
        let row = sqlx::query(
            r#"
            SELECT step_id, step_type, outcome, data, error, completed_at
            FROM workflow_step_results
            WHERE run_id = $1 AND step_id = $2
            "#,
        )
        .bind(run_id)
        .bind(&result.step_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(StepWrite::AlreadyRecorded(row_to_step_result(&row)?))
    }

    #[instrument(skip(self, waiting), fields(step_id = %waiting.step_id))]
    async fn set_waiting_approval(
        &self,
        run_id: Uuid,
        waiting: &WaitingApproval,
    ) -> Result<(), StoreError> {
        let updated = sqlx::query(&format!(
            r#"
            UPDATE workflow_runs
            SET status = 'waiting_approval',
                waiting_step_id = $2,
                waiting_expires_at = $3,
                updated_at = now()
            WHERE id = $1 AND status NOT IN {TERMINAL_STATUSES}
            "#,
        ))
        .bind(run_id)
        .bind(&waiting.step_id)
        .bind(waiting.expires_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?
        .rows_affected();

        if updated == 0 && !self.run_exists(run_id).await? {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn resume_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update_status(run_id, RunStatus::Running, None).await
    }

    #[instrument(skip(self))]
    async fn complete_run(&self, run_id: Uuid) -> Result<(), StoreError> {
        self.update_status(run_id, RunStatus::Completed, None).await
    }

    #[instrument(skip(self))]
    async fn fail_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.update_status(run_id, RunStatus::Failed, Some(reason))
            .await
    }

    #[instrument(skip(self))]
    async fn cancel_run(&self, run_id: Uuid, reason: &str) -> Result<(), StoreError> {
        self.update_status(run_id, RunStatus::Cancelled, Some(reason))
            .await
    }
}

fn parse_run_status(s: &str) -> Result<RunStatus, StoreError> {
    match s {
        "pending" => Ok(RunStatus::Pending),
        "running" => Ok(RunStatus::Running),
        "waiting_approval" => Ok(RunStatus::WaitingApproval),
        "completed" => Ok(RunStatus::Completed),
        "failed" => Ok(RunStatus::Failed),
        "cancelled" => Ok(RunStatus::Cancelled),
        other => Err(StoreError::Serialization(format!(
            "unknown run status: {other}"
        ))),
    }
}

fn outcome_name(outcome: StepOutcome) -> &'static str {
    match outcome {
        StepOutcome::Success => "success",
        StepOutcome::Failed => "failed",
    }
}

fn parse_outcome(s: &str) -> Result<StepOutcome, StoreError> {
    match s {
        "success" => Ok(StepOutcome::Success),
        "failed" => Ok(StepOutcome::Failed),
        other => Err(StoreError::Serialization(format!(
            "unknown step outcome: {other}"
        ))),
    }
}

fn row_to_step_result(row: &sqlx::postgres::PgRow) -> Result<StepResult, StoreError> {
    let outcome: String = row.get("outcome");
    Ok(StepResult {
        step_id: row.get("step_id"),
        step_type: row.get("step_type"),
        outcome: parse_outcome(&outcome)?,
        data: row.get("data"),
        error: row.get("error"),
        completed_at: row.get("completed_at"),
    })
}
