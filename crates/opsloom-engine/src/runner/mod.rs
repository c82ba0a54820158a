//! Workflow runner
//!
//! Drives a run through its definition: execute, checkpoint, advance.
//! Every step result is persisted before navigation, and steps with a
//! persisted result are never re-executed, so a run can be replayed
//! from scratch after a crash and only the unfinished tail runs.

mod gate;

pub use gate::ApprovalGate;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use opsloom_agent::{AgentRunner, ExecutionStatus, TriggerType};

use crate::actions::{ActionContext, ActionRegistry};
use crate::engine::next_step;
use crate::error::EngineError;
use crate::notify::{LogNotifier, Notifier};
use crate::persistence::{RunStore, StepWrite};
use crate::workflow::{
    ApprovalSignal, ErrorPolicy, RunStatus, StepKind, StepResult, WaitingApproval,
    WorkflowDefinition, WorkflowRun, WorkflowStep,
};

/// Default wait before a pending approval cancels the run
pub const DEFAULT_APPROVAL_TIMEOUT: Duration = Duration::from_secs(72 * 60 * 60);

/// Configuration for one runner instance
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Approval wait applied when a step declares no override
    pub approval_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            approval_timeout: DEFAULT_APPROVAL_TIMEOUT,
        }
    }
}

/// Result of a delegated agent execution, as seen by the workflow
#[derive(Debug, Clone)]
pub struct DelegatedRun {
    pub execution_id: Uuid,

    /// Terminal status label of the agent execution
    pub status: String,

    /// Whether the step counts as successful
    pub succeeded: bool,

    pub summary: Option<String>,
}

/// Executes agent goals on behalf of `agent_run` steps
#[async_trait]
pub trait AgentDelegate: Send + Sync {
    async fn execute_goal(
        &self,
        agent_id: Uuid,
        organization_id: Uuid,
        goal: &str,
        task_input: Value,
    ) -> anyhow::Result<DelegatedRun>;
}

/// The reasoning loop is a delegate as-is: completed and needs-review
/// executions count as successful steps, everything else fails the step.
#[async_trait]
impl<R, M, S, F> AgentDelegate for AgentRunner<R, M, S, F>
where
    R: opsloom_agent::ReasoningService,
    M: opsloom_agent::MemoryStore,
    S: opsloom_agent::ExecutionStore,
    F: opsloom_agent::Fallback,
{
    async fn execute_goal(
        &self,
        agent_id: Uuid,
        organization_id: Uuid,
        goal: &str,
        task_input: Value,
    ) -> anyhow::Result<DelegatedRun> {
        let request = opsloom_agent::RunRequest {
            agent_id,
            organization_id,
            trigger: TriggerType::Workflow,
            goal: goal.to_string(),
            entity_keys: vec![],
            task_input,
        };

        let execution = self.run(request, CancellationToken::new()).await?;
        Ok(DelegatedRun {
            execution_id: execution.id,
            status: execution.status.to_string(),
            succeeded: matches!(
                execution.status,
                ExecutionStatus::Completed | ExecutionStatus::NeedsReview
            ),
            summary: execution.outcome_summary().map(str::to_string),
        })
    }
}

/// What a single executed step means for the run
enum StepEffect {
    /// Result recorded; the error policy and navigation decide what is next
    Completed(StepResult),

    /// Result recorded and the run fails regardless of error policy
    FailRun(StepResult, String),

    /// Result recorded and the run is cancelled (approval rejection or
    /// timeout)
    CancelRun(StepResult, String),
}

/// Drives workflow runs to a terminal status
pub struct WorkflowRunner<S: RunStore> {
    store: Arc<S>,
    actions: Arc<ActionRegistry>,
    notifier: Arc<dyn Notifier>,
    gate: ApprovalGate,
    agents: Option<Arc<dyn AgentDelegate>>,
    config: RunnerConfig,
}

impl<S: RunStore> WorkflowRunner<S> {
    pub fn new(store: Arc<S>, actions: Arc<ActionRegistry>) -> Self {
        Self {
            store,
            actions,
            notifier: Arc::new(LogNotifier),
            gate: ApprovalGate::new(),
            agents: None,
            config: RunnerConfig::default(),
        }
    }

    /// Replace the default log notifier
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Attach an agent delegate for `agent_run` steps
    pub fn with_agents(mut self, agents: Arc<dyn AgentDelegate>) -> Self {
        self.agents = Some(agents);
        self
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the run store
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Create a run under the trigger's id and drive it to suspension or
    /// a terminal status
    ///
    /// The run id comes from the trigger, so a re-delivered trigger hits
    /// the idempotent create and continues the existing run from its last
    /// checkpoint instead of repeating side effects.
    #[instrument(skip(self, trigger))]
    pub async fn start(
        &self,
        run_id: Uuid,
        definition_id: Uuid,
        organization_id: Uuid,
        trigger: Value,
    ) -> Result<WorkflowRun, EngineError> {
        let definition = self.store.load_definition(definition_id).await?;
        let run = WorkflowRun::with_id(run_id, definition_id, organization_id, trigger);
        self.store.create_run(&run).await?;

        let run = self.store.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }
        info!(%run_id, definition = %definition.name, steps_done = run.step_results.len(), "starting workflow run");

        self.drive(&definition, run_id).await
    }

    /// Pick up a non-terminal run where it left off
    ///
    /// Steps with persisted results are skipped; an interrupted approval
    /// wait resumes against its original expiry.
    #[instrument(skip(self))]
    pub async fn resume(&self, run_id: Uuid) -> Result<WorkflowRun, EngineError> {
        let run = self.store.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(run);
        }

        let definition = self.store.load_definition(run.definition_id).await?;
        info!(%run_id, steps_done = run.step_results.len(), "resuming workflow run");
        self.drive(&definition, run_id).await
    }

    /// Deliver an approval signal to a suspended run
    pub fn resolve_approval(&self, run_id: Uuid, signal: ApprovalSignal) -> Result<(), EngineError> {
        self.gate.resolve(run_id, signal)
    }

    /// Whether the runner is currently suspended on the run's approval
    pub fn is_waiting_approval(&self, run_id: Uuid) -> bool {
        self.gate.is_waiting(run_id)
    }

    /// Walk the graph from the entry step, skipping persisted results
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        run_id: Uuid,
    ) -> Result<WorkflowRun, EngineError> {
        let mut run = self.store.load_run(run_id).await?;

        let Some(mut current) = definition.entry_step() else {
            return self.finish(run_id, RunStatus::Failed, "workflow has no steps").await;
        };
        self.store.mark_running(run_id).await?;

        loop {
            let result = match run.result_for(&current.id) {
                Some(existing) => existing.clone(),
                None => match self.execute_step(&run, current).await? {
                    StepEffect::Completed(result) => self.checkpoint(&mut run, result).await?,
                    StepEffect::FailRun(result, reason) => {
                        self.checkpoint(&mut run, result).await?;
                        return self.finish(run_id, RunStatus::Failed, &reason).await;
                    }
                    StepEffect::CancelRun(result, reason) => {
                        self.checkpoint(&mut run, result).await?;
                        return self.finish(run_id, RunStatus::Cancelled, &reason).await;
                    }
                },
            };

            if !result.is_success() {
                match current.on_error {
                    ErrorPolicy::Fail => {
                        let reason = result
                            .error
                            .clone()
                            .unwrap_or_else(|| format!("step '{}' failed", current.id));
                        return self.finish(run_id, RunStatus::Failed, &reason).await;
                    }
                    ErrorPolicy::Skip => {
                        warn!(%run_id, step_id = %current.id, "step failed, continuing per error policy");
                    }
                }
            }

            // Navigation errors are definition defects, not infrastructure
            // faults; the run must still reach a terminal status.
            let next = match next_step(definition, &current.id, &run.step_results) {
                Ok(next) => next,
                Err(
                    err @ (EngineError::UnknownStep(_) | EngineError::MalformedCondition(_)),
                ) => {
                    return self.finish(run_id, RunStatus::Failed, &err.to_string()).await;
                }
                Err(err) => return Err(err),
            };

            match next {
                Some(next) => current = next,
                None => {
                    self.store.complete_run(run_id).await?;
                    self.notify_finished(run_id, RunStatus::Completed).await;
                    return Ok(self.store.load_run(run_id).await?);
                }
            }
        }
    }

    /// Persist a step result before the run advances past it
    ///
    /// A concurrent or replayed write loses to the persisted result, and
    /// the persisted one is what the run continues with.
    async fn checkpoint(
        &self,
        run: &mut WorkflowRun,
        result: StepResult,
    ) -> Result<StepResult, EngineError> {
        let persisted = match self.store.record_step_result(run.id, &result).await? {
            StepWrite::Recorded => result,
            StepWrite::AlreadyRecorded(kept) => kept,
        };
        run.step_results.push(persisted.clone());
        Ok(persisted)
    }

    async fn finish(
        &self,
        run_id: Uuid,
        status: RunStatus,
        reason: &str,
    ) -> Result<WorkflowRun, EngineError> {
        match status {
            RunStatus::Cancelled => self.store.cancel_run(run_id, reason).await?,
            _ => self.store.fail_run(run_id, reason).await?,
        }
        self.notify_finished(run_id, status).await;
        Ok(self.store.load_run(run_id).await?)
    }

    async fn notify_finished(&self, run_id: Uuid, status: RunStatus) {
        if let Err(err) = self.notifier.run_finished(run_id, status).await {
            warn!(%run_id, error = %err, "completion notification failed");
        }
    }

    async fn execute_step(
        &self,
        run: &WorkflowRun,
        step: &WorkflowStep,
    ) -> Result<StepEffect, EngineError> {
        let kind_name = step.kind.type_name();

        match &step.kind {
            StepKind::Action {
                action_type,
                params,
                ..
            } => {
                let ctx = ActionContext {
                    run_id: run.id,
                    organization_id: run.organization_id,
                    trigger: run.trigger.clone(),
                };
                let outcome = self.actions.execute(action_type, params, &ctx).await;
                let result = if outcome.success {
                    StepResult::success(&step.id, kind_name, outcome.data)
                } else {
                    StepResult::failed(
                        &step.id,
                        kind_name,
                        outcome
                            .error
                            .unwrap_or_else(|| format!("action '{action_type}' failed")),
                    )
                };
                Ok(StepEffect::Completed(result))
            }

            StepKind::Condition { condition, .. } => {
                match condition.evaluate(&run.trigger, &run.step_results) {
                    Ok(held) => Ok(StepEffect::Completed(StepResult::success(
                        &step.id,
                        kind_name,
                        Some(json!(held)),
                    ))),
                    Err(err) => {
                        // A skipped unevaluable condition advances as false
                        let mut result = StepResult::failed(&step.id, kind_name, err.to_string());
                        result.data = Some(json!(false));
                        Ok(StepEffect::Completed(result))
                    }
                }
            }

            StepKind::HumanApproval {
                recipients,
                timeout,
                ..
            } => self.wait_for_approval(run, step, recipients, *timeout).await,

            StepKind::AgentRun { agent_id, goal, .. } => {
                let Some(agents) = &self.agents else {
                    return Ok(StepEffect::Completed(StepResult::failed(
                        &step.id,
                        kind_name,
                        "no agent delegate configured",
                    )));
                };

                let goal = goal.clone().unwrap_or_else(|| step.label.clone());
                match agents
                    .execute_goal(*agent_id, run.organization_id, &goal, run.trigger.clone())
                    .await
                {
                    Ok(delegated) => {
                        let data = json!({
                            "execution_id": delegated.execution_id,
                            "status": delegated.status,
                            "summary": delegated.summary,
                        });
                        let result = if delegated.succeeded {
                            StepResult::success(&step.id, kind_name, Some(data))
                        } else {
                            let mut result = StepResult::failed(
                                &step.id,
                                kind_name,
                                format!("agent execution ended {}", delegated.status),
                            );
                            result.data = Some(data);
                            result
                        };
                        Ok(StepEffect::Completed(result))
                    }
                    Err(err) => Ok(StepEffect::Completed(StepResult::failed(
                        &step.id,
                        kind_name,
                        err.to_string(),
                    ))),
                }
            }

            StepKind::Unknown => Ok(StepEffect::Completed(StepResult::failed(
                &step.id,
                kind_name,
                format!("unrecognized step type on step '{}'", step.id),
            ))),
        }
    }

    /// Suspend on an approval step until a signal arrives or the expiry
    /// passes
    ///
    /// The expiry is persisted up front; if this process dies mid-wait, a
    /// resume re-enters the wait with the remaining time, not a fresh
    /// timeout.
    async fn wait_for_approval(
        &self,
        run: &WorkflowRun,
        step: &WorkflowStep,
        recipients: &[String],
        step_timeout: Option<Duration>,
    ) -> Result<StepEffect, EngineError> {
        let kind_name = step.kind.type_name();
        let expires_at = match &run.waiting {
            Some(waiting) if waiting.step_id == step.id => waiting.expires_at,
            _ => {
                let timeout = step_timeout.unwrap_or(self.config.approval_timeout);
                Utc::now()
                    + chrono::Duration::from_std(timeout)
                        .unwrap_or_else(|_| chrono::Duration::hours(72))
            }
        };

        let waiting = WaitingApproval {
            step_id: step.id.clone(),
            expires_at,
        };

        // The waiter must be registered before the store shows
        // waiting_approval, or a signal racing the write would see the
        // suspended status and still get NoPendingApproval.
        let rx = self.gate.register(run.id);
        if let Err(err) = self.store.set_waiting_approval(run.id, &waiting).await {
            self.gate.unregister(run.id);
            return Err(err.into());
        }
        if let Err(err) = self
            .notifier
            .approval_requested(run.id, &step.id, recipients, expires_at)
            .await
        {
            warn!(run_id = %run.id, error = %err, "approval notification failed");
        }

        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        info!(run_id = %run.id, step_id = %step.id, ?remaining, "suspended on approval");

        let effect = match tokio::time::timeout(remaining, rx).await {
            Ok(Ok(signal)) => {
                self.store.resume_run(run.id).await?;
                if signal.is_approved() {
                    let data = json!({
                        "approved": true,
                        "approved_by": signal.approved_by,
                        "comment": signal.comment,
                    });
                    StepEffect::Completed(StepResult::success(&step.id, kind_name, Some(data)))
                } else {
                    let reason = match &signal.comment {
                        Some(comment) => {
                            format!("approval rejected by {}: {comment}", signal.approved_by)
                        }
                        None => format!("approval rejected by {}", signal.approved_by),
                    };
                    StepEffect::CancelRun(
                        StepResult::failed(&step.id, kind_name, &reason),
                        reason,
                    )
                }
            }
            Ok(Err(_)) => {
                // Our waiter was displaced by a newer registration
                let reason = format!("approval wait on step '{}' was displaced", step.id);
                StepEffect::FailRun(StepResult::failed(&step.id, kind_name, &reason), reason)
            }
            Err(_) => {
                let reason = format!(
                    "approval timeout on step '{}', no decision by {expires_at}",
                    step.id
                );
                StepEffect::CancelRun(StepResult::failed(&step.id, kind_name, &reason), reason)
            }
        };

        self.gate.unregister(run.id);
        Ok(effect)
    }
}
