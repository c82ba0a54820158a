//! The bounded reasoning loop
//!
//! [`AgentRunner`] orchestrates plan-act-observe iterations under a
//! [`CostGuard`](crate::cost::CostGuard) and an iteration cap. Any error
//! inside the loop is caught once at its boundary and routed to the
//! deterministic fallback, so every invocation ends in exactly one
//! terminal status with a non-empty outcome summary.

use std::collections::HashSet;
use std::time::Instant;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cost::{CostBudget, CostGuard};
use crate::error::{AgentRunError, Result};
use crate::execution::{
    AgentExecution, ExecutionOutcome, ExecutionStep, ExecutionStatus, FallbackInfo, StepStatus,
    TriggerType,
};
use crate::fallback::Fallback;
use crate::memory::{Lesson, Memory, MemoryQuery, MemoryStore};
use crate::reasoning::{DecisionAction, ReasoningRequest, ReasoningService, ReasoningUsage};
use crate::store::ExecutionStore;
use crate::tools::{ToolContext, ToolRegistry};

/// Hard cap on loop iterations
pub const MAX_ITERATIONS: u32 = 10;

/// Configuration for one runner instance
#[derive(Debug, Clone)]
pub struct AgentRunnerConfig {
    /// Iteration cap (defaults to [`MAX_ITERATIONS`])
    pub max_iterations: u32,

    /// Budget applied to each execution
    pub budget: CostBudget,

    /// Fixed system instructions passed to the reasoning provider
    pub system_prompt: String,

    /// Maximum memories retrieved per execution
    pub max_memories: usize,

    /// Minimum confidence for retrieved memories
    pub confidence_floor: f32,
}

impl Default for AgentRunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: MAX_ITERATIONS,
            budget: CostBudget::default(),
            system_prompt: "You are an operations agent. Work the task step by step using the \
                            available tools, and finish with a concise outcome summary."
                .to_string(),
            max_memories: 5,
            confidence_floor: 0.3,
        }
    }
}

/// Parameters for one execution
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub agent_id: Uuid,
    pub organization_id: Uuid,
    pub trigger: TriggerType,

    /// Goal text the loop pursues
    pub goal: String,

    /// Entity keys for memory relevance filtering
    pub entity_keys: Vec<String>,

    /// Raw task input (rows, config); also what the fallback consumes
    pub task_input: serde_json::Value,
}

/// How the loop itself concluded, before finalization
enum LoopVerdict {
    Finished(ExecutionOutcome),
    Escalated(ExecutionOutcome),
}

/// Orchestrates the bounded reasoning loop
pub struct AgentRunner<R, M, S, F>
where
    R: ReasoningService,
    M: MemoryStore,
    S: ExecutionStore,
    F: Fallback,
{
    reasoner: R,
    tools: ToolRegistry,
    memory: M,
    store: S,
    fallback: F,
    config: AgentRunnerConfig,
}

impl<R, M, S, F> AgentRunner<R, M, S, F>
where
    R: ReasoningService,
    M: MemoryStore,
    S: ExecutionStore,
    F: Fallback,
{
    pub fn new(reasoner: R, tools: ToolRegistry, memory: M, store: S, fallback: F) -> Self {
        Self {
            reasoner,
            tools,
            memory,
            store,
            fallback,
            config: AgentRunnerConfig::default(),
        }
    }

    /// Replace the default configuration
    pub fn with_config(mut self, config: AgentRunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the execution store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one execution to a terminal status
    ///
    /// Returns `Err` only for persistence failures around the initial
    /// create or the final write; everything inside the loop is converted
    /// into a terminal execution state.
    #[instrument(skip(self, request, cancel), fields(agent_id = %request.agent_id))]
    pub async fn run(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> Result<AgentExecution> {
        let mut execution = AgentExecution::new(
            request.agent_id,
            request.organization_id,
            request.trigger,
            request.goal.clone(),
        );
        self.store.create_execution(&execution).await?;
        info!(execution_id = %execution.id, "starting agent execution");

        let mut guard = CostGuard::new(self.config.budget);
        let memories = self.retrieve_memories(&request).await;
        let ctx = ToolContext::new(
            request.organization_id,
            request.agent_id,
            execution.id,
            request.task_input.clone(),
        );

        let mut steps: Vec<ExecutionStep> = vec![];
        let verdict = self
            .drive_loop(&request, &ctx, &memories, &mut guard, &mut steps, &cancel)
            .await;

        let (status, outcome, fallback) = match verdict {
            Ok(LoopVerdict::Finished(outcome)) => {
                (ExecutionStatus::Completed, outcome, FallbackInfo::default())
            }
            Ok(LoopVerdict::Escalated(outcome)) => {
                (ExecutionStatus::NeedsReview, outcome, FallbackInfo::default())
            }
            Err(AgentRunError::Cancelled) => (
                ExecutionStatus::Cancelled,
                ExecutionOutcome::summary("execution cancelled before completion")
                    .with_recommendations(ctx.recommendations()),
                FallbackInfo::default(),
            ),
            Err(err) => self.run_fallback(&request, &ctx, err).await,
        };

        execution.steps = steps;
        execution.usage = guard.totals();
        execution.status = status;
        execution.fallback = fallback.clone();
        execution.outcome = Some(outcome.clone());
        execution.finished_at = Some(Utc::now());

        self.store
            .finalize_execution(execution.id, status, outcome, fallback, execution.usage)
            .await?;
        info!(execution_id = %execution.id, %status, "agent execution finalized");

        if matches!(
            status,
            ExecutionStatus::Completed | ExecutionStatus::NeedsReview
        ) {
            self.learn(&execution).await;
        }

        Ok(execution)
    }

    /// One pass over the bounded loop; every error escapes to the caller
    /// exactly once
    async fn drive_loop(
        &self,
        request: &RunRequest,
        ctx: &ToolContext,
        memories: &[Memory],
        guard: &mut CostGuard,
        steps: &mut Vec<ExecutionStep>,
        cancel: &CancellationToken,
    ) -> Result<LoopVerdict> {
        let mut state_summary = format!("Task started. Goal: {}", request.goal);
        let mut seen_calls: HashSet<(String, String)> = HashSet::new();

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return Err(AgentRunError::Cancelled);
            }
            guard.check()?;

            let reasoning_request = ReasoningRequest {
                system_prompt: self.config.system_prompt.clone(),
                goal: request.goal.clone(),
                state_summary: state_summary.clone(),
                memories: memories.to_vec(),
                history: steps.clone(),
                iteration,
            };

            let started = Instant::now();
            let decision = self.reasoner.decide(&reasoning_request).await?;
            guard.record(decision.usage.tokens, decision.usage.cost_usd);

            match decision.action {
                DecisionAction::Finish { summary } => {
                    let step = finalize_step(
                        iteration,
                        &decision.reasoning,
                        "finish",
                        decision.usage,
                        &started,
                    );
                    self.checkpoint(ctx.execution_id, step, steps).await?;

                    return Ok(LoopVerdict::Finished(
                        ExecutionOutcome::summary(summary)
                            .with_recommendations(ctx.recommendations()),
                    ));
                }

                DecisionAction::Escalate { message } => {
                    let step = finalize_step(
                        iteration,
                        &decision.reasoning,
                        "escalate",
                        decision.usage,
                        &started,
                    );
                    self.checkpoint(ctx.execution_id, step, steps).await?;

                    return Ok(LoopVerdict::Escalated(
                        ExecutionOutcome::summary(message)
                            .with_recommendations(ctx.recommendations()),
                    ));
                }

                DecisionAction::ToolCall { tool, input } => {
                    let call_key = (tool.clone(), input.to_string());
                    if !seen_calls.insert(call_key) {
                        // The reasoning component is repeating itself; the
                        // prior identical call's output is already in the
                        // state summary, so re-running adds nothing.
                        warn!(tool = %tool, iteration, "duplicate tool call proposed, stopping loop");
                        let summary = format!(
                            "stopped after {} iterations: reasoning proposed a repeated call to '{}'. {}",
                            iteration, tool, state_summary
                        );
                        return Ok(LoopVerdict::Finished(
                            ExecutionOutcome::summary(summary)
                                .with_recommendations(ctx.recommendations()),
                        ));
                    }

                    let outcome = self.tools.execute(&tool, &input, ctx).await?;
                    guard.record(outcome.tokens_used.unwrap_or(0), 0.0);

                    let status = if outcome.success {
                        StepStatus::Succeeded
                    } else {
                        StepStatus::Failed
                    };

                    match (&outcome.data, &outcome.error) {
                        (Some(data), _) => {
                            state_summary.push_str(&format!(
                                "\nIteration {iteration}: tool '{tool}' returned {}",
                                truncate_for_summary(data)
                            ));
                        }
                        (None, Some(error)) => {
                            state_summary.push_str(&format!(
                                "\nIteration {iteration}: tool '{tool}' failed: {error}"
                            ));
                        }
                        (None, None) => {
                            state_summary.push_str(&format!(
                                "\nIteration {iteration}: tool '{tool}' returned no data"
                            ));
                        }
                    }

                    let step = ExecutionStep {
                        iteration,
                        reasoning: decision.reasoning,
                        action: "tool_call".to_string(),
                        tool_name: Some(tool),
                        tool_input: Some(input),
                        tool_output: outcome
                            .data
                            .or_else(|| outcome.error.map(|e| serde_json::json!({ "error": e }))),
                        status,
                        tokens_used: decision.usage.tokens + outcome.tokens_used.unwrap_or(0),
                        cost_usd: decision.usage.cost_usd,
                        duration_ms: started.elapsed().as_millis() as u64,
                        completed_at: Utc::now(),
                    };
                    self.checkpoint(ctx.execution_id, step, steps).await?;
                }
            }
        }

        Err(AgentRunError::MaxIterationsReached(
            self.config.max_iterations,
        ))
    }

    /// Persist one iteration before the loop advances
    async fn checkpoint(
        &self,
        execution_id: Uuid,
        step: ExecutionStep,
        steps: &mut Vec<ExecutionStep>,
    ) -> Result<()> {
        self.store.append_step(execution_id, &step).await?;
        steps.push(step);
        Ok(())
    }

    /// Deterministic fallback after the loop errored
    async fn run_fallback(
        &self,
        request: &RunRequest,
        ctx: &ToolContext,
        cause: AgentRunError,
    ) -> (ExecutionStatus, ExecutionOutcome, FallbackInfo) {
        warn!(error = %cause, "reasoning loop failed, attempting deterministic fallback");

        match self.fallback.compute(&request.task_input).await {
            Ok(report) => {
                let outcome = ExecutionOutcome {
                    summary: report.summary.clone(),
                    matched_count: Some(report.matched_count),
                    match_rate: report.match_rate(),
                    recommendations: ctx.recommendations(),
                };
                (
                    ExecutionStatus::Failed,
                    outcome,
                    FallbackInfo::used(cause.to_string()),
                )
            }
            Err(fallback_err) => {
                warn!(error = %fallback_err, "fallback computation failed");
                let outcome = ExecutionOutcome::summary(format!(
                    "execution failed: {cause}; deterministic fallback also failed: {fallback_err}"
                ))
                .with_recommendations(ctx.recommendations());
                (
                    ExecutionStatus::Failed,
                    outcome,
                    FallbackInfo::unusable(format!("{cause}; fallback: {fallback_err}")),
                )
            }
        }
    }

    async fn retrieve_memories(&self, request: &RunRequest) -> Vec<Memory> {
        let query = MemoryQuery {
            organization_id: request.organization_id,
            agent_id: request.agent_id,
            entity_keys: request.entity_keys.clone(),
            max_memories: self.config.max_memories,
            confidence_floor: self.config.confidence_floor,
        };

        match self.memory.retrieve(&query).await {
            Ok(memories) => {
                debug!(count = memories.len(), "retrieved memories");
                memories
            }
            Err(err) => {
                // Retrieval is best-effort; the loop runs without lessons
                warn!(error = %err, "memory retrieval failed");
                vec![]
            }
        }
    }

    /// Post-completion learning; errors here are swallowed and logged
    async fn learn(&self, execution: &AgentExecution) {
        let Some(outcome) = &execution.outcome else {
            return;
        };

        let lessons: Vec<Lesson> = outcome
            .recommendations
            .iter()
            .map(|rec| Lesson {
                category: rec.kind.clone(),
                content: rec.summary.clone(),
                confidence: 0.6,
            })
            .collect();

        if !lessons.is_empty() {
            if let Err(err) = self
                .memory
                .record_lessons(execution.organization_id, execution.agent_id, lessons)
                .await
            {
                warn!(execution_id = %execution.id, error = %err, "failed to record lessons");
            }
        }

        if let Err(err) = self
            .store
            .record_metrics(execution.id, execution.usage)
            .await
        {
            warn!(execution_id = %execution.id, error = %err, "failed to record metrics");
        }
    }
}

/// Step record for a finish/escalate iteration (no tool involved)
fn finalize_step(
    iteration: u32,
    reasoning: &str,
    action: &str,
    usage: ReasoningUsage,
    started: &Instant,
) -> ExecutionStep {
    ExecutionStep {
        iteration,
        reasoning: reasoning.to_string(),
        action: action.to_string(),
        tool_name: None,
        tool_input: None,
        tool_output: None,
        status: StepStatus::Succeeded,
        tokens_used: usage.tokens,
        cost_usd: usage.cost_usd,
        duration_ms: started.elapsed().as_millis() as u64,
        completed_at: Utc::now(),
    }
}

/// Cap tool output for the natural-language state summary
fn truncate_for_summary(value: &serde_json::Value) -> String {
    let mut text = value.to_string();
    if text.len() > 200 {
        text.truncate(200);
        text.push('…');
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fallback::FallbackReport;
    use crate::memory::InMemoryMemoryStore;
    use crate::reasoning::{Decision, ScriptedReasoner};
    use crate::store::InMemoryExecutionStore;
    use crate::tools::{Tool, ToolOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;

    struct CountingTool {
        calls: Arc<parking_lot::Mutex<u32>>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "load_rows"
        }

        async fn execute(&self, _input: &serde_json::Value, _ctx: &ToolContext) -> ToolOutcome {
            *self.calls.lock() += 1;
            ToolOutcome::ok(json!({ "rows": 10 })).with_tokens(5)
        }
    }

    struct RowCountFallback;

    #[async_trait]
    impl Fallback for RowCountFallback {
        async fn compute(&self, input: &serde_json::Value) -> crate::error::Result<FallbackReport> {
            let total = input
                .get("rows")
                .and_then(|r| r.as_array())
                .map(|r| r.len() as u64)
                .unwrap_or(0);
            Ok(FallbackReport {
                matched_count: total.saturating_sub(3),
                total_rows: total,
                summary: format!("straight-line matching over {total} rows"),
            })
        }
    }

    struct FailingFallback;

    #[async_trait]
    impl Fallback for FailingFallback {
        async fn compute(&self, _input: &serde_json::Value) -> crate::error::Result<FallbackReport> {
            Err(AgentRunError::fallback("no usable input data"))
        }
    }

    fn request() -> RunRequest {
        RunRequest {
            agent_id: Uuid::now_v7(),
            organization_id: Uuid::now_v7(),
            trigger: TriggerType::Manual,
            goal: "reconcile the ledgers".to_string(),
            entity_keys: vec![],
            task_input: json!({ "rows": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] }),
        }
    }

    fn runner_with(
        reasoner: ScriptedReasoner,
        calls: Arc<parking_lot::Mutex<u32>>,
    ) -> AgentRunner<ScriptedReasoner, InMemoryMemoryStore, InMemoryExecutionStore, RowCountFallback>
    {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool { calls }));
        AgentRunner::new(
            reasoner,
            tools,
            InMemoryMemoryStore::new(),
            InMemoryExecutionStore::new(),
            RowCountFallback,
        )
    }

    #[tokio::test]
    async fn test_completes_on_finish_decision() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![
            Decision::tool_call("load everything", "load_rows", json!({"source": "bank"}))
                .with_usage(100, 0.01),
            Decision::finish("all matched", "matched all rows").with_usage(50, 0.005),
        ]);
        let runner = runner_with(reasoner, calls.clone());

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.outcome_summary(), Some("matched all rows"));
        assert_eq!(execution.steps.len(), 2);
        assert_eq!(*calls.lock(), 1);
        assert!(!execution.fallback.used);
        // decision tokens + tool tokens
        assert_eq!(execution.usage.tokens, 155);
        // The finish step carries its own decision's usage
        assert_eq!(execution.steps[1].tokens_used, 50);
        assert_eq!(execution.steps[1].cost_usd, 0.005);
        assert_eq!(
            execution.steps.iter().map(|s| s.tokens_used).sum::<u64>(),
            execution.usage.tokens
        );
    }

    #[tokio::test]
    async fn test_escalation_finalizes_needs_review() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![Decision::escalate(
            "amounts are ambiguous",
            "two candidate matches for invoice 42",
        )]);
        let runner = runner_with(reasoner, calls);

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::NeedsReview);
        assert_eq!(
            execution.outcome_summary(),
            Some("two candidate matches for invoice 42")
        );
    }

    #[tokio::test]
    async fn test_reasoning_error_routes_to_fallback() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![
            Decision::tool_call("start", "load_rows", json!({"page": 1})),
            Decision::tool_call("next", "load_rows", json!({"page": 2})),
        ])
        .then_error("provider returned 500");
        let runner = runner_with(reasoner, calls);

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.fallback.used);
        assert_eq!(execution.outcome.as_ref().unwrap().matched_count, Some(7));
        assert_eq!(execution.outcome.as_ref().unwrap().match_rate, Some(70));
    }

    #[tokio::test]
    async fn test_duplicate_tool_call_stops_without_reexecution() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![
            Decision::tool_call("load", "load_rows", json!({"page": 1})),
            Decision::tool_call("load again", "load_rows", json!({"page": 1})),
        ]);
        let runner = runner_with(reasoner, calls.clone());

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(*calls.lock(), 1);
        assert!(execution
            .outcome_summary()
            .unwrap()
            .contains("repeated call"));
    }

    #[tokio::test]
    async fn test_budget_exhaustion_routes_to_fallback() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![
            Decision::tool_call("load", "load_rows", json!({"page": 1})).with_usage(500, 0.0),
            // Never reached: the guard trips before this call is billed
            Decision::finish("done", "should not get here"),
        ]);
        let runner = runner_with(reasoner, calls.clone()).with_config(AgentRunnerConfig {
            budget: CostBudget::default().with_max_tokens(400),
            ..AgentRunnerConfig::default()
        });

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.fallback.used);
        assert!(execution
            .fallback
            .reason
            .as_deref()
            .unwrap()
            .contains("token budget exceeded"));
        // Only the first decision ran
        assert_eq!(execution.steps.len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_checked_per_iteration() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        let reasoner = ScriptedReasoner::new(vec![Decision::finish("done", "unused")]);
        let runner = runner_with(reasoner, calls.clone());

        let cancel = CancellationToken::new();
        cancel.cancel();
        let execution = runner.run(request(), cancel).await.unwrap();

        assert_eq!(execution.status, ExecutionStatus::Cancelled);
        assert_eq!(*calls.lock(), 0);
        assert!(!execution.outcome_summary().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fallback_failure_still_terminates_with_summary() {
        let reasoner = ScriptedReasoner::default().then_error("provider down");
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(CountingTool {
            calls: Arc::new(parking_lot::Mutex::new(0)),
        }));
        let runner = AgentRunner::new(
            reasoner,
            tools,
            InMemoryMemoryStore::new(),
            InMemoryExecutionStore::new(),
            FailingFallback,
        );

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(!execution.fallback.used);
        assert!(!execution.outcome_summary().unwrap().is_empty());
        // No numeric fields without usable data
        assert_eq!(execution.outcome.as_ref().unwrap().matched_count, None);
        assert_eq!(execution.outcome.as_ref().unwrap().match_rate, None);
    }

    #[tokio::test]
    async fn test_max_iterations_routes_to_fallback() {
        let calls = Arc::new(parking_lot::Mutex::new(0));
        // Ten distinct tool calls, never a finish
        let decisions: Vec<Decision> = (1..=10)
            .map(|page| Decision::tool_call("keep loading", "load_rows", json!({ "page": page })))
            .collect();
        let runner = runner_with(ScriptedReasoner::new(decisions), calls.clone());

        let execution = runner
            .run(request(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(execution.status, ExecutionStatus::Failed);
        assert!(execution.fallback.used);
        assert_eq!(*calls.lock(), 10);
        assert!(execution
            .fallback
            .reason
            .as_deref()
            .unwrap()
            .contains("max iterations"));
    }
}
