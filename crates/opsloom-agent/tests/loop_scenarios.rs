//! End-to-end scenarios for the reasoning loop using the in-memory backends.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use opsloom_agent::{
    AgentRecommendation, AgentRunner, Decision, ExecutionStatus, ExecutionStore, Fallback,
    FallbackReport, InMemoryExecutionStore, InMemoryMemoryStore, MemoryQuery, MemoryStore,
    ReasoningService,
    RunRequest, ScriptedReasoner, Tool, ToolContext, ToolOutcome, ToolRegistry, TriggerType,
};

/// Tool that proposes a match recommendation for each candidate pair.
struct ProposeMatchesTool;

#[async_trait]
impl Tool for ProposeMatchesTool {
    fn name(&self) -> &str {
        "propose_matches"
    }

    async fn execute(&self, input: &serde_json::Value, ctx: &ToolContext) -> ToolOutcome {
        let pairs = input
            .get("pairs")
            .and_then(|p| p.as_array())
            .cloned()
            .unwrap_or_default();

        for pair in &pairs {
            ctx.recommend(AgentRecommendation::new(
                "match",
                format!("pair {pair}"),
                pair.clone(),
            ));
        }
        ToolOutcome::ok(json!({ "proposed": pairs.len() })).with_tokens(12)
    }
}

struct StraightLineFallback;

#[async_trait]
impl Fallback for StraightLineFallback {
    async fn compute(&self, input: &serde_json::Value) -> opsloom_agent::Result<FallbackReport> {
        let total = input
            .get("rows")
            .and_then(|r| r.as_array())
            .map(|r| r.len() as u64)
            .unwrap_or(0);
        let matched = (total * 7) / 10;
        Ok(FallbackReport {
            matched_count: matched,
            total_rows: total,
            summary: format!("deterministic matching paired {matched} of {total} rows"),
        })
    }
}

fn request() -> RunRequest {
    RunRequest {
        agent_id: Uuid::now_v7(),
        organization_id: Uuid::now_v7(),
        trigger: TriggerType::Workflow,
        goal: "reconcile bank statement against the ledger".to_string(),
        entity_keys: vec!["bank:main".to_string()],
        task_input: json!({ "rows": [1, 2, 3, 4, 5, 6, 7, 8, 9, 10] }),
    }
}

fn runner(
    reasoner: ScriptedReasoner,
    memory: InMemoryMemoryStore,
) -> AgentRunner<ScriptedReasoner, InMemoryMemoryStore, InMemoryExecutionStore, StraightLineFallback>
{
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(ProposeMatchesTool));
    AgentRunner::new(
        reasoner,
        tools,
        memory,
        InMemoryExecutionStore::new(),
        StraightLineFallback,
    )
}

#[test_log::test(tokio::test)]
async fn completed_run_collects_recommendations_and_learns() {
    let memory = InMemoryMemoryStore::new();
    let reasoner = ScriptedReasoner::new(vec![
        Decision::tool_call(
            "propose pairings for the obvious candidates",
            "propose_matches",
            json!({ "pairs": [{"invoice": 1, "payment": 9}, {"invoice": 2, "payment": 4}] }),
        )
        .with_usage(320, 0.02),
        Decision::finish("both pairings look safe", "proposed 2 matches for review")
            .with_usage(110, 0.01),
    ]);
    let runner = runner(reasoner, memory.clone());

    let req = request();
    let execution = runner.run(req, CancellationToken::new()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    let outcome = execution.outcome.as_ref().unwrap();
    assert_eq!(outcome.recommendations.len(), 2);
    assert_eq!(outcome.summary, "proposed 2 matches for review");

    // Learning distilled one lesson per recommendation
    assert_eq!(memory.count().await, 2);

    // The store holds the same terminal state the runner returned
    let stored = runner
        .store()
        .get_execution(execution.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, ExecutionStatus::Completed);
    assert_eq!(stored.steps.len(), 2);
}

#[test_log::test(tokio::test)]
async fn reasoning_failure_at_iteration_three_falls_back() {
    let reasoner = ScriptedReasoner::new(vec![
        Decision::tool_call("first pass", "propose_matches", json!({ "pairs": [] })),
        Decision::tool_call("second pass", "propose_matches", json!({ "pairs": [1] })),
    ])
    .then_error("context window exceeded");
    let runner = runner(reasoner, InMemoryMemoryStore::new());

    let execution = runner
        .run(request(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(execution.fallback.used);
    let outcome = execution.outcome.as_ref().unwrap();
    assert_eq!(outcome.matched_count, Some(7));
    assert_eq!(outcome.match_rate, Some(70));
    assert!(!outcome.summary.is_empty());
    // Two iterations were checkpointed before the failure
    assert_eq!(execution.steps.len(), 2);
}

#[test_log::test(tokio::test)]
async fn memories_are_passed_to_the_reasoner() {
    // A reasoner that finishes immediately but records what it saw.
    struct Recorder {
        seen: Arc<parking_lot::Mutex<usize>>,
    }

    #[async_trait]
    impl ReasoningService for Recorder {
        async fn decide(
            &self,
            request: &opsloom_agent::ReasoningRequest,
        ) -> opsloom_agent::Result<Decision> {
            *self.seen.lock() = request.memories.len();
            Ok(Decision::finish("done", "nothing to do"))
        }
    }

    let memory = InMemoryMemoryStore::new();
    let req = request();
    memory
        .record_lessons(
            req.organization_id,
            req.agent_id,
            vec![opsloom_agent::Lesson {
                category: "matching_rule".to_string(),
                content: "amounts may differ by bank fees up to 1.50".to_string(),
                confidence: 0.8,
            }],
        )
        .await
        .unwrap();

    // Sanity: the seeded lesson is retrievable under the runner's defaults
    let found = memory
        .retrieve(&MemoryQuery {
            organization_id: req.organization_id,
            agent_id: req.agent_id,
            entity_keys: vec![],
            max_memories: 5,
            confidence_floor: 0.3,
        })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);

    let seen = Arc::new(parking_lot::Mutex::new(0));
    let runner = AgentRunner::new(
        Recorder { seen: seen.clone() },
        ToolRegistry::new(),
        memory,
        InMemoryExecutionStore::new(),
        StraightLineFallback,
    );

    let execution = runner.run(req, CancellationToken::new()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(*seen.lock(), 1);
}
