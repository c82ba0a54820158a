// Agent Reasoning Loop
//
// This crate provides a bounded plan-act-observe loop for autonomous task
// execution (LLM decision → tool execution → repeat), with a guaranteed
// deterministic fallback when the reasoning component fails or exhausts
// its budget.
//
// Key design decisions:
// - Uses traits (ReasoningService, MemoryStore, ExecutionStore, Fallback) for
//   pluggable backends
// - Every iteration is checkpointed before the loop advances
// - The loop always terminates with exactly one terminal status, even when
//   the reasoning provider errors at any iteration

pub mod cost;
pub mod error;
pub mod execution;
pub mod fallback;
pub mod memory;
pub mod reasoning;
pub mod runner;
pub mod store;
pub mod tools;

// Re-exports for convenience
pub use cost::{BudgetExceeded, CostBudget, CostGuard};
pub use error::{AgentRunError, Result};
pub use execution::{
    AgentExecution, AgentRecommendation, ExecutionOutcome, ExecutionStep, ExecutionStatus,
    FallbackInfo, StepStatus, TriggerType, UsageTotals,
};
pub use fallback::{Fallback, FallbackReport};
pub use memory::{InMemoryMemoryStore, Lesson, Memory, MemoryQuery, MemoryStore};
pub use reasoning::{
    Decision, DecisionAction, ReasoningRequest, ReasoningService, ReasoningUsage, ScriptedReasoner,
};
pub use runner::{AgentRunner, AgentRunnerConfig, RunRequest};
pub use store::{ExecutionStore, InMemoryExecutionStore};
pub use tools::{Tool, ToolContext, ToolOutcome, ToolRegistry};
