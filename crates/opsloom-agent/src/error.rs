// Error types for the agent reasoning loop

use thiserror::Error;

use crate::cost::BudgetExceeded;

/// Result type alias for agent loop operations
pub type Result<T> = std::result::Result<T, AgentRunError>;

/// Errors that can occur during agent loop execution
#[derive(Debug, Error)]
pub enum AgentRunError {
    /// Reasoning provider error
    #[error("reasoning error: {0}")]
    Reasoning(String),

    /// Tool execution error
    #[error("tool execution error: {0}")]
    Tool(String),

    /// Execution store error
    #[error("execution store error: {0}")]
    Store(String),

    /// Memory store error
    #[error("memory store error: {0}")]
    Memory(String),

    /// Budget exhausted
    #[error(transparent)]
    Budget(#[from] BudgetExceeded),

    /// Loop terminated due to max iterations
    #[error("max iterations ({0}) reached")]
    MaxIterationsReached(u32),

    /// Execution was cancelled
    #[error("execution cancelled")]
    Cancelled,

    /// Deterministic fallback error
    #[error("fallback error: {0}")]
    Fallback(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AgentRunError {
    /// Create a reasoning error
    pub fn reasoning(msg: impl Into<String>) -> Self {
        AgentRunError::Reasoning(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        AgentRunError::Tool(msg.into())
    }

    /// Create an execution store error
    pub fn store(msg: impl Into<String>) -> Self {
        AgentRunError::Store(msg.into())
    }

    /// Create a memory store error
    pub fn memory(msg: impl Into<String>) -> Self {
        AgentRunError::Memory(msg.into())
    }

    /// Create a fallback error
    pub fn fallback(msg: impl Into<String>) -> Self {
        AgentRunError::Fallback(msg.into())
    }
}
