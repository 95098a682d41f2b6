// Error types shared across the runtime

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur inside the execution substrate
#[derive(Debug, Error)]
pub enum CoreError {
    /// LLM provider error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Tool execution error
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Input validation failed (malformed id, bad timezone, invalid status, …)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity lookup returned empty
    #[error("{0} not found")]
    NotFound(String),

    /// Writer is not the creator
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    /// Instance plan contains a dependency cycle
    #[error("Circular dependency detected: {0}")]
    CircularDependency(String),

    /// Agent loop hit the iteration ceiling
    #[error("Max iterations ({0}) reached")]
    MaxIterationsReached(usize),

    /// Turn was cancelled (client disconnect, shutdown)
    #[error("Cancelled")]
    Cancelled,

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Create an LLM error
    pub fn llm(msg: impl Into<String>) -> Self {
        CoreError::Llm(msg.into())
    }

    /// Create a tool execution error
    pub fn tool(msg: impl Into<String>) -> Self {
        CoreError::ToolExecution(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        CoreError::Storage(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        CoreError::Validation(msg.into())
    }

    /// Create a not-found error; `kind` names the missing entity ("agent", "job", …)
    pub fn not_found(kind: impl Into<String>) -> Self {
        CoreError::NotFound(kind.into())
    }

    /// Create an authorization error
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        CoreError::Unauthorized(msg.into())
    }
}

