//! Core error type for all engine failures.

use careerflow_common::{ErrorKind, LlmError};
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EngineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("no such tool: {0}")]
    NoSuchTool(String),

    #[error("invalid arguments for tool {tool}: {reason}")]
    InvalidArgs { tool: String, reason: String },

    #[error("tool {tool} timed out")]
    ToolTimeout { tool: String },

    #[error("tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },

    #[error("llm unavailable: {0}")]
    LlmUnavailable(String),

    #[error("agent {agent} output did not parse: {reason}")]
    AgentParseFailed { agent: String, reason: String },

    #[error("cancelled")]
    Cancelled,

    #[error("turn budget exceeded")]
    TurnBudgetExceeded,

    #[error("goal precondition failed: {0}")]
    GoalPrecondition(String),

    #[error("subscriber backpressure")]
    SubscriberBackpressure,

    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create an internal error from any displayable cause.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wire-level classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Unauthorized(_) => ErrorKind::Unauthorized,
            Self::NoSuchTool(_) => ErrorKind::NoSuchTool,
            Self::InvalidArgs { .. } => ErrorKind::InvalidArgs,
            Self::ToolTimeout { .. } => ErrorKind::ToolTimeout,
            Self::ToolFailed { .. } => ErrorKind::ToolFailed,
            Self::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
            Self::AgentParseFailed { .. } => ErrorKind::AgentParseFailed,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::TurnBudgetExceeded => ErrorKind::TurnBudgetExceeded,
            Self::GoalPrecondition(_) => ErrorKind::GoalPreconditionFailed,
            Self::SubscriberBackpressure => ErrorKind::SubscriberBackpressure,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<LlmError> for EngineError {
    fn from(err: LlmError) -> Self {
        Self::LlmUnavailable(err.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;
