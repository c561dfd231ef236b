//! Wire-level error classification.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error kinds carried on the wire and in tool envelopes.
///
/// Consumers match on the kind, never on message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidInput,
    Unauthorized,
    NoSuchTool,
    InvalidArgs,
    ToolTimeout,
    ToolFailed,
    LlmUnavailable,
    AgentParseFailed,
    Cancelled,
    TurnBudgetExceeded,
    GoalPreconditionFailed,
    SubscriberBackpressure,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::Unauthorized => "unauthorized",
            Self::NoSuchTool => "no_such_tool",
            Self::InvalidArgs => "invalid_args",
            Self::ToolTimeout => "tool_timeout",
            Self::ToolFailed => "tool_failed",
            Self::LlmUnavailable => "llm_unavailable",
            Self::AgentParseFailed => "agent_parse_failed",
            Self::Cancelled => "cancelled",
            Self::TurnBudgetExceeded => "turn_budget_exceeded",
            Self::GoalPreconditionFailed => "goal_precondition_failed",
            Self::SubscriberBackpressure => "subscriber_backpressure",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        let v = serde_json::to_value(ErrorKind::SubscriberBackpressure).unwrap();
        assert_eq!(v, serde_json::json!("subscriber_backpressure"));
    }

    #[test]
    fn display_matches_serde() {
        for kind in [
            ErrorKind::InvalidInput,
            ErrorKind::ToolTimeout,
            ErrorKind::TurnBudgetExceeded,
        ] {
            let v = serde_json::to_value(kind).unwrap();
            assert_eq!(v.as_str().unwrap(), kind.to_string());
        }
    }
}
