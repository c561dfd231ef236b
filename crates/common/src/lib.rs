//! Shared foundation for the CareerFlow multi-agent runtime.
//!
//! Everything the engine and any transport layer need to agree on lives
//! here: identifier newtypes and the conversation/goal data model, the
//! turn-event model with its wire envelope, system configuration, and the
//! `LlmProvider` capability interface.

pub mod config;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod types;

pub use config::{
    AgentConfig, GoalConfig, IntentRoute, LlmConfig, NegotiationConfig, PushConfig, RouterConfig,
    RuntimeConfig, SystemConfig, TaskConfig, TurnConfig,
};
pub use error::ErrorKind;
pub use events::{AgentStatus, Envelope, EventKind};
pub use llm::{ChatMessage, ChatRole, CompletionRequest, HttpProvider, LlmError, LlmProvider};
pub use types::{
    AgentReport, Application, ApplicationStatus, Attachment, Conversation, ConversationId,
    Feedback, Goal, GoalId, GoalStatus, Message, Notification, NotificationId, Rating, Role, Step,
    StepId, StepKind, StepStatus, SubscriptionId, TaskRun, TaskRunId, TaskStatus, TraceId, UserId,
};
