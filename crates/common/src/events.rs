//! Turn and push event model.
//!
//! Events are identified on the wire solely by their `type` tag; unknown
//! kinds must be ignored by consumers. The envelope adds the
//! per-subscription sequence number, so the serialized form is
//! `{"type": ..., "seq": ..., ...fields}`.

use crate::error::ErrorKind;
use crate::types::{
    ConversationId, NotificationId, StepStatus, TaskRunId, TaskStatus, TraceId,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Complete,
    Failed,
}

/// Every event kind the core emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ConversationId {
        conversation_id: ConversationId,
    },
    Routing {
        intent: String,
        agents: Vec<String>,
        confidence: f64,
    },
    AgentStatus {
        agent: String,
        status: AgentStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    AgentReasoning {
        agent: String,
        thought: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
    },
    ToolStatus {
        tool: String,
        ok: bool,
        latency_ms: u64,
    },
    Evaluator {
        decision: String,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        target_agent: Option<String>,
    },
    NegotiationRound {
        round: u32,
        agent: String,
        stance: String,
        position: String,
        confidence: f64,
    },
    NegotiationResult {
        consensus: bool,
        position: String,
        confidence: f64,
        dissenting_views: Vec<String>,
        rounds_taken: u32,
    },
    Content {
        text: String,
    },
    TraceIds {
        ids: Vec<TraceId>,
    },
    Done,
    GoalStepStart {
        step_number: u32,
        title: String,
        agent: String,
    },
    GoalStepComplete {
        step_number: u32,
        status: StepStatus,
        output_preview: String,
    },
    GoalReplan {
        adjustment: String,
        reason: String,
    },
    Notification {
        id: NotificationId,
        kind: String,
        title: String,
        body: String,
    },
    TaskUpdate {
        task_id: TaskRunId,
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
    },
    Pong,
    Error {
        kind: ErrorKind,
        message: String,
    },
}

impl EventKind {
    /// The wire `type` tag, usable for logging and test assertions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConversationId { .. } => "conversation_id",
            Self::Routing { .. } => "routing",
            Self::AgentStatus { .. } => "agent_status",
            Self::AgentReasoning { .. } => "agent_reasoning",
            Self::ToolStatus { .. } => "tool_status",
            Self::Evaluator { .. } => "evaluator",
            Self::NegotiationRound { .. } => "negotiation_round",
            Self::NegotiationResult { .. } => "negotiation_result",
            Self::Content { .. } => "content",
            Self::TraceIds { .. } => "trace_ids",
            Self::Done => "done",
            Self::GoalStepStart { .. } => "goal_step_start",
            Self::GoalStepComplete { .. } => "goal_step_complete",
            Self::GoalReplan { .. } => "goal_replan",
            Self::Notification { .. } => "notification",
            Self::TaskUpdate { .. } => "task_update",
            Self::Pong => "pong",
            Self::Error { .. } => "error",
        }
    }
}

/// Wire envelope: event payload plus the per-subscription sequence number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    #[serde(flatten)]
    pub event: EventKind,
}
