//! Persistence contracts.
//!
//! The relational layer is an external collaborator; the engine depends
//! only on these traits. [`memory::MemoryStore`] implements all of them
//! for tests and default wiring.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::EngineResult;
use crate::trace::Trace;
use async_trait::async_trait;
use careerflow_common::{
    Application, ApplicationStatus, Conversation, ConversationId, Goal, GoalId, GoalStatus,
    Message, Notification, Rating, Role, Step, StepId, StepKind, StepStatus, TaskRun, TaskRunId,
    TaskStatus, TraceId, UserId,
};
use chrono::{DateTime, Utc};

/// Step payload for plan creation and re-planning.
#[derive(Debug, Clone)]
pub struct NewStep {
    pub title: String,
    pub description: String,
    pub agent: String,
    pub kind: StepKind,
}

/// Notification payload before the store assigns identity.
#[derive(Debug, Clone)]
pub struct NotificationDraft {
    pub user_id: UserId,
    pub kind: String,
    pub title: String,
    pub body: String,
    pub payload: serde_json::Value,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn create_conversation(&self, user: UserId, title: &str) -> EngineResult<Conversation>;
    async fn conversation(&self, id: ConversationId) -> EngineResult<Option<Conversation>>;
    /// Appends with the next strictly increasing ordinal.
    async fn append_message(
        &self,
        conversation: ConversationId,
        role: Role,
        content: &str,
    ) -> EngineResult<Message>;
    async fn messages(&self, conversation: ConversationId) -> EngineResult<Vec<Message>>;
}

#[async_trait]
pub trait GoalStore: Send + Sync {
    async fn create_goal(
        &self,
        user: UserId,
        title: &str,
        description: &str,
        steps: Vec<NewStep>,
    ) -> EngineResult<(Goal, Vec<Step>)>;
    async fn goal(&self, id: GoalId) -> EngineResult<Option<Goal>>;
    async fn goals_for_user(&self, user: UserId) -> EngineResult<Vec<Goal>>;
    async fn steps(&self, goal: GoalId) -> EngineResult<Vec<Step>>;
    async fn next_pending_step(&self, goal: GoalId) -> EngineResult<Option<Step>>;
    async fn update_step(
        &self,
        step: StepId,
        status: StepStatus,
        output: Option<String>,
        trace: Option<TraceId>,
    ) -> EngineResult<()>;
    async fn modify_step(&self, step: StepId, title: &str, description: &str) -> EngineResult<()>;
    /// Insert a new pending step at `ordinal`, shifting later pending
    /// steps up by one.
    async fn insert_step(&self, goal: GoalId, ordinal: u32, step: NewStep) -> EngineResult<Step>;
    async fn update_goal_status(&self, goal: GoalId, status: GoalStatus) -> EngineResult<()>;
}

#[async_trait]
pub trait TraceStore: Send + Sync {
    async fn insert_trace(&self, trace: Trace) -> EngineResult<()>;
    async fn trace(&self, id: TraceId) -> EngineResult<Option<Trace>>;
    /// First recording wins; returns whether this call recorded it.
    async fn set_feedback(&self, id: TraceId, rating: Rating) -> EngineResult<bool>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create_notification(&self, draft: NotificationDraft) -> EngineResult<Notification>;
    /// Dedup guard: an unread notification of this kind mentioning
    /// `subject` already exists for the user.
    async fn unread_exists(&self, user: UserId, kind: &str, subject: &str) -> EngineResult<bool>;
    async fn notifications(&self, user: UserId) -> EngineResult<Vec<Notification>>;
    async fn mark_read(&self, user: UserId, id: careerflow_common::NotificationId)
        -> EngineResult<()>;
}

#[async_trait]
pub trait TaskRunStore: Send + Sync {
    async fn insert_task_run(&self, run: TaskRun) -> EngineResult<()>;
    async fn update_task_run(
        &self,
        id: TaskRunId,
        status: TaskStatus,
        summary: Option<String>,
    ) -> EngineResult<()>;
    async fn task_run(&self, id: TaskRunId) -> EngineResult<Option<TaskRun>>;
}

#[async_trait]
pub trait ApplicationStore: Send + Sync {
    async fn upsert_application(&self, application: Application) -> EngineResult<()>;
    async fn stale_applications(
        &self,
        user: UserId,
        status: ApplicationStatus,
        older_than: DateTime<Utc>,
    ) -> EngineResult<Vec<Application>>;
}

/// The full persistence surface the engine is wired with.
pub trait Store:
    ConversationStore + GoalStore + TraceStore + NotificationStore + TaskRunStore + ApplicationStore
{
}

impl<T> Store for T where
    T: ConversationStore
        + GoalStore
        + TraceStore
        + NotificationStore
        + TaskRunStore
        + ApplicationStore
{
}
