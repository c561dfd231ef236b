//! In-memory store for tests and default wiring.

use super::{
    ApplicationStore, ConversationStore, GoalStore, NewStep, NotificationDraft, NotificationStore,
    TaskRunStore, TraceStore,
};
use crate::error::{EngineError, EngineResult};
use crate::trace::Trace;
use async_trait::async_trait;
use careerflow_common::{
    Application, ApplicationStatus, Conversation, ConversationId, Goal, GoalId, GoalStatus,
    Message, Notification, NotificationId, Rating, Role, Step, StepId, StepStatus, TaskRun,
    TaskRunId, TaskStatus, TraceId, UserId,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<ConversationId, Vec<Message>>,
    goals: HashMap<GoalId, Goal>,
    steps: HashMap<GoalId, Vec<Step>>,
    traces: HashMap<TraceId, Trace>,
    notifications: HashMap<UserId, Vec<Notification>>,
    task_runs: HashMap<TaskRunId, TaskRun>,
    applications: HashMap<Uuid, Application>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, user: UserId, title: &str) -> EngineResult<Conversation> {
        let now = Utc::now();
        let conversation = Conversation {
            id: ConversationId::new(),
            user_id: user,
            title: title.to_string(),
            created_at: now,
            updated_at: now,
        };
        let mut inner = self.inner.write().await;
        inner.conversations.insert(conversation.id, conversation.clone());
        inner.messages.insert(conversation.id, Vec::new());
        Ok(conversation)
    }

    async fn conversation(&self, id: ConversationId) -> EngineResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn append_message(
        &self,
        conversation: ConversationId,
        role: Role,
        content: &str,
    ) -> EngineResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&conversation) {
            return Err(EngineError::InvalidInput(format!(
                "unknown conversation: {conversation}"
            )));
        }
        let messages = inner.messages.entry(conversation).or_default();
        let ordinal = messages.last().map(|m| m.ordinal + 1).unwrap_or(1);
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: conversation,
            ordinal,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        messages.push(message.clone());
        if let Some(record) = inner.conversations.get_mut(&conversation) {
            record.updated_at = message.created_at;
        }
        Ok(message)
    }

    async fn messages(&self, conversation: ConversationId) -> EngineResult<Vec<Message>> {
        Ok(self
            .inner
            .read()
            .await
            .messages
            .get(&conversation)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl GoalStore for MemoryStore {
    async fn create_goal(
        &self,
        user: UserId,
        title: &str,
        description: &str,
        steps: Vec<NewStep>,
    ) -> EngineResult<(Goal, Vec<Step>)> {
        let now = Utc::now();
        let goal = Goal {
            id: GoalId::new(),
            user_id: user,
            title: title.to_string(),
            description: description.to_string(),
            status: GoalStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let records: Vec<Step> = steps
            .into_iter()
            .enumerate()
            .map(|(index, step)| Step {
                id: StepId::new(),
                goal_id: goal.id,
                ordinal: index as u32 + 1,
                title: step.title,
                description: step.description,
                agent: step.agent,
                kind: step.kind,
                status: StepStatus::Pending,
                output: None,
                trace_id: None,
                created_at: now,
                completed_at: None,
            })
            .collect();

        let mut inner = self.inner.write().await;
        inner.goals.insert(goal.id, goal.clone());
        inner.steps.insert(goal.id, records.clone());
        Ok((goal, records))
    }

    async fn goal(&self, id: GoalId) -> EngineResult<Option<Goal>> {
        Ok(self.inner.read().await.goals.get(&id).cloned())
    }

    async fn goals_for_user(&self, user: UserId) -> EngineResult<Vec<Goal>> {
        Ok(self
            .inner
            .read()
            .await
            .goals
            .values()
            .filter(|g| g.user_id == user)
            .cloned()
            .collect())
    }

    async fn steps(&self, goal: GoalId) -> EngineResult<Vec<Step>> {
        let mut steps = self
            .inner
            .read()
            .await
            .steps
            .get(&goal)
            .cloned()
            .unwrap_or_default();
        steps.sort_by_key(|s| s.ordinal);
        Ok(steps)
    }

    async fn next_pending_step(&self, goal: GoalId) -> EngineResult<Option<Step>> {
        let steps = self.steps(goal).await?;
        Ok(steps
            .into_iter()
            .find(|s| s.status == StepStatus::Pending))
    }

    async fn update_step(
        &self,
        step: StepId,
        status: StepStatus,
        output: Option<String>,
        trace: Option<TraceId>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        for steps in inner.steps.values_mut() {
            if let Some(record) = steps.iter_mut().find(|s| s.id == step) {
                record.status = status;
                if output.is_some() {
                    record.output = output;
                }
                if trace.is_some() {
                    record.trace_id = trace;
                }
                if status.is_terminal() {
                    record.completed_at = Some(Utc::now());
                }
                return Ok(());
            }
        }
        Err(EngineError::InvalidInput(format!("unknown step: {step}")))
    }

    async fn modify_step(&self, step: StepId, title: &str, description: &str) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        for steps in inner.steps.values_mut() {
            if let Some(record) = steps.iter_mut().find(|s| s.id == step) {
                if !title.is_empty() {
                    record.title = title.to_string();
                }
                if !description.is_empty() {
                    record.description = description.to_string();
                }
                return Ok(());
            }
        }
        Err(EngineError::InvalidInput(format!("unknown step: {step}")))
    }

    async fn insert_step(&self, goal: GoalId, ordinal: u32, step: NewStep) -> EngineResult<Step> {
        let mut inner = self.inner.write().await;
        let steps = inner
            .steps
            .get_mut(&goal)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown goal: {goal}")))?;

        for record in steps.iter_mut() {
            if record.status == StepStatus::Pending && record.ordinal >= ordinal {
                record.ordinal += 1;
            }
        }
        let record = Step {
            id: StepId::new(),
            goal_id: goal,
            ordinal,
            title: step.title,
            description: step.description,
            agent: step.agent,
            kind: step.kind,
            status: StepStatus::Pending,
            output: None,
            trace_id: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        steps.push(record.clone());
        Ok(record)
    }

    async fn update_goal_status(&self, goal: GoalId, status: GoalStatus) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let record = inner
            .goals
            .get_mut(&goal)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown goal: {goal}")))?;
        record.status = status;
        record.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl TraceStore for MemoryStore {
    async fn insert_trace(&self, trace: Trace) -> EngineResult<()> {
        self.inner.write().await.traces.insert(trace.id, trace);
        Ok(())
    }

    async fn trace(&self, id: TraceId) -> EngineResult<Option<Trace>> {
        Ok(self.inner.read().await.traces.get(&id).cloned())
    }

    async fn set_feedback(&self, id: TraceId, rating: Rating) -> EngineResult<bool> {
        let mut inner = self.inner.write().await;
        let trace = inner
            .traces
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown trace: {id}")))?;
        Ok(trace.set_feedback(rating))
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create_notification(&self, draft: NotificationDraft) -> EngineResult<Notification> {
        let notification = Notification {
            id: NotificationId::new(),
            user_id: draft.user_id,
            kind: draft.kind,
            title: draft.title,
            body: draft.body,
            payload: draft.payload,
            read: false,
            created_at: Utc::now(),
        };
        self.inner
            .write()
            .await
            .notifications
            .entry(notification.user_id)
            .or_default()
            .push(notification.clone());
        Ok(notification)
    }

    async fn unread_exists(&self, user: UserId, kind: &str, subject: &str) -> EngineResult<bool> {
        Ok(self
            .inner
            .read()
            .await
            .notifications
            .get(&user)
            .map(|list| {
                list.iter().any(|n| {
                    !n.read
                        && n.kind == kind
                        && (n.body.contains(subject) || n.payload.to_string().contains(subject))
                })
            })
            .unwrap_or(false))
    }

    async fn notifications(&self, user: UserId) -> EngineResult<Vec<Notification>> {
        Ok(self
            .inner
            .read()
            .await
            .notifications
            .get(&user)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_read(&self, user: UserId, id: NotificationId) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(list) = inner.notifications.get_mut(&user) {
            if let Some(notification) = list.iter_mut().find(|n| n.id == id) {
                notification.read = true;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRunStore for MemoryStore {
    async fn insert_task_run(&self, run: TaskRun) -> EngineResult<()> {
        self.inner.write().await.task_runs.insert(run.id, run);
        Ok(())
    }

    async fn update_task_run(
        &self,
        id: TaskRunId,
        status: TaskStatus,
        summary: Option<String>,
    ) -> EngineResult<()> {
        let mut inner = self.inner.write().await;
        let run = inner
            .task_runs
            .get_mut(&id)
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown task run: {id}")))?;
        run.status = status;
        if summary.is_some() {
            run.summary = summary;
        }
        if matches!(
            status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        ) {
            run.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn task_run(&self, id: TaskRunId) -> EngineResult<Option<TaskRun>> {
        Ok(self.inner.read().await.task_runs.get(&id).cloned())
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn upsert_application(&self, application: Application) -> EngineResult<()> {
        self.inner
            .write()
            .await
            .applications
            .insert(application.id, application);
        Ok(())
    }

    async fn stale_applications(
        &self,
        user: UserId,
        status: ApplicationStatus,
        older_than: DateTime<Utc>,
    ) -> EngineResult<Vec<Application>> {
        Ok(self
            .inner
            .read()
            .await
            .applications
            .values()
            .filter(|a| a.user_id == user && a.status == status && a.updated_at < older_than)
            .cloned()
            .collect())
    }
}
