//! Background task runner.
//!
//! Periodic monitors and on-demand jobs that produce notifications and
//! push `task_update` events. Tasks are pluggable; three are built in:
//! the job-match scanner, the application-status reminder and the
//! on-demand company deep dive.

pub mod app_tracker;
pub mod company_deep_dive;
pub mod job_monitor;

pub use app_tracker::ApplicationTrackerTask;
pub use company_deep_dive::CompanyDeepDiveTask;
pub use job_monitor::JobMonitorTask;

use crate::error::{EngineError, EngineResult};
use crate::push::PushFabric;
use crate::store::{NotificationDraft, Store};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use careerflow_common::{EventKind, TaskConfig, TaskRun, TaskRunId, TaskStatus, UserId};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

/// Execution environment handed to a task.
pub struct TaskContext<'a> {
    pub user: UserId,
    pub config: &'a Value,
    pub settings: &'a TaskConfig,
    pub store: &'a dyn Store,
    pub tools: &'a ToolRegistry,
    pub cancel: &'a CancellationToken,
    fabric: &'a PushFabric,
}

impl TaskContext<'_> {
    /// Persist a notification and push it to the owning user's
    /// subscriptions immediately. Notifications created before a
    /// cancellation are kept.
    pub async fn notify(&self, draft: NotificationDraft) -> EngineResult<()> {
        let user = draft.user_id;
        let notification = self.store.create_notification(draft).await?;
        self.fabric.publish(
            user,
            EventKind::Notification {
                id: notification.id,
                kind: notification.kind,
                title: notification.title,
                body: notification.body,
            },
        );
        Ok(())
    }
}

/// A pluggable background job.
#[async_trait]
pub trait BackgroundTask: Send + Sync {
    fn kind(&self) -> &'static str;
    /// Run to completion, calling `ctx.notify` for each produced
    /// notification. Must observe `ctx.cancel` at natural boundaries.
    async fn run(&self, ctx: TaskContext<'_>) -> EngineResult<String>;
}

pub struct TaskRunner {
    store: Arc<dyn Store>,
    fabric: Arc<PushFabric>,
    tools: Arc<ToolRegistry>,
    config: TaskConfig,
    tasks: HashMap<&'static str, Arc<dyn BackgroundTask>>,
    cancels: StdMutex<HashMap<TaskRunId, CancellationToken>>,
}

impl TaskRunner {
    pub fn new(
        store: Arc<dyn Store>,
        fabric: Arc<PushFabric>,
        tools: Arc<ToolRegistry>,
        config: TaskConfig,
    ) -> Self {
        let mut runner = Self {
            store,
            fabric,
            tools,
            config,
            tasks: HashMap::new(),
            cancels: StdMutex::new(HashMap::new()),
        };
        runner.register(Arc::new(JobMonitorTask));
        runner.register(Arc::new(ApplicationTrackerTask));
        runner.register(Arc::new(CompanyDeepDiveTask));
        runner
    }

    /// Register a task type. Duplicate kinds are a wiring bug.
    pub fn register(&mut self, task: Arc<dyn BackgroundTask>) {
        let kind = task.kind();
        if self.tasks.insert(kind, task).is_some() {
            panic!("duplicate task registration: {kind}");
        }
    }

    /// One-shot execution. Returns the run id immediately; progress
    /// arrives as `task_update` events.
    pub async fn run_once(
        self: &Arc<Self>,
        user: UserId,
        kind: &str,
        config: Value,
    ) -> EngineResult<TaskRunId> {
        let task = self
            .tasks
            .get(kind)
            .cloned()
            .ok_or_else(|| EngineError::InvalidInput(format!("unknown task type: {kind}")))?;

        let run = TaskRun {
            id: TaskRunId::new(),
            user_id: user,
            kind: kind.to_string(),
            config: config.clone(),
            status: TaskStatus::Pending,
            summary: None,
            created_at: Utc::now(),
            finished_at: None,
        };
        let run_id = run.id;
        self.store.insert_task_run(run).await?;

        let cancel = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(run_id, cancel.clone());

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.drive(run_id, user, task, config, cancel).await;
            runner
                .cancels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&run_id);
        });

        Ok(run_id)
    }

    /// Interval scheduling for periodic task types. The returned token
    /// stops the schedule; each firing is an independent run.
    pub fn schedule(
        self: &Arc<Self>,
        user: UserId,
        kind: &'static str,
        interval: Duration,
        config: Value,
    ) -> CancellationToken {
        let stop = CancellationToken::new();
        let runner = Arc::clone(self);
        let schedule_stop = stop.clone();
        tokio::spawn(async move {
            loop {
                // Jitter keeps a fleet of schedules from firing in lockstep.
                let jitter = rand::thread_rng()
                    .gen_range(0..interval.as_millis().max(1) / 10 + 1)
                    as u64;
                let sleep = interval + Duration::from_millis(jitter);
                tokio::select! {
                    _ = schedule_stop.cancelled() => break,
                    _ = tokio::time::sleep(sleep) => {}
                }
                if let Err(err) = runner.run_once(user, kind, config.clone()).await {
                    warn!(%user, kind, error = %err, "scheduled task failed to start");
                }
            }
            info!(%user, kind, "task schedule stopped");
        });
        stop
    }

    /// Cancel a running task. Already-produced notifications are kept.
    pub fn cancel(&self, run_id: TaskRunId) {
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancels.get(&run_id) {
            token.cancel();
        }
    }

    #[instrument(skip_all, fields(run = %run_id, kind = task.kind()))]
    async fn drive(
        &self,
        run_id: TaskRunId,
        user: UserId,
        task: Arc<dyn BackgroundTask>,
        config: Value,
        cancel: CancellationToken,
    ) {
        let _ = self
            .store
            .update_task_run(run_id, TaskStatus::Running, None)
            .await;
        self.fabric.publish(
            user,
            EventKind::TaskUpdate {
                task_id: run_id,
                status: TaskStatus::Running,
                summary: None,
            },
        );

        let ctx = TaskContext {
            user,
            config: &config,
            settings: &self.config,
            store: self.store.as_ref(),
            tools: &self.tools,
            cancel: &cancel,
            fabric: &self.fabric,
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            result = task.run(ctx) => result,
        };

        let (status, summary) = match outcome {
            Ok(summary) => (TaskStatus::Completed, Some(summary)),
            Err(EngineError::Cancelled) => (TaskStatus::Cancelled, Some("cancelled".into())),
            Err(err) => {
                warn!(error = %err, "task failed");
                (TaskStatus::Failed, Some(err.to_string()))
            }
        };

        let _ = self
            .store
            .update_task_run(run_id, status, summary.clone())
            .await;
        self.fabric.publish(
            user,
            EventKind::TaskUpdate {
                task_id: run_id,
                status,
                summary,
            },
        );
    }
}
