//! Application-status reminder sweep.
//!
//! Flags applications stuck in `applied` and active goals with pending
//! steps but no recent progress.

use super::{BackgroundTask, TaskContext};
use crate::error::EngineResult;
use crate::store::NotificationDraft;
use async_trait::async_trait;
use careerflow_common::{ApplicationStatus, GoalStatus, StepStatus};
use chrono::{Duration, Utc};
use serde_json::json;

pub struct ApplicationTrackerTask;

#[async_trait]
impl BackgroundTask for ApplicationTrackerTask {
    fn kind(&self) -> &'static str {
        "application_tracker"
    }

    async fn run(&self, ctx: TaskContext<'_>) -> EngineResult<String> {
        let mut reminders = 0usize;

        // Applications sitting in "applied" past the staleness window.
        let cutoff = Utc::now() - Duration::days(ctx.settings.application_stale_days);
        let stale = ctx
            .store
            .stale_applications(ctx.user, ApplicationStatus::Applied, cutoff)
            .await?;
        for application in stale {
            let subject = application.id.to_string();
            if ctx
                .store
                .unread_exists(ctx.user, "application_reminder", &subject)
                .await?
            {
                continue;
            }
            ctx.notify(NotificationDraft {
                user_id: ctx.user,
                kind: "application_reminder".into(),
                title: "Follow up on application".into(),
                body: format!(
                    "Your application for \"{}\" at {} has been in \"applied\" status for over {} days.",
                    application.job_title, application.company, ctx.settings.application_stale_days,
                ),
                payload: json!({"application_id": subject}),
            })
            .await?;
            reminders += 1;
        }

        // Active goals with pending steps and no recent completion.
        let stall_cutoff = Utc::now() - Duration::hours(ctx.settings.goal_stall_hours);
        for goal in ctx.store.goals_for_user(ctx.user).await? {
            if ctx.cancel.is_cancelled() {
                break;
            }
            if goal.status != GoalStatus::Active {
                continue;
            }
            let steps = ctx.store.steps(goal.id).await?;
            let has_pending = steps.iter().any(|s| s.status == StepStatus::Pending);
            let last_activity = steps
                .iter()
                .filter_map(|s| s.completed_at)
                .max()
                .unwrap_or(goal.created_at);
            if !has_pending || last_activity > stall_cutoff {
                continue;
            }

            let subject = goal.id.to_string();
            if ctx
                .store
                .unread_exists(ctx.user, "goal_stalled", &subject)
                .await?
            {
                continue;
            }
            ctx.notify(NotificationDraft {
                user_id: ctx.user,
                kind: "goal_stalled".into(),
                title: "Goal needs attention".into(),
                body: format!(
                    "Your goal \"{}\" has pending steps with no progress in {}+ hours.",
                    goal.title, ctx.settings.goal_stall_hours,
                ),
                payload: json!({"goal_id": subject}),
            })
            .await?;
            reminders += 1;
        }

        Ok(format!("reminder sweep produced {reminders} notifications"))
    }
}
