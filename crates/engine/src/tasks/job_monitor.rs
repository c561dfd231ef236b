//! Periodic job-match scanner.

use super::{BackgroundTask, TaskContext};
use crate::error::{EngineError, EngineResult};
use crate::store::NotificationDraft;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct JobMonitorTask;

#[async_trait]
impl BackgroundTask for JobMonitorTask {
    fn kind(&self) -> &'static str {
        "job_monitor"
    }

    async fn run(&self, ctx: TaskContext<'_>) -> EngineResult<String> {
        let keywords: Vec<String> = ctx
            .config
            .get("keywords")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if keywords.is_empty() {
            return Err(EngineError::InvalidInput(
                "job_monitor requires a keywords list".into(),
            ));
        }

        let args = json!({
            "keywords": keywords,
            "max_results": ctx.config.get("max_results").cloned().unwrap_or(json!(10)),
        });
        let outcome = ctx.tools.invoke("search_jobs", &args, ctx.cancel).await;
        if !outcome.ok {
            return Err(EngineError::ToolFailed {
                tool: "search_jobs".into(),
                reason: outcome
                    .error
                    .map(|k| k.as_str().to_string())
                    .unwrap_or_else(|| "unknown".into()),
            });
        }

        let found = outcome
            .data
            .as_ref()
            .and_then(|d| d.get("total_found"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let subject = keywords.join(", ");

        if found > 0
            && !ctx
                .store
                .unread_exists(ctx.user, "job_match", &subject)
                .await?
        {
            ctx.notify(NotificationDraft {
                user_id: ctx.user,
                kind: "job_match".into(),
                title: "New job matches".into(),
                body: format!("Found {found} roles matching: {subject}."),
                payload: json!({"keywords": subject, "total_found": found}),
            })
            .await?;
        }

        Ok(format!("scanned boards for [{subject}], {found} matches"))
    }
}
