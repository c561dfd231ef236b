//! On-demand company research task.

use super::{BackgroundTask, TaskContext};
use crate::error::{EngineError, EngineResult};
use crate::store::NotificationDraft;
use async_trait::async_trait;
use serde_json::{json, Value};

pub struct CompanyDeepDiveTask;

#[async_trait]
impl BackgroundTask for CompanyDeepDiveTask {
    fn kind(&self) -> &'static str {
        "company_deep_dive"
    }

    async fn run(&self, ctx: TaskContext<'_>) -> EngineResult<String> {
        let Some(company) = ctx.config.get("company").and_then(Value::as_str) else {
            return Err(EngineError::InvalidInput(
                "company_deep_dive requires a company name".into(),
            ));
        };

        let mut args = json!({"company": company});
        if let Some(role) = ctx.config.get("role").and_then(Value::as_str) {
            args["role"] = json!(role);
        }

        let outcome = ctx.tools.invoke("research_company", &args, ctx.cancel).await;
        if !outcome.ok {
            return Err(EngineError::ToolFailed {
                tool: "research_company".into(),
                reason: outcome
                    .error
                    .map(|k| k.as_str().to_string())
                    .unwrap_or_else(|| "unknown".into()),
            });
        }

        let angle_count = outcome
            .data
            .as_ref()
            .and_then(|d| d.get("angles"))
            .and_then(Value::as_array)
            .map(Vec::len)
            .unwrap_or(0);

        ctx.notify(NotificationDraft {
            user_id: ctx.user,
            kind: "company_research".into(),
            title: format!("Research ready: {company}"),
            body: format!("Deep dive on {company} finished with {angle_count} angles to review."),
            payload: outcome.data.unwrap_or(Value::Null),
        })
        .await?;

        Ok(format!("deep dive on {company} complete"))
    }
}
