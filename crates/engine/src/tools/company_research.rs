//! Company research brief builder.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CompanyResearchArgs {
    pub company: String,
    /// Optional role to angle the brief towards.
    pub role: Option<String>,
}

pub struct CompanyResearchTool;

#[async_trait]
impl ToolHandler for CompanyResearchTool {
    fn name(&self) -> &'static str {
        "research_company"
    }

    fn description(&self) -> &'static str {
        "Assemble a research brief on a company: angles to probe, questions to ask"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<CompanyResearchArgs>()
    }

    async fn call(&self, args: Value, cancel: &CancellationToken) -> EngineResult<Value> {
        if cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        let args: CompanyResearchArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;
        if args.company.trim().is_empty() {
            return Err(EngineError::ToolFailed {
                tool: "research_company".into(),
                reason: "company name required".into(),
            });
        }

        let company = args.company.trim();
        let role = args.role.as_deref().unwrap_or("the role");
        Ok(json!({
            "ok": true,
            "company": company,
            "angles": [
                format!("Recent funding, growth signals and headcount direction at {company}"),
                format!("Engineering culture and public tech blog posture of {company}"),
                format!("How {role} fits the org chart and who it reports to"),
            ],
            "questions": [
                format!("What does success in {role} look like after 90 days?"),
                format!("What is the biggest technical bet {company} is making this year?"),
            ],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn brief_mentions_company_and_role() {
        let result = CompanyResearchTool
            .call(
                json!({"company": "Northbeam", "role": "Staff Engineer"}),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let angles = result["angles"].as_array().unwrap();
        assert!(angles[0].as_str().unwrap().contains("Northbeam"));
        assert!(angles[2].as_str().unwrap().contains("Staff Engineer"));
    }

    #[tokio::test]
    async fn blank_company_fails() {
        let result = CompanyResearchTool
            .call(json!({"company": " "}), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(EngineError::ToolFailed { .. })));
    }
}
