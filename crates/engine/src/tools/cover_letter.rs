//! Cover letter scaffold generator.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CoverLetterArgs {
    pub role: String,
    pub company: String,
    /// Strengths to foreground, usually from the match analysis.
    pub highlights: Vec<String>,
}

pub struct CoverLetterTool;

#[async_trait]
impl ToolHandler for CoverLetterTool {
    fn name(&self) -> &'static str {
        "draft_cover_letter"
    }

    fn description(&self) -> &'static str {
        "Draft a cover letter scaffold around the candidate's strongest matching points"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<CoverLetterArgs>()
    }

    async fn call(&self, args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        let args: CoverLetterArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;

        let bullet_block = if args.highlights.is_empty() {
            "- [add your strongest relevant achievement here]".to_string()
        } else {
            args.highlights
                .iter()
                .map(|h| format!("- {h}"))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let draft = format!(
            "Dear {company} hiring team,\n\n\
             I'm writing to apply for the {role} position. Three reasons I'm a strong fit:\n\
             {bullets}\n\n\
             I'd welcome the chance to talk about how I can contribute to {company}.\n\n\
             Best regards",
            company = args.company,
            role = args.role,
            bullets = bullet_block,
        );

        Ok(json!({
            "ok": true,
            "draft": draft,
            "highlight_count": args.highlights.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn draft_embeds_highlights() {
        let result = CoverLetterTool
            .call(
                json!({
                    "role": "Backend Engineer",
                    "company": "Harborview",
                    "highlights": ["Shipped a payments platform", "Led a team of 4"],
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let draft = result["draft"].as_str().unwrap();
        assert!(draft.contains("Harborview"));
        assert!(draft.contains("payments platform"));
        assert_eq!(result["highlight_count"], 2);
    }
}
