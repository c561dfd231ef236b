//! Keyword-overlap ATS compatibility scorer.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AtsScorerArgs {
    /// Plain-text resume.
    pub resume_text: String,
    /// Keywords extracted from the job description.
    pub jd_keywords: Vec<String>,
}

pub struct AtsScorerTool;

#[async_trait]
impl ToolHandler for AtsScorerTool {
    fn name(&self) -> &'static str {
        "score_ats"
    }

    fn description(&self) -> &'static str {
        "Score a resume against job description keywords the way an ATS filter would"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<AtsScorerArgs>()
    }

    async fn call(&self, args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        let args: AtsScorerArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;

        let resume = args.resume_text.to_lowercase();
        let mut matched = Vec::new();
        let mut missing = Vec::new();
        for keyword in &args.jd_keywords {
            let needle = keyword.to_lowercase();
            if !needle.is_empty() && resume.contains(&needle) {
                matched.push(keyword.clone());
            } else {
                missing.push(keyword.clone());
            }
        }

        let total = args.jd_keywords.len();
        let score = if total == 0 {
            0.0
        } else {
            matched.len() as f64 / total as f64
        };

        Ok(json!({
            "ok": true,
            "score": (score * 100.0).round() / 100.0,
            "matched": matched,
            "missing": missing,
        }))
    }
}
