//! Interview question pack generator.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct InterviewPrepArgs {
    pub role: String,
    pub company: String,
    /// Skills to probe, usually the gaps from the match analysis.
    pub focus_skills: Option<Vec<String>>,
}

pub struct InterviewPrepTool;

#[async_trait]
impl ToolHandler for InterviewPrepTool {
    fn name(&self) -> &'static str {
        "prep_interview"
    }

    fn description(&self) -> &'static str {
        "Generate likely interview questions with talking points for a role"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<InterviewPrepArgs>()
    }

    async fn call(&self, args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        let args: InterviewPrepArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;

        let role = &args.role;
        let company = &args.company;
        let mut questions = vec![
            json!({
                "question": format!("Why do you want to work at {company}?"),
                "talking_point": "Tie a concrete product or engineering decision of theirs to your own experience.",
            }),
            json!({
                "question": format!("Walk me through a project relevant to the {role} role."),
                "talking_point": "Pick one project; lead with the outcome, then the constraint you worked around.",
            }),
            json!({
                "question": "Tell me about a time a project went sideways.",
                "talking_point": "Describe the recovery, not the blame; end with the process change.",
            }),
        ];

        for skill in args.focus_skills.unwrap_or_default() {
            questions.push(json!({
                "question": format!("How deep is your experience with {skill}?"),
                "talking_point": format!("Have one specific {skill} war story ready with numbers."),
            }));
        }

        Ok(json!({
            "ok": true,
            "role": role,
            "company": company,
            "questions": questions,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn focus_skills_add_questions() {
        let result = InterviewPrepTool
            .call(
                json!({
                    "role": "Platform Engineer",
                    "company": "Lumenware",
                    "focus_skills": ["kubernetes"],
                }),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        let questions = result["questions"].as_array().unwrap();
        assert_eq!(questions.len(), 4);
        assert!(questions[3]["question"]
            .as_str()
            .unwrap()
            .contains("kubernetes"));
    }
}
