//! Job description parser.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;

const SECTION_HEADINGS: &[(&str, &str)] = &[
    ("responsibilities", "responsibilities"),
    ("requirements", "requirements"),
    ("qualifications", "requirements"),
    ("benefits", "benefits"),
    ("about", "about"),
];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JdParserArgs {
    /// Raw job description text.
    pub source: String,
}

pub struct JdParserTool;

#[async_trait]
impl ToolHandler for JdParserTool {
    fn name(&self) -> &'static str {
        "parse_jd"
    }

    fn description(&self) -> &'static str {
        "Split a job description into sections and extract salient keywords"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<JdParserArgs>()
    }

    async fn call(&self, args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        let args: JdParserArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;
        if args.source.trim().is_empty() {
            return Err(EngineError::ToolFailed {
                tool: "parse_jd".into(),
                reason: "empty job description".into(),
            });
        }

        let sections = split_sections(&args.source);
        let keywords = extract_keywords(&args.source, 30);

        Ok(json!({
            "ok": true,
            "sections": sections,
            "keywords": keywords,
        }))
    }
}

fn split_sections(text: &str) -> BTreeMap<String, String> {
    let mut sections: BTreeMap<String, String> = BTreeMap::new();
    let mut current = "summary".to_string();

    for line in text.lines() {
        let lowered = line.trim().to_lowercase();
        let heading = SECTION_HEADINGS
            .iter()
            .find(|(marker, _)| lowered.starts_with(marker) && lowered.len() < 40);
        if let Some((_, canonical)) = heading {
            current = (*canonical).to_string();
            continue;
        }
        if !line.trim().is_empty() {
            let entry = sections.entry(current.clone()).or_default();
            if !entry.is_empty() {
                entry.push('\n');
            }
            entry.push_str(line.trim());
        }
    }

    sections
}

fn extract_keywords(text: &str, limit: usize) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    let mut keywords = Vec::new();
    for word in text.split_whitespace() {
        let cleaned: String = word
            .trim_matches(|c: char| !c.is_alphanumeric())
            .to_lowercase();
        if cleaned.len() > 3 && seen.insert(cleaned.clone()) {
            keywords.push(cleaned);
            if keywords.len() >= limit {
                break;
            }
        }
    }
    keywords
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn splits_headed_sections() {
        let jd = "Backend role.\nRequirements\n5 years Rust\nBenefits\nRemote work";
        let result = JdParserTool
            .call(json!({"source": jd}), &CancellationToken::new())
            .await
            .unwrap();
        assert!(result["sections"]["requirements"]
            .as_str()
            .unwrap()
            .contains("Rust"));
        assert!(result["sections"]["benefits"]
            .as_str()
            .unwrap()
            .contains("Remote"));
    }

    #[tokio::test]
    async fn empty_source_fails() {
        let result = JdParserTool
            .call(json!({"source": "  "}), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(EngineError::ToolFailed { .. })));
    }

    #[test]
    fn keywords_are_deduplicated() {
        let words = extract_keywords("rust rust tokio backend backend", 10);
        assert_eq!(words, vec!["rust", "tokio", "backend"]);
    }
}
