//! Job board search tool.
//!
//! Queries the Remotive public board and falls back to a curated sample
//! set when the board is unreachable, so the pipeline stays demonstrable
//! offline.

use super::{schema_of, ToolEffect, ToolHandler};
use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

const REMOTIVE_URL: &str = "https://remotive.com/api/remote-jobs";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct JobSearchArgs {
    /// Keywords to match against title and description.
    pub keywords: Vec<String>,
    /// Cap on returned listings.
    pub max_results: Option<u32>,
}

pub struct JobSearchTool {
    http: reqwest::Client,
}

impl JobSearchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_board(&self, query: &str) -> Option<Vec<Value>> {
        let response = self
            .http
            .get(REMOTIVE_URL)
            .query(&[("search", query)])
            .send()
            .await
            .ok()?
            .error_for_status()
            .ok()?;
        let payload: Value = response.json().await.ok()?;
        let jobs = payload.get("jobs")?.as_array()?.clone();
        Some(
            jobs.into_iter()
                .map(|job| {
                    json!({
                        "title": job["title"],
                        "company": job["company_name"],
                        "location": job["candidate_required_location"],
                        "url": job["url"],
                        "source": "remotive",
                    })
                })
                .collect(),
        )
    }
}

impl Default for JobSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolHandler for JobSearchTool {
    fn name(&self) -> &'static str {
        "search_jobs"
    }

    fn description(&self) -> &'static str {
        "Search remote job boards by keyword and return matching listings"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::External
    }

    fn parameters(&self) -> Value {
        schema_of::<JobSearchArgs>()
    }

    async fn call(&self, args: Value, cancel: &CancellationToken) -> EngineResult<Value> {
        let args: JobSearchArgs = serde_json::from_value(args)
            .map_err(|e| EngineError::internal(format!("validated args failed to parse: {e}")))?;
        let max_results = args.max_results.unwrap_or(10) as usize;
        let query = args.keywords.join(" ");

        let listings = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            fetched = self.fetch_board(&query) => fetched,
        };

        let mut jobs = match listings {
            Some(jobs) => jobs,
            None => {
                debug!("job board unreachable, serving sample listings");
                sample_listings(&args.keywords)
            }
        };
        jobs.truncate(max_results);

        Ok(json!({
            "ok": true,
            "total_found": jobs.len(),
            "jobs": jobs,
        }))
    }
}

fn sample_listings(keywords: &[String]) -> Vec<Value> {
    let tag = keywords.first().map(String::as_str).unwrap_or("software");
    vec![
        json!({
            "title": format!("Senior {tag} Engineer"),
            "company": "Lumenware",
            "location": "Remote (worldwide)",
            "url": "https://example.com/jobs/1",
            "source": "sample",
        }),
        json!({
            "title": format!("{tag} Developer"),
            "company": "Northbeam Labs",
            "location": "Remote (EU)",
            "url": "https://example.com/jobs/2",
            "source": "sample",
        }),
        json!({
            "title": format!("Staff {tag} Engineer"),
            "company": "Harborview",
            "location": "Remote (US)",
            "url": "https://example.com/jobs/3",
            "source": "sample",
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_listings_reflect_keywords() {
        let jobs = sample_listings(&["rust".to_string()]);
        assert_eq!(jobs.len(), 3);
        assert!(jobs[0]["title"].as_str().unwrap().contains("rust"));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let tool = JobSearchTool::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = tool
            .call(json!({"keywords": ["rust"]}), &cancel)
            .await;
        assert!(matches!(result, Err(EngineError::Cancelled)));
    }
}
