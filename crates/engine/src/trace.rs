//! Append-only execution traces.
//!
//! One trace records one agent execution inside a turn or goal step:
//! the sequence of (thought, tool, result digest) rows plus terminal
//! status and latency. Rows are never mutated once appended; user
//! feedback may be attached later, at most once.

use careerflow_common::{Feedback, Rating, TraceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub thought: String,
    pub tool: Option<String>,
    pub result_digest: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub id: TraceId,
    pub agent: String,
    pub inputs_digest: String,
    pub entries: Vec<TraceEntry>,
    pub status: TraceStatus,
    pub latency_ms: u64,
    pub feedback: Option<Feedback>,
    pub created_at: DateTime<Utc>,
}

impl Trace {
    pub fn start(agent: impl Into<String>, inputs: &str) -> Self {
        Self {
            id: TraceId::new(),
            agent: agent.into(),
            inputs_digest: digest(inputs),
            entries: Vec::new(),
            status: TraceStatus::Running,
            latency_ms: 0,
            feedback: None,
            created_at: Utc::now(),
        }
    }

    /// Append one reasoning row. Rows are append-only by construction:
    /// nothing in the engine exposes mutable access to earlier entries.
    pub fn record(&mut self, thought: impl Into<String>, tool: Option<&str>, result: Option<&str>) {
        self.entries.push(TraceEntry {
            thought: thought.into(),
            tool: tool.map(str::to_string),
            result_digest: result.map(digest),
        });
    }

    pub fn finish(&mut self, status: TraceStatus, latency_ms: u64) {
        self.status = status;
        self.latency_ms = latency_ms;
    }

    /// Attach feedback. Returns false when feedback was already present;
    /// the first recording wins.
    pub fn set_feedback(&mut self, rating: Rating) -> bool {
        if self.feedback.is_some() {
            return false;
        }
        self.feedback = Some(Feedback {
            rating,
            created_at: Utc::now(),
        });
        true
    }
}

/// Short stable digest for inputs and tool results.
pub fn digest(content: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    content.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_accumulate_in_order() {
        let mut trace = Trace::start("scout", "find rust jobs");
        trace.record("searching", Some("search_jobs"), Some("{\"jobs\":[]}"));
        trace.record("answering", None, None);
        assert_eq!(trace.entries.len(), 2);
        assert_eq!(trace.entries[0].tool.as_deref(), Some("search_jobs"));
        assert!(trace.entries[1].tool.is_none());
    }

    #[test]
    fn feedback_is_set_once() {
        let mut trace = Trace::start("match", "analyze");
        assert!(trace.set_feedback(Rating::Positive));
        assert!(!trace.set_feedback(Rating::Negative));
        assert_eq!(trace.feedback.as_ref().unwrap().rating, Rating::Positive);
    }

    #[test]
    fn digest_is_stable() {
        assert_eq!(digest("abc"), digest("abc"));
        assert_ne!(digest("abc"), digest("abd"));
    }
}
