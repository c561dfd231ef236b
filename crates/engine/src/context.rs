//! Shared pipeline context.
//!
//! Each agent receives an immutable view of everything produced before it;
//! the orchestrator appends each report to build the next snapshot. Failed
//! agents are declared to downstream agents instead of silently vanishing.

use careerflow_common::AgentReport;

#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    reports: Vec<AgentReport>,
    failures: Vec<String>,
    notes: Vec<String>,
}

impl PipelineContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_report(&mut self, report: AgentReport) {
        self.reports.push(report);
    }

    /// Record that an agent failed so downstream agents know its output
    /// is missing.
    pub fn note_failure(&mut self, agent: &str, reason: &str) {
        self.failures.push(format!("{agent}: {reason}"));
    }

    /// Free-form observation, e.g. a negotiation outcome.
    pub fn note(&mut self, note: impl Into<String>) {
        self.notes.push(note.into());
    }

    pub fn reports(&self) -> &[AgentReport] {
        &self.reports
    }

    pub fn report_for(&self, agent: &str) -> Option<&AgentReport> {
        self.reports.iter().rev().find(|r| r.agent == agent)
    }

    pub fn failed_agents(&self) -> &[String] {
        &self.failures
    }

    pub fn completed_count(&self) -> usize {
        self.reports.len()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }

    /// Prompt-injectable context block for the next agent. Prior reports
    /// from the receiving agent itself are omitted.
    pub fn prompt_block(&self, receiver: &str) -> String {
        let mut parts = Vec::new();

        for report in &self.reports {
            if report.agent == receiver {
                continue;
            }
            parts.push(format!(
                "--- {} AGENT RESULTS --- (confidence: {:.0}%)\n{}",
                report.agent.to_uppercase(),
                report.confidence * 100.0,
                report.summary,
            ));
        }

        for failure in &self.failures {
            parts.push(format!(
                "[Note] Agent unavailable, its output is missing: {failure}"
            ));
        }

        for note in &self.notes {
            parts.push(format!("[Note] {note}"));
        }

        if parts.is_empty() {
            return String::new();
        }
        format!("CONTEXT FROM PREVIOUS AGENTS:\n{}", parts.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn report(agent: &str, confidence: f64) -> AgentReport {
        AgentReport {
            agent: agent.to_string(),
            summary: format!("{agent} findings"),
            content: json!({}),
            confidence,
            rationale: "because".to_string(),
        }
    }

    #[test]
    fn prompt_block_excludes_receiver_own_report() {
        let mut ctx = PipelineContext::new();
        ctx.push_report(report("scout", 0.9));
        ctx.push_report(report("match", 0.8));

        let block = ctx.prompt_block("match");
        assert!(block.contains("SCOUT"));
        assert!(!block.contains("MATCH AGENT RESULTS"));
    }

    #[test]
    fn failures_are_declared_downstream() {
        let mut ctx = PipelineContext::new();
        ctx.note_failure("forge", "tool_failed");
        let block = ctx.prompt_block("coach");
        assert!(block.contains("forge"));
        assert!(block.contains("missing"));
    }

    #[test]
    fn empty_context_renders_empty() {
        assert!(PipelineContext::new().prompt_block("scout").is_empty());
    }

    #[test]
    fn report_for_returns_latest() {
        let mut ctx = PipelineContext::new();
        ctx.push_report(report("scout", 0.4));
        ctx.push_report(report("scout", 0.9));
        assert_eq!(ctx.report_for("scout").unwrap().confidence, 0.9);
    }
}
