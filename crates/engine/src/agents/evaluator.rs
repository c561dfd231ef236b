//! Pipeline evaluator: decides what happens after each agent step.

use crate::context::PipelineContext;
use crate::tools::schema_of;
use careerflow_common::{
    AgentReport, ChatMessage, CompletionRequest, LlmConfig, LlmProvider,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Directive returned after a step.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalDecision {
    Continue,
    SkipNext { reason: String },
    LoopBack { target: String, reason: String },
    Stop { reason: String },
    AddAgent { target: String, reason: String },
}

impl EvalDecision {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Continue => "continue",
            Self::SkipNext { .. } => "skip_next",
            Self::LoopBack { .. } => "loop_back",
            Self::Stop { .. } => "stop",
            Self::AddAgent { .. } => "add_agent",
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Continue => "",
            Self::SkipNext { reason }
            | Self::LoopBack { reason, .. }
            | Self::Stop { reason }
            | Self::AddAgent { reason, .. } => reason,
        }
    }

    pub fn target(&self) -> Option<&str> {
        match self {
            Self::LoopBack { target, .. } | Self::AddAgent { target, .. } => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct EvalOutput {
    /// continue | skip_next | loop_back | stop | add_agent
    action: String,
    reason: String,
    target_agent: Option<String>,
}

const EVAL_PROMPT: &str = "You are the pipeline evaluator for a career assistant. \
After an agent produces output, decide what happens next.\n\n\
DECISIONS:\n\
- \"continue\": output is fine, run the next planned agent\n\
- \"skip_next\": output is so strong the next agent is unnecessary\n\
- \"loop_back\": output is poor or missing critical data; re-run a named earlier agent\n\
- \"stop\": the user's need is already met; no more agents\n\
- \"add_agent\": splice in an agent that was not originally planned\n\n\
GUIDELINES:\n\
- A search that found nothing usually warrants loop_back with broader terms\n\
- A very high compatibility score can make the writing agent unnecessary\n\
- Very low confidence in the step's own output usually warrants stop\n\
- Default to \"continue\" when unsure; keep the reason to one sentence\n\n\
Return JSON: {action, reason, target_agent}.";

/// Per-turn bookkeeping the safety bounds need.
#[derive(Debug, Default)]
pub struct EvalLimits {
    loop_backs: HashMap<String, u32>,
}

impl EvalLimits {
    pub fn new() -> Self {
        Self::default()
    }

    fn loop_back_allowed(&self, target: &str) -> bool {
        self.loop_backs.get(target).copied().unwrap_or(0) < 2
    }

    fn record_loop_back(&mut self, target: &str) {
        *self.loop_backs.entry(target.to_string()).or_insert(0) += 1;
    }
}

pub struct PipelineEvaluator {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
}

impl PipelineEvaluator {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig) -> Self {
        Self { provider, llm }
    }

    /// Evaluate the step just finished. Any invalid decision degrades to
    /// `continue` and is logged; safety bounds are enforced here so the
    /// orchestrator can apply the returned decision verbatim.
    #[instrument(skip_all, fields(agent = %report.agent))]
    pub async fn evaluate(
        &self,
        report: &AgentReport,
        remaining: &[String],
        context: &PipelineContext,
        known_agents: &[String],
        limits: &mut EvalLimits,
    ) -> EvalDecision {
        let remaining_block = if remaining.is_empty() {
            "none".to_string()
        } else {
            remaining.join(", ")
        };
        let user = format!(
            "Agent: {}\nConfidence: {:.2}\nRemaining agents: {}\nAgents completed so far: {}\n\
             Agent output (preview):\n{}",
            report.agent,
            report.confidence,
            remaining_block,
            context.completed_count(),
            truncate(&report.summary, 1500),
        );

        let request = CompletionRequest::new(
            self.llm.eval_model().to_string(),
            vec![ChatMessage::system(EVAL_PROMPT), ChatMessage::user(user)],
        )
        .with_max_tokens(200)
        .with_temperature(0.1);

        let output: EvalOutput = match self
            .provider
            .complete_structured(request, schema_of::<EvalOutput>())
            .await
            .and_then(|raw| {
                serde_json::from_value(raw)
                    .map_err(|e| careerflow_common::LlmError::Malformed(e.to_string()))
            }) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "evaluator unavailable, continuing");
                return EvalDecision::Continue;
            }
        };

        self.validate(output, remaining, known_agents, limits)
    }

    fn validate(
        &self,
        output: EvalOutput,
        remaining: &[String],
        known_agents: &[String],
        limits: &mut EvalLimits,
    ) -> EvalDecision {
        let reason = truncate(&output.reason, 200);
        let target = output
            .target_agent
            .filter(|t| known_agents.iter().any(|a| a == t));

        match output.action.as_str() {
            "continue" => EvalDecision::Continue,
            "skip_next" => EvalDecision::SkipNext { reason },
            "stop" => EvalDecision::Stop { reason },
            "loop_back" => match target {
                Some(target) if limits.loop_back_allowed(&target) => {
                    limits.record_loop_back(&target);
                    EvalDecision::LoopBack { target, reason }
                }
                Some(target) => {
                    warn!(%target, "loop_back budget exhausted for target, continuing");
                    EvalDecision::Continue
                }
                None => {
                    warn!("loop_back without a valid target, continuing");
                    EvalDecision::Continue
                }
            },
            "add_agent" => match target {
                // Splicing in an agent already pending would duplicate it.
                Some(target) if !remaining.contains(&target) => {
                    EvalDecision::AddAgent { target, reason }
                }
                Some(target) => {
                    warn!(%target, "add_agent target already pending, continuing");
                    EvalDecision::Continue
                }
                None => {
                    warn!("add_agent without a valid target, continuing");
                    EvalDecision::Continue
                }
            },
            other => {
                warn!(action = other, "unknown evaluator action, continuing");
                EvalDecision::Continue
            }
        }
    }
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evaluator() -> PipelineEvaluator {
        struct Never;

        #[async_trait::async_trait]
        impl LlmProvider for Never {
            async fn complete_structured(
                &self,
                _request: CompletionRequest,
                _schema: serde_json::Value,
            ) -> Result<serde_json::Value, careerflow_common::LlmError> {
                Err(careerflow_common::LlmError::Unavailable("unused".into()))
            }

            async fn complete_stream(
                &self,
                _request: CompletionRequest,
            ) -> Result<careerflow_common::llm::TokenStream, careerflow_common::LlmError> {
                Err(careerflow_common::LlmError::Unavailable("unused".into()))
            }
        }

        PipelineEvaluator::new(Arc::new(Never), LlmConfig::default())
    }

    fn known() -> Vec<String> {
        vec!["scout".into(), "match".into(), "forge".into(), "coach".into()]
    }

    #[test]
    fn loop_back_is_bounded_per_target() {
        let evaluator = evaluator();
        let mut limits = EvalLimits::new();
        let output = || EvalOutput {
            action: "loop_back".into(),
            reason: "bad output".into(),
            target_agent: Some("scout".into()),
        };

        for _ in 0..2 {
            let decision = evaluator.validate(output(), &[], &known(), &mut limits);
            assert_eq!(decision.name(), "loop_back");
        }
        let third = evaluator.validate(output(), &[], &known(), &mut limits);
        assert_eq!(third, EvalDecision::Continue);
    }

    #[test]
    fn add_agent_rejects_pending_duplicate() {
        let evaluator = evaluator();
        let mut limits = EvalLimits::new();
        let decision = evaluator.validate(
            EvalOutput {
                action: "add_agent".into(),
                reason: "need coaching".into(),
                target_agent: Some("coach".into()),
            },
            &["coach".to_string()],
            &known(),
            &mut limits,
        );
        assert_eq!(decision, EvalDecision::Continue);
    }

    #[test]
    fn unknown_action_degrades_to_continue() {
        let evaluator = evaluator();
        let mut limits = EvalLimits::new();
        let decision = evaluator.validate(
            EvalOutput {
                action: "explode".into(),
                reason: String::new(),
                target_agent: None,
            },
            &[],
            &known(),
            &mut limits,
        );
        assert_eq!(decision, EvalDecision::Continue);
    }

    #[test]
    fn loop_back_with_unknown_target_degrades() {
        let evaluator = evaluator();
        let mut limits = EvalLimits::new();
        let decision = evaluator.validate(
            EvalOutput {
                action: "loop_back".into(),
                reason: "retry".into(),
                target_agent: Some("oracle".into()),
            },
            &[],
            &known(),
            &mut limits,
        );
        assert_eq!(decision, EvalDecision::Continue);
    }
}
