//! Intent classification and pipeline selection.
//!
//! A cheap structured LLM call classifies the user message into one of the
//! configured intents and an ordered agent list. Low confidence, an empty
//! list, or any classification failure falls back to the direct-answer
//! path. Every agent name the router returns is guaranteed to resolve in
//! the agent registry.

use crate::agents::AgentRegistry;
use crate::tools::schema_of;
use careerflow_common::{
    ChatMessage, CompletionRequest, LlmConfig, LlmProvider, Message, Role, RouterConfig,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Result of classifying a user message.
#[derive(Debug, Clone)]
pub struct RoutingDecision {
    pub intent: String,
    pub agents: Vec<String>,
    pub confidence: f64,
    pub reasoning: String,
}

impl RoutingDecision {
    /// Synthetic decision pinning a single agent, used for goal steps.
    pub fn pinned(intent: impl Into<String>, agent: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            agents: vec![agent.into()],
            confidence: 1.0,
            reasoning: reasoning.into(),
        }
    }

    pub fn is_direct(&self) -> bool {
        self.agents.is_empty()
    }
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct RouteOutput {
    intent: String,
    agents: Vec<String>,
    confidence: f64,
    reasoning: String,
}

pub struct IntentRouter {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
    config: RouterConfig,
}

impl IntentRouter {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig, config: RouterConfig) -> Self {
        Self {
            provider,
            llm,
            config,
        }
    }

    pub fn history_window(&self) -> usize {
        self.config.history_window
    }

    #[instrument(skip_all)]
    pub async fn route(
        &self,
        message: &str,
        history: &[Message],
        profile_hint: Option<&str>,
        registry: &AgentRegistry,
    ) -> RoutingDecision {
        let request = self.build_request(message, history, profile_hint, registry);

        let raw = match self
            .provider
            .complete_structured(request, schema_of::<RouteOutput>())
            .await
        {
            Ok(raw) => raw,
            Err(err) => {
                warn!(error = %err, "router classification failed, falling back to direct response");
                return self.direct_fallback("classification error");
            }
        };

        let output: RouteOutput = match serde_json::from_value(raw) {
            Ok(output) => output,
            Err(err) => {
                warn!(error = %err, "router output malformed, falling back to direct response");
                return self.direct_fallback("malformed classification");
            }
        };

        self.normalize(output, registry)
    }

    fn direct_fallback(&self, reasoning: &str) -> RoutingDecision {
        RoutingDecision {
            intent: "general_chat".to_string(),
            agents: Vec::new(),
            confidence: 0.0,
            reasoning: format!("router fallback: {reasoning}"),
        }
    }

    /// Validate and normalize the classification: known intent, known
    /// agents only, duplicates removed preserving first occurrence,
    /// intent defaults applied when the agent list came back empty.
    fn normalize(&self, output: RouteOutput, registry: &AgentRegistry) -> RoutingDecision {
        let intent = if self.config.intents.iter().any(|r| r.intent == output.intent) {
            output.intent
        } else {
            debug!(intent = %output.intent, "unrecognized intent, defaulting to general_chat");
            "general_chat".to_string()
        };

        let confidence = output.confidence.clamp(0.0, 1.0);
        if confidence < self.config.confidence_threshold {
            return RoutingDecision {
                intent,
                agents: Vec::new(),
                confidence,
                reasoning: output.reasoning,
            };
        }

        let mut agents: Vec<String> = Vec::new();
        for agent in output.agents {
            if !registry.contains(&agent) {
                warn!(agent = %agent, "router proposed unknown agent, dropping");
                continue;
            }
            if !agents.contains(&agent) {
                agents.push(agent);
            }
        }

        // An intent with agent defaults but an empty classified list gets
        // the configured pipeline.
        if agents.is_empty() {
            if let Some(route) = self.config.intents.iter().find(|r| r.intent == intent) {
                agents = route
                    .agents
                    .iter()
                    .filter(|a| registry.contains(a))
                    .cloned()
                    .collect();
            }
        }

        RoutingDecision {
            intent,
            agents,
            confidence,
            reasoning: output.reasoning,
        }
    }

    fn build_request(
        &self,
        message: &str,
        history: &[Message],
        profile_hint: Option<&str>,
        registry: &AgentRegistry,
    ) -> CompletionRequest {
        let intent_block = self
            .config
            .intents
            .iter()
            .map(|route| {
                if route.agents.is_empty() {
                    format!("- {}: no agents, respond directly", route.intent)
                } else {
                    format!("- {}: [{}]", route.intent, route.agents.join(", "))
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        let system = format!(
            "You are the intent classifier for CareerFlow, a career assistant.\n\
             Classify the user's message into exactly one intent and choose which agents to run.\n\n\
             INTENTS AND DEFAULT PIPELINES:\n{intent_block}\n\n\
             AGENTS:\n{roster}\n\n\
             Return JSON: {{intent, agents, confidence (0-1), reasoning}}. \
             An empty agent list means the assistant answers directly.",
            roster = registry.roster_block(),
        );

        let mut messages = vec![ChatMessage::system(system)];
        let window = history.len().saturating_sub(self.config.history_window);
        for entry in &history[window..] {
            match entry.role {
                Role::User => messages.push(ChatMessage::user(entry.content.clone())),
                Role::Assistant => messages.push(ChatMessage::assistant(entry.content.clone())),
            }
        }

        let mut user = message.to_string();
        if let Some(hint) = profile_hint {
            user.push_str(&format!("\n\n[profile] {hint}"));
        }
        messages.push(ChatMessage::user(user));

        CompletionRequest::new(self.llm.eval_model().to_string(), messages)
            .with_max_tokens(300)
            .with_temperature(0.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerflow_common::config::{default_agents, default_intents};
    use careerflow_common::LlmError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Canned(Value);

    #[async_trait]
    impl LlmProvider for Canned {
        async fn complete_structured(
            &self,
            _request: CompletionRequest,
            _schema: Value,
        ) -> Result<Value, LlmError> {
            Ok(self.0.clone())
        }

        async fn complete_stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<careerflow_common::llm::TokenStream, LlmError> {
            Err(LlmError::Unavailable("not used".into()))
        }
    }

    fn router(response: Value) -> (IntentRouter, AgentRegistry) {
        let registry = AgentRegistry::from_configs(&default_agents());
        let config = RouterConfig {
            confidence_threshold: 0.5,
            history_window: 6,
            intents: default_intents(),
        };
        (
            IntentRouter::new(Arc::new(Canned(response)), LlmConfig::default(), config),
            registry,
        )
    }

    #[tokio::test]
    async fn duplicates_dedupe_preserving_first() {
        let (router, registry) = router(json!({
            "intent": "write_materials",
            "agents": ["match", "forge", "match"],
            "confidence": 0.9,
            "reasoning": "wants a cover letter",
        }));
        let decision = router.route("write me a cover letter", &[], None, &registry).await;
        assert_eq!(decision.agents, vec!["match", "forge"]);
    }

    #[tokio::test]
    async fn unknown_agents_are_dropped_and_defaults_apply() {
        let (router, registry) = router(json!({
            "intent": "job_search",
            "agents": ["oracle"],
            "confidence": 0.8,
            "reasoning": "job hunt",
        }));
        let decision = router.route("find rust jobs", &[], None, &registry).await;
        assert_eq!(decision.agents, vec!["scout"]);
    }

    #[tokio::test]
    async fn low_confidence_goes_direct() {
        let (router, registry) = router(json!({
            "intent": "job_search",
            "agents": ["scout"],
            "confidence": 0.2,
            "reasoning": "unsure",
        }));
        let decision = router.route("hmm", &[], None, &registry).await;
        assert!(decision.is_direct());
    }

    #[tokio::test]
    async fn unrecognized_intent_defaults_to_general_chat() {
        let (router, registry) = router(json!({
            "intent": "trade_stocks",
            "agents": [],
            "confidence": 0.9,
            "reasoning": "off-domain",
        }));
        let decision = router.route("buy AAPL", &[], None, &registry).await;
        assert_eq!(decision.intent, "general_chat");
        assert!(decision.is_direct());
    }
}
