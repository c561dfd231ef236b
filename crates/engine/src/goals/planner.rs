//! Goal planner: decomposes an objective into agent-executable steps.

use crate::agents::AgentRegistry;
use crate::store::NewStep;
use crate::tools::schema_of;
use careerflow_common::{
    ChatMessage, CompletionRequest, GoalConfig, LlmConfig, LlmProvider, StepKind,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{instrument, warn};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PlanStepOutput {
    title: String,
    description: String,
    agent: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct PlanOutput {
    /// Short goal title, under 60 chars.
    title: String,
    /// Set instead of steps when the objective is too vague to plan.
    clarifying_question: Option<String>,
    steps: Vec<PlanStepOutput>,
}

/// A validated plan ready for the store.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    pub title: String,
    pub steps: Vec<NewStep>,
}

pub struct GoalPlanner {
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
    config: GoalConfig,
}

impl GoalPlanner {
    pub fn new(provider: Arc<dyn LlmProvider>, llm: LlmConfig, config: GoalConfig) -> Self {
        Self {
            provider,
            llm,
            config,
        }
    }

    /// Decompose `objective` into an ordered step list. Never produces an
    /// agent name missing from the registry. An underspecified objective
    /// may come back as a single clarifying step the executor surfaces to
    /// the user.
    #[instrument(skip_all)]
    pub async fn plan(
        &self,
        objective: &str,
        profile_hint: Option<&str>,
        registry: &AgentRegistry,
    ) -> PlanDraft {
        let system = format!(
            "You are a career goal planner. Decompose the user's goal into 3-{max} \
             concrete steps, each handled by exactly one agent.\n\n\
             AVAILABLE AGENTS:\n{roster}\n\n\
             RULES:\n\
             - Each step is one clear, specific action\n\
             - Order steps logically: research before analysis, analysis before writing\n\
             - Step titles under 60 chars\n\
             - If the goal is too vague to plan, set clarifying_question instead of steps\n\n\
             Return JSON: {{title, clarifying_question, steps: [{{title, description, agent}}]}}.",
            max = self.config.max_plan_steps,
            roster = registry.roster_block(),
        );

        let mut user = format!("Goal: {objective}");
        if let Some(hint) = profile_hint {
            user.push_str(&format!("\n\n[profile] {hint}"));
        }

        let request = CompletionRequest::new(
            self.llm.model.clone(),
            vec![ChatMessage::system(system), ChatMessage::user(user)],
        )
        .with_max_tokens(600)
        .with_temperature(0.2);

        let output: Option<PlanOutput> = self
            .provider
            .complete_structured(request, schema_of::<PlanOutput>())
            .await
            .ok()
            .and_then(|raw| serde_json::from_value(raw).ok());

        match output {
            Some(output) => self.normalize(output, objective, registry),
            None => {
                warn!("planner unavailable, using fallback plan");
                self.fallback(objective, registry)
            }
        }
    }

    fn normalize(
        &self,
        output: PlanOutput,
        objective: &str,
        registry: &AgentRegistry,
    ) -> PlanDraft {
        let title = clamp_title(if output.title.trim().is_empty() {
            objective
        } else {
            &output.title
        });

        if let Some(question) = output
            .clarifying_question
            .filter(|q| !q.trim().is_empty())
        {
            return PlanDraft {
                title,
                steps: vec![NewStep {
                    title: "Clarify the goal".to_string(),
                    description: question,
                    agent: String::new(),
                    kind: StepKind::Clarify,
                }],
            };
        }

        let steps: Vec<NewStep> = output
            .steps
            .into_iter()
            .take(self.config.max_plan_steps)
            .filter_map(|step| {
                if step.title.trim().is_empty() {
                    return None;
                }
                if !registry.contains(&step.agent) {
                    warn!(agent = %step.agent, "planner proposed unknown agent, dropping step");
                    return None;
                }
                Some(NewStep {
                    title: clamp_title(&step.title),
                    description: step.description,
                    agent: step.agent,
                    kind: StepKind::Agent,
                })
            })
            .collect();

        if steps.is_empty() {
            return self.fallback(objective, registry);
        }
        PlanDraft { title, steps }
    }

    /// Deterministic plan used when the provider is down or the plan was
    /// unusable.
    fn fallback(&self, objective: &str, registry: &AgentRegistry) -> PlanDraft {
        let candidates = [
            (
                "scout",
                "Research opportunities",
                format!("Search for relevant positions: {objective}"),
            ),
            (
                "match",
                "Analyze fit",
                "Compare your background against the requirements".to_string(),
            ),
            (
                "forge",
                "Prepare materials",
                "Write a tailored cover letter and resume bullets".to_string(),
            ),
            (
                "coach",
                "Prep for interviews",
                "Practice likely interview questions".to_string(),
            ),
        ];

        let steps: Vec<NewStep> = candidates
            .into_iter()
            .filter(|(agent, _, _)| registry.contains(agent))
            .map(|(agent, title, description)| NewStep {
                title: title.to_string(),
                description,
                agent: agent.to_string(),
                kind: StepKind::Agent,
            })
            .collect();

        PlanDraft {
            title: clamp_title(objective),
            steps,
        }
    }
}

fn clamp_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return "Career goal".to_string();
    }
    trimmed.chars().take(60).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerflow_common::config::default_agents;
    use careerflow_common::LlmError;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Canned(Result<Value, ()>);

    #[async_trait]
    impl LlmProvider for Canned {
        async fn complete_structured(
            &self,
            _request: CompletionRequest,
            _schema: Value,
        ) -> Result<Value, LlmError> {
            self.0
                .clone()
                .map_err(|_| LlmError::Unavailable("down".into()))
        }

        async fn complete_stream(
            &self,
            _request: CompletionRequest,
        ) -> Result<careerflow_common::llm::TokenStream, LlmError> {
            Err(LlmError::Unavailable("unused".into()))
        }
    }

    fn planner(response: Result<Value, ()>) -> (GoalPlanner, AgentRegistry) {
        (
            GoalPlanner::new(
                Arc::new(Canned(response)),
                LlmConfig::default(),
                GoalConfig::default(),
            ),
            AgentRegistry::from_configs(&default_agents()),
        )
    }

    #[tokio::test]
    async fn unknown_agents_are_dropped() {
        let (planner, registry) = planner(Ok(json!({
            "title": "Land a backend role",
            "clarifying_question": null,
            "steps": [
                {"title": "Find roles", "description": "search", "agent": "scout"},
                {"title": "Consult the oracle", "description": "???", "agent": "oracle"},
            ],
        })));
        let draft = planner.plan("land a backend role", None, &registry).await;
        assert_eq!(draft.steps.len(), 1);
        assert_eq!(draft.steps[0].agent, "scout");
    }

    #[tokio::test]
    async fn provider_failure_yields_fallback_plan() {
        let (planner, registry) = planner(Err(()));
        let draft = planner.plan("land a role at Stripe", None, &registry).await;
        assert_eq!(draft.steps.len(), 4);
        assert!(draft
            .steps
            .iter()
            .all(|s| registry.contains(&s.agent)));
    }

    #[tokio::test]
    async fn vague_objective_becomes_clarify_step() {
        let (planner, registry) = planner(Ok(json!({
            "title": "Career help",
            "clarifying_question": "What kind of role are you looking for?",
            "steps": [],
        })));
        let draft = planner.plan("help me", None, &registry).await;
        assert_eq!(draft.steps.len(), 1);
        assert_eq!(draft.steps[0].kind, StepKind::Clarify);
        assert!(draft.steps[0].description.contains("What kind of role"));
    }

    #[tokio::test]
    async fn oversized_plans_are_clamped() {
        let steps: Vec<Value> = (0..10)
            .map(|i| json!({"title": format!("step {i}"), "description": "", "agent": "scout"}))
            .collect();
        let (planner, registry) = planner(Ok(json!({
            "title": "Big plan",
            "clarifying_question": null,
            "steps": steps,
        })));
        let draft = planner.plan("everything", None, &registry).await;
        assert_eq!(draft.steps.len(), GoalConfig::default().max_plan_steps);
    }
}
