//! Agent registry and shared agent types.

pub mod evaluator;
pub mod negotiator;
pub mod router;
pub mod runtime;

pub use evaluator::{EvalDecision, PipelineEvaluator};
pub use negotiator::{ConsensusResult, Negotiator};
pub use router::{IntentRouter, RoutingDecision};
pub use runtime::{AgentFailure, AgentInvocation, AgentRun, AgentRuntime};

use careerflow_common::AgentConfig;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Static description of one specialized agent.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub display_name: String,
    pub role: String,
    pub system_prompt: String,
    pub tools: Vec<String>,
    pub temperature: f32,
}

/// Name → agent map. Read-only after process start.
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<AgentSpec>>,
}

impl AgentRegistry {
    pub fn from_configs(configs: &[AgentConfig]) -> Self {
        let agents = configs
            .iter()
            .map(|config| {
                let spec = AgentSpec {
                    name: config.name.clone(),
                    display_name: config.display_name.clone(),
                    role: config.role.clone(),
                    system_prompt: config.system_prompt.clone(),
                    tools: config.tools.clone(),
                    temperature: config.temperature.clamp(0.0, 2.0),
                };
                (config.name.clone(), Arc::new(spec))
            })
            .collect();
        Self { agents }
    }

    pub fn get(&self, name: &str) -> Option<Arc<AgentSpec>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.keys().cloned().collect()
    }

    pub fn display_name(&self, name: &str) -> String {
        self.agents
            .get(name)
            .map(|a| a.display_name.clone())
            .unwrap_or_else(|| name.to_string())
    }

    /// Prompt-injectable roster description for router and planner.
    pub fn roster_block(&self) -> String {
        self.agents
            .values()
            .map(|agent| format!("- {}: {}", agent.name, agent.role))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use careerflow_common::config::default_agents;

    #[test]
    fn builds_from_default_roster() {
        let registry = AgentRegistry::from_configs(&default_agents());
        assert_eq!(registry.names(), vec!["coach", "forge", "match", "scout"]);
        assert!(registry.contains("scout"));
        assert!(!registry.contains("oracle"));
    }

    #[test]
    fn roster_block_names_every_agent() {
        let registry = AgentRegistry::from_configs(&default_agents());
        let block = registry.roster_block();
        for name in registry.names() {
            assert!(block.contains(&name));
        }
    }

    #[test]
    fn display_name_falls_back_to_raw_name() {
        let registry = AgentRegistry::from_configs(&default_agents());
        assert_eq!(registry.display_name("scout"), "Scout");
        assert_eq!(registry.display_name("ghost"), "ghost");
    }
}
