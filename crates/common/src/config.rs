//! System configuration.
//!
//! Loaded from TOML with per-section defaults; every section can be
//! omitted. Agent rosters and intent routes are configuration, not code.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub negotiation: NegotiationConfig,
    #[serde(default)]
    pub turn: TurnConfig,
    #[serde(default)]
    pub goals: GoalConfig,
    #[serde(default)]
    pub tasks: TaskConfig,
    #[serde(default)]
    pub push: PushConfig,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            agents: default_agents(),
            router: RouterConfig::default(),
            runtime: RuntimeConfig::default(),
            negotiation: NegotiationConfig::default(),
            turn: TurnConfig::default(),
            goals: GoalConfig::default(),
            tasks: TaskConfig::default(),
            push: PushConfig::default(),
        }
    }
}

impl SystemConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("reading config from {}", path.as_ref().display()))?;
        let config: Self = toml::from_str(&raw).context("parsing system config")?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible chat completion endpoint.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    pub model: String,
    /// Cheaper model for router/evaluator/replan calls; falls back to `model`.
    pub eval_model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            eval_model: None,
            max_tokens: 1024,
            temperature: 0.3,
        }
    }
}

impl LlmConfig {
    pub fn eval_model(&self) -> &str {
        self.eval_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    pub display_name: String,
    /// One-line description used in router and planner prompts.
    pub role: String,
    pub system_prompt: String,
    /// Tool names this agent is allowed to invoke.
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default = "default_agent_temperature")]
    pub temperature: f32,
}

fn default_agent_temperature() -> f32 {
    0.3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentRoute {
    pub intent: String,
    pub agents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Below this confidence the router answers directly without agents.
    pub confidence_threshold: f64,
    /// How many recent messages the router sees.
    pub history_window: usize,
    pub intents: Vec<IntentRoute>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.5,
            history_window: 6,
            intents: default_intents(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub max_tool_rounds: u32,
    pub tool_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 3,
            tool_timeout_secs: 30,
        }
    }
}

impl RuntimeConfig {
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    pub enabled: bool,
    pub max_rounds: u32,
    /// Confidence spread between two reports that counts as divergence.
    pub confidence_spread: f64,
    /// Positions whose confidences land within this window converge.
    pub convergence_window: f64,
    /// Mean confidence a converged round must reach for consensus.
    pub consensus_threshold: f64,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_rounds: 3,
            confidence_spread: 0.3,
            convergence_window: 0.15,
            consensus_threshold: 0.7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnConfig {
    /// Wall-clock budget for one turn.
    pub budget_secs: u64,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self { budget_secs: 120 }
    }
}

impl TurnConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoalConfig {
    /// Retries per step during autonomous execution.
    pub retry_budget: u32,
    /// Safety cap on total steps, including dynamically inserted ones.
    pub max_total_steps: u32,
    pub max_plan_steps: usize,
}

impl Default for GoalConfig {
    fn default() -> Self {
        Self {
            retry_budget: 1,
            max_total_steps: 10,
            max_plan_steps: 6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub job_monitor_interval_secs: u64,
    pub application_tracker_interval_secs: u64,
    pub application_stale_days: i64,
    pub goal_stall_hours: i64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            job_monitor_interval_secs: 3600,
            application_tracker_interval_secs: 12 * 3600,
            application_stale_days: 7,
            goal_stall_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushConfig {
    /// Pending events per subscription before drop-and-disconnect.
    pub queue_capacity: usize,
    /// Expected client heartbeat interval; idle past twice this closes.
    pub heartbeat_secs: u64,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            heartbeat_secs: 30,
        }
    }
}

impl PushConfig {
    pub fn idle_cutoff(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs * 2)
    }
}

/// Built-in career agent roster. Overridable via config.
pub fn default_agents() -> Vec<AgentConfig> {
    vec![
        AgentConfig {
            name: "scout".into(),
            display_name: "Scout".into(),
            role: "Job discovery and company research".into(),
            system_prompt: "You are Scout, a job discovery specialist. Search for roles, \
                            research companies, and surface the most promising openings."
                .into(),
            tools: vec!["search_jobs".into(), "research_company".into()],
            temperature: 0.3,
        },
        AgentConfig {
            name: "match".into(),
            display_name: "Match".into(),
            role: "Skills analysis, JD parsing and ATS scoring".into(),
            system_prompt: "You are Match, a fit analyst. Parse job descriptions, compare \
                            them against the candidate's background, and score compatibility."
                .into(),
            tools: vec!["parse_jd".into(), "score_ats".into()],
            temperature: 0.2,
        },
        AgentConfig {
            name: "forge".into(),
            display_name: "Forge".into(),
            role: "Cover letter and resume writing".into(),
            system_prompt: "You are Forge, an application writer. Draft tailored cover \
                            letters and rewrite resume bullets to match the target role."
                .into(),
            tools: vec!["draft_cover_letter".into()],
            temperature: 0.5,
        },
        AgentConfig {
            name: "coach".into(),
            display_name: "Coach".into(),
            role: "Interview preparation and strategy".into(),
            system_prompt: "You are Coach, an interview strategist. Generate likely \
                            questions with talking points and strategic advice."
                .into(),
            tools: vec!["prep_interview".into()],
            temperature: 0.4,
        },
    ]
}

/// Built-in intent routes. The orchestrator never hard-codes these.
pub fn default_intents() -> Vec<IntentRoute> {
    let route = |intent: &str, agents: &[&str]| IntentRoute {
        intent: intent.to_string(),
        agents: agents.iter().map(|a| a.to_string()).collect(),
    };
    vec![
        route("job_search", &["scout"]),
        route("analyze_match", &["match"]),
        route("write_materials", &["match", "forge"]),
        route("interview_prep", &["coach"]),
        route("multi_step", &["scout", "match", "forge", "coach"]),
        route("general_chat", &[]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let config = SystemConfig::default();
        assert_eq!(config.router.confidence_threshold, 0.5);
        assert_eq!(config.runtime.max_tool_rounds, 3);
        assert_eq!(config.turn.budget_secs, 120);
        assert_eq!(config.push.queue_capacity, 256);
        assert_eq!(config.goals.retry_budget, 1);
    }

    #[test]
    fn empty_toml_parses_with_defaults() {
        let config: SystemConfig = toml::from_str("").unwrap();
        assert_eq!(config.agents.len(), 4);
        assert!(config
            .router
            .intents
            .iter()
            .any(|r| r.intent == "general_chat" && r.agents.is_empty()));
    }

    #[test]
    fn partial_toml_overrides_one_section() {
        let config: SystemConfig = toml::from_str(
            r#"
            [turn]
            budget_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.turn.budget_secs, 5);
        assert_eq!(config.runtime.max_tool_rounds, 3);
    }
}
