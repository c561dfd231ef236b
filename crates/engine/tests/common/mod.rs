//! Shared fixtures: a scripted LLM provider, canned tools and a wired
//! system backed by the in-memory store.
#![allow(dead_code)]

use async_trait::async_trait;
use careerflow_engine::push::SubscriberAuth;
use careerflow_engine::tools::{schema_of, ToolEffect, ToolHandler, ToolRegistry};
use careerflow_engine::{CareerFlow, EngineError, EngineResult};
use careerflow_common::llm::TokenStream;
use careerflow_common::{
    CompletionRequest, Envelope, LlmError, LlmProvider, SystemConfig, UserId,
};
use futures::stream;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Replays queued structured responses and stream texts in order.
#[derive(Default)]
pub struct ScriptedProvider {
    structured: Mutex<VecDeque<Value>>,
    streams: Mutex<VecDeque<String>>,
    delay: Option<Duration>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push_structured(&self, value: Value) {
        self.structured.lock().unwrap().push_back(value);
    }

    pub fn push_stream(&self, text: &str) {
        self.streams.lock().unwrap().push_back(text.to_string());
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete_structured(
        &self,
        _request: CompletionRequest,
        _schema: Value,
    ) -> Result<Value, LlmError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.structured
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("structured script exhausted".into()))
    }

    async fn complete_stream(&self, _request: CompletionRequest) -> Result<TokenStream, LlmError> {
        let text = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::Unavailable("stream script exhausted".into()))?;
        let chunks: Vec<Result<String, LlmError>> = text
            .split_inclusive(' ')
            .map(|piece| Ok(piece.to_string()))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }
}

/// Accepts proofs of the form `token-<user id>`.
pub struct StaticAuth;

#[async_trait]
impl SubscriberAuth for StaticAuth {
    async fn authenticate(&self, proof: &str) -> Option<UserId> {
        proof
            .strip_prefix("token-")
            .and_then(|raw| raw.parse::<i64>().ok())
            .map(UserId)
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct CannedSearchArgs {
    keywords: Vec<String>,
    max_results: Option<u32>,
}

/// Offline stand-in for the job board tool.
struct CannedSearchTool;

#[async_trait]
impl ToolHandler for CannedSearchTool {
    fn name(&self) -> &'static str {
        "search_jobs"
    }

    fn description(&self) -> &'static str {
        "Search job boards (canned)"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::External
    }

    fn parameters(&self) -> Value {
        schema_of::<CannedSearchArgs>()
    }

    async fn call(&self, _args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        Ok(json!({
            "ok": true,
            "total_found": 2,
            "jobs": [
                {"title": "Rust Engineer", "company": "Lumenware"},
                {"title": "Backend Engineer", "company": "Harborview"},
            ],
        }))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[allow(dead_code)]
struct CannedResearchArgs {
    company: String,
    role: Option<String>,
}

/// Fast offline company research.
struct CannedResearchTool;

#[async_trait]
impl ToolHandler for CannedResearchTool {
    fn name(&self) -> &'static str {
        "research_company"
    }

    fn description(&self) -> &'static str {
        "Research a company (canned)"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::ReadOnly
    }

    fn parameters(&self) -> Value {
        schema_of::<CannedResearchArgs>()
    }

    async fn call(&self, args: Value, _cancel: &CancellationToken) -> EngineResult<Value> {
        let company = args
            .get("company")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        Ok(json!({
            "ok": true,
            "company": company,
            "angles": ["funding", "culture"],
        }))
    }
}

/// Parks until cancelled; used to hold a turn open mid-agent.
struct ParkedResearchTool;

#[async_trait]
impl ToolHandler for ParkedResearchTool {
    fn name(&self) -> &'static str {
        "research_company"
    }

    fn description(&self) -> &'static str {
        "Research a company (parks until cancelled)"
    }

    fn effect(&self) -> ToolEffect {
        ToolEffect::External
    }

    fn parameters(&self) -> Value {
        schema_of::<CannedResearchArgs>()
    }

    async fn call(&self, _args: Value, cancel: &CancellationToken) -> EngineResult<Value> {
        tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(30)) => Ok(json!({"ok": true, "angles": []})),
        }
    }
}

pub fn canned_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CannedSearchTool));
    registry.register(Arc::new(CannedResearchTool));
    registry
}

/// Registry whose research tool never returns until cancelled.
pub fn parked_tools() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(CannedSearchTool));
    registry.register(Arc::new(ParkedResearchTool));
    registry
}

pub fn system(provider: Arc<ScriptedProvider>) -> CareerFlow {
    system_with_config(provider, SystemConfig::default())
}

pub fn system_with_config(provider: Arc<ScriptedProvider>, config: SystemConfig) -> CareerFlow {
    CareerFlow::builder(config, provider, Arc::new(StaticAuth))
        .tools(canned_tools())
        .build()
}

pub fn system_with_tools(provider: Arc<ScriptedProvider>, tools: ToolRegistry) -> CareerFlow {
    CareerFlow::builder(SystemConfig::default(), provider, Arc::new(StaticAuth))
        .tools(tools)
        .build()
}

pub fn kinds(events: &[Envelope]) -> Vec<&'static str> {
    events.iter().map(|e| e.event.kind()).collect()
}

/// Scripted routing decision payload.
pub fn route_json(intent: &str, agents: &[&str], confidence: f64) -> Value {
    json!({
        "intent": intent,
        "agents": agents,
        "confidence": confidence,
        "reasoning": "scripted",
    })
}

/// Scripted agent tool-call move.
pub fn tool_move_json(tool: &str, arguments: Value) -> Value {
    json!({
        "thought": format!("I should call {tool}"),
        "action": "tool",
        "tool": tool,
        "arguments": arguments,
        "answer": null,
        "content": null,
        "confidence": null,
        "rationale": null,
    })
}

/// Scripted agent final answer.
pub fn final_move_json(answer: &str, confidence: f64) -> Value {
    json!({
        "thought": "I have what I need",
        "action": "final",
        "tool": null,
        "arguments": null,
        "answer": answer,
        "content": null,
        "confidence": confidence,
        "rationale": "scripted",
    })
}

/// Scripted evaluator decision.
pub fn eval_json(action: &str, reason: &str, target: Option<&str>) -> Value {
    json!({
        "action": action,
        "reason": reason,
        "target_agent": target,
    })
}

/// Scripted goal plan.
pub fn plan_json(title: &str, steps: &[(&str, &str, &str)]) -> Value {
    json!({
        "title": title,
        "clarifying_question": null,
        "steps": steps
            .iter()
            .map(|(title, description, agent)| json!({
                "title": title,
                "description": description,
                "agent": agent,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Scripted replan decision.
pub fn replan_json(action: &str, reason: &str) -> Value {
    json!({
        "action": action,
        "reason": reason,
        "new_title": "Adjusted step",
        "new_description": "Adjusted based on earlier findings",
        "agent": "match",
    })
}
