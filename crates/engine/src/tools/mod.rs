//! Tool registry and invocation.
//!
//! Holds a name → (schema, handler) map. Arguments are validated against
//! the declared schema before dispatch; handlers never see malformed input.
//! Every handler declares its side-effect class so the agent runtime can
//! apply per-tool timeout and retry policy.

pub mod ats_scorer;
pub mod company_research;
pub mod cover_letter;
pub mod interview_prep;
pub mod jd_parser;
pub mod job_search;

pub use ats_scorer::AtsScorerTool;
pub use company_research::CompanyResearchTool;
pub use cover_letter::CoverLetterTool;
pub use interview_prep::InterviewPrepTool;
pub use jd_parser::JdParserTool;
pub use job_search::JobSearchTool;

use crate::error::{EngineError, EngineResult};
use async_trait::async_trait;
use careerflow_common::ErrorKind;
use schemars::JsonSchema;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Declared side-effect class of a tool handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolEffect {
    /// Pure lookup or computation; safe to retry.
    ReadOnly,
    /// Touches external systems; retried only on timeout with identical args.
    External,
}

/// Uniform result envelope for every tool invocation.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub data: Option<Value>,
    pub error: Option<ErrorKind>,
    pub latency: Duration,
}

impl ToolOutcome {
    fn ok(data: Value, latency: Duration) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
            latency,
        }
    }

    fn err(kind: ErrorKind, latency: Duration) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(kind),
            latency,
        }
    }

    /// Observation text fed back into the agent loop.
    pub fn observation(&self) -> String {
        match (&self.data, self.error) {
            (Some(data), _) => data.to_string(),
            (None, Some(kind)) => json!({"ok": false, "error": kind.as_str()}).to_string(),
            (None, None) => json!({"ok": false}).to_string(),
        }
    }
}

/// A callable tool. Handlers must observe the cancellation token at
/// natural boundaries.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn effect(&self) -> ToolEffect;
    /// JSON schema of the argument record.
    fn parameters(&self) -> Value;
    async fn call(&self, args: Value, cancel: &CancellationToken) -> EngineResult<Value>;
}

/// JSON schema for a schemars-derived argument type.
pub fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// Name → handler map. Read-only after process start.
pub struct ToolRegistry {
    tools: HashMap<&'static str, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in career tools.
    pub fn with_builtin_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(JobSearchTool::new()));
        registry.register(Arc::new(JdParserTool));
        registry.register(Arc::new(AtsScorerTool));
        registry.register(Arc::new(CompanyResearchTool));
        registry.register(Arc::new(CoverLetterTool));
        registry.register(Arc::new(InterviewPrepTool));
        registry
    }

    /// Register a handler. Registering the same name twice is a wiring
    /// bug, not a runtime condition.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        let name = tool.name();
        if self.tools.insert(name, tool).is_some() {
            panic!("duplicate tool registration: {name}");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.tools.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Prompt-injectable descriptions of a subset of tools.
    pub fn describe(&self, names: &[String]) -> String {
        let mut lines = Vec::new();
        for name in names {
            if let Some(tool) = self.tools.get(name.as_str()) {
                lines.push(format!("- **{}**: {}", tool.name(), tool.description()));
            }
        }
        lines.join("\n")
    }

    /// Validate arguments and dispatch. Returns the uniform envelope; the
    /// handler is never invoked on a validation failure.
    pub async fn invoke(
        &self,
        name: &str,
        args: &Value,
        cancel: &CancellationToken,
    ) -> ToolOutcome {
        let start = Instant::now();

        let Some(tool) = self.tools.get(name) else {
            return ToolOutcome::err(ErrorKind::NoSuchTool, start.elapsed());
        };

        if let Err(reason) = validate_args(&tool.parameters(), args) {
            warn!(tool = name, %reason, "rejecting invalid tool arguments");
            return ToolOutcome::err(ErrorKind::InvalidArgs, start.elapsed());
        }

        match tool.call(args.clone(), cancel).await {
            Ok(data) => ToolOutcome::ok(data, start.elapsed()),
            Err(EngineError::Cancelled) => ToolOutcome::err(ErrorKind::Cancelled, start.elapsed()),
            Err(err) => {
                warn!(tool = name, error = %err, "tool handler failed");
                ToolOutcome::err(ErrorKind::ToolFailed, start.elapsed())
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the argument record against the declared schema: required
/// properties present, no unknown names, JSON types matching.
fn validate_args(schema: &Value, args: &Value) -> Result<(), String> {
    let Some(args_map) = args.as_object() else {
        return Err("arguments must be an object".to_string());
    };

    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    for name in args_map.keys() {
        if !properties.contains_key(name) {
            return Err(format!("unknown argument: {name}"));
        }
    }

    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            if !args_map.contains_key(name) {
                return Err(format!("missing required argument: {name}"));
            }
        }
    }

    for (name, value) in args_map {
        let Some(expected) = properties.get(name).and_then(|p| p.get("type")) else {
            continue;
        };
        let expected_types: Vec<&str> = match expected {
            Value::String(s) => vec![s.as_str()],
            Value::Array(list) => list.iter().filter_map(Value::as_str).collect(),
            _ => continue,
        };
        if !expected_types.iter().any(|t| json_type_matches(t, value)) {
            return Err(format!(
                "argument {name} has wrong type, expected {}",
                expected_types.join(" | ")
            ));
        }
    }

    Ok(())
}

fn json_type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}
