//! Single-agent execution: a bounded reason/act/observe loop.
//!
//! Each round the provider returns a structured move: either a tool call
//! or a final answer. Tool calls are validated and dispatched through the
//! registry, the observation is fed back, and the loop continues until a
//! final answer, the round cap, or cancellation.

use crate::agents::AgentSpec;
use crate::context::PipelineContext;
use crate::push::UserBus;
use crate::tools::{schema_of, ToolRegistry};
use crate::trace::{Trace, TraceStatus};
use careerflow_common::{
    AgentReport, Attachment, ChatMessage, CompletionRequest, ErrorKind, EventKind, LlmConfig,
    LlmProvider, Message, Role, RuntimeConfig,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

/// The provider's structured response each round.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct AgentMove {
    /// Reasoning for this round.
    thought: String,
    /// "tool" to invoke a tool, "final" to answer.
    action: String,
    tool: Option<String>,
    arguments: Option<Value>,
    /// Final answer text when action is "final".
    answer: Option<String>,
    /// Structured role-specific payload accompanying a final answer.
    content: Option<Value>,
    confidence: Option<f64>,
    rationale: Option<String>,
}

pub struct AgentInvocation<'a> {
    pub spec: &'a AgentSpec,
    pub brief: String,
    pub history: &'a [Message],
    pub attachment: Option<&'a Attachment>,
    pub context: &'a PipelineContext,
}

pub struct AgentRun {
    pub report: AgentReport,
    pub trace: Trace,
}

/// Why an agent step failed. The trace survives for persistence.
pub struct AgentFailure {
    pub trace: Trace,
    pub kind: FailureKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Cancelled,
    ParseFailed,
    ToolFailed(String),
    LlmUnavailable(String),
}

impl FailureKind {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::Cancelled => ErrorKind::Cancelled,
            Self::ParseFailed => ErrorKind::AgentParseFailed,
            Self::ToolFailed(_) => ErrorKind::ToolFailed,
            Self::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
        }
    }
}

pub struct AgentRuntime {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    llm: LlmConfig,
    config: RuntimeConfig,
}

impl AgentRuntime {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        llm: LlmConfig,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            llm,
            config,
        }
    }

    /// Run one agent to an [`AgentReport`].
    #[instrument(skip_all, fields(agent = %invocation.spec.name))]
    pub async fn run(
        &self,
        invocation: AgentInvocation<'_>,
        bus: &UserBus,
        cancel: &CancellationToken,
    ) -> Result<AgentRun, AgentFailure> {
        let spec = invocation.spec;
        let started = Instant::now();
        let mut trace = Trace::start(&spec.name, &invocation.brief);
        let mut transcript = self.seed_transcript(&invocation);
        let mut repaired = false;

        let mut round = 0u32;
        loop {
            round += 1;
            if cancel.is_cancelled() {
                trace.finish(TraceStatus::Cancelled, elapsed_ms(started));
                return Err(AgentFailure {
                    trace,
                    kind: FailureKind::Cancelled,
                });
            }

            let forced_final = round > self.config.max_tool_rounds;
            if forced_final {
                transcript.push(ChatMessage::user(
                    "Tool budget exhausted. Produce your final answer now; action must be \"final\".",
                ));
            }

            let request = CompletionRequest::new(self.llm.model.clone(), transcript.clone())
                .with_max_tokens(self.llm.max_tokens)
                .with_temperature(spec.temperature);
            let raw = match self
                .provider
                .complete_structured(request, schema_of::<AgentMove>())
                .await
            {
                Ok(raw) => raw,
                Err(err) => {
                    trace.finish(TraceStatus::Failed, elapsed_ms(started));
                    return Err(AgentFailure {
                        trace,
                        kind: FailureKind::LlmUnavailable(err.to_string()),
                    });
                }
            };

            let agent_move: AgentMove = match serde_json::from_value(raw) {
                Ok(parsed) => parsed,
                Err(err) => {
                    if repaired {
                        trace.finish(TraceStatus::Failed, elapsed_ms(started));
                        return Err(AgentFailure {
                            trace,
                            kind: FailureKind::ParseFailed,
                        });
                    }
                    repaired = true;
                    debug!(error = %err, "agent move malformed, attempting repair");
                    transcript.push(ChatMessage::user(format!(
                        "Your previous response did not match the required schema ({err}). \
                         Respond again with a single JSON object containing: thought, action \
                         (\"tool\" or \"final\"), and for final answers the answer, confidence \
                         and rationale fields."
                    )));
                    round -= 1;
                    continue;
                }
            };

            if agent_move.action == "tool" && !forced_final {
                let tool_name = agent_move.tool.clone().unwrap_or_default();
                let round_result = self
                    .tool_round(spec, &agent_move, &tool_name, bus, cancel, &mut trace)
                    .await;
                match round_result {
                    Err(kind) => {
                        trace.finish(TraceStatus::Cancelled, elapsed_ms(started));
                        return Err(AgentFailure { trace, kind });
                    }
                    Ok(ToolRound::Observed(observation)) => {
                        transcript.push(ChatMessage::assistant(format!(
                            "Thought: {}\nAction: {}({})",
                            agent_move.thought,
                            tool_name,
                            agent_move.arguments.clone().unwrap_or(Value::Null),
                        )));
                        transcript.push(ChatMessage::user(format!(
                            "TOOL RESULT ({tool_name}): {observation}"
                        )));
                        continue;
                    }
                    Ok(ToolRound::Fatal(reason)) => {
                        trace.finish(TraceStatus::Failed, elapsed_ms(started));
                        return Err(AgentFailure {
                            trace,
                            kind: FailureKind::ToolFailed(reason),
                        });
                    }
                }
            }

            // Final answer path.
            let Some(answer) = agent_move.answer.clone().filter(|a| !a.trim().is_empty()) else {
                if repaired {
                    trace.finish(TraceStatus::Failed, elapsed_ms(started));
                    return Err(AgentFailure {
                        trace,
                        kind: FailureKind::ParseFailed,
                    });
                }
                repaired = true;
                transcript.push(ChatMessage::user(
                    "A final answer requires a non-empty \"answer\" field. Respond again.",
                ));
                round -= 1;
                continue;
            };

            trace.record(&agent_move.thought, None, None);
            bus.emit(EventKind::AgentReasoning {
                agent: spec.name.clone(),
                thought: agent_move.thought.clone(),
                tool: None,
            });
            trace.finish(TraceStatus::Completed, elapsed_ms(started));

            let report = AgentReport {
                agent: spec.name.clone(),
                summary: answer,
                content: agent_move.content.unwrap_or(Value::Null),
                confidence: agent_move.confidence.unwrap_or(0.5).clamp(0.0, 1.0),
                rationale: agent_move.rationale.unwrap_or_default(),
            };
            return Ok(AgentRun { report, trace });
        }
    }

    async fn tool_round(
        &self,
        spec: &AgentSpec,
        agent_move: &AgentMove,
        tool_name: &str,
        bus: &UserBus,
        cancel: &CancellationToken,
        trace: &mut Trace,
    ) -> Result<ToolRound, FailureKind> {
        if cancel.is_cancelled() {
            return Err(FailureKind::Cancelled);
        }

        let args = agent_move.arguments.clone().unwrap_or_else(|| Value::Object(Default::default()));

        // Agents only reach the tools they were granted.
        if !spec.tools.iter().any(|t| t == tool_name) || !self.tools.contains(tool_name) {
            warn!(agent = %spec.name, tool = tool_name, "agent requested unavailable tool");
            trace.record(&agent_move.thought, Some(tool_name), Some("no_such_tool"));
            return Ok(ToolRound::Observed(
                serde_json::json!({"ok": false, "error": "no_such_tool"}).to_string(),
            ));
        }

        let timeout = self.config.tool_timeout();
        let mut outcome = None;
        for attempt in 0..2 {
            match tokio::time::timeout(timeout, self.tools.invoke(tool_name, &args, cancel)).await {
                Ok(result) => {
                    outcome = Some(result);
                    break;
                }
                Err(_) if attempt == 0 => {
                    warn!(tool = tool_name, "tool timed out, retrying with identical args");
                }
                Err(_) => {}
            }
        }

        let (ok, latency_ms, observation, error) = match &outcome {
            Some(result) => (
                result.ok,
                result.latency.as_millis() as u64,
                result.observation(),
                result.error,
            ),
            None => (
                false,
                timeout.as_millis() as u64,
                serde_json::json!({"ok": false, "error": "tool_timeout"}).to_string(),
                Some(ErrorKind::ToolTimeout),
            ),
        };

        trace.record(&agent_move.thought, Some(tool_name), Some(&observation));
        bus.emit(EventKind::AgentReasoning {
            agent: spec.name.clone(),
            thought: agent_move.thought.clone(),
            tool: Some(tool_name.to_string()),
        });
        bus.emit(EventKind::ToolStatus {
            tool: tool_name.to_string(),
            ok,
            latency_ms,
        });

        match error {
            // Validation and handler failures end the step; the pipeline
            // continues without this agent.
            Some(ErrorKind::ToolFailed) | Some(ErrorKind::InvalidArgs) => Ok(ToolRound::Fatal(
                format!("{tool_name}: {}", error.map(|k| k.as_str()).unwrap_or("failed")),
            )),
            Some(ErrorKind::Cancelled) => Err(FailureKind::Cancelled),
            // Timeouts and unknown tools are observations; the agent
            // decides whether to abandon or answer.
            _ => Ok(ToolRound::Observed(observation)),
        }
    }

    fn seed_transcript(&self, invocation: &AgentInvocation<'_>) -> Vec<ChatMessage> {
        let spec = invocation.spec;
        let mut system = spec.system_prompt.clone();
        let tool_block = self.tools.describe(&spec.tools);
        if !tool_block.is_empty() {
            system.push_str("\n\nAVAILABLE TOOLS:\n");
            system.push_str(&tool_block);
            system.push_str(
                "\n\nRespond each round with JSON: {thought, action: \"tool\"|\"final\", \
                 tool?, arguments?, answer?, content?, confidence?, rationale?}.",
            );
        }
        let context_block = invocation.context.prompt_block(&spec.name);
        if !context_block.is_empty() {
            system.push_str("\n\n");
            system.push_str(&context_block);
        }

        let mut transcript = vec![ChatMessage::system(system)];
        for message in invocation.history {
            match message.role {
                Role::User => transcript.push(ChatMessage::user(message.content.clone())),
                Role::Assistant => transcript.push(ChatMessage::assistant(message.content.clone())),
            }
        }

        let mut brief = invocation.brief.clone();
        if let Some(attachment) = invocation.attachment {
            brief.push_str(&format!(
                "\n\nATTACHED FILE ({}):\n{}",
                attachment.name, attachment.content
            ));
        }
        transcript.push(ChatMessage::user(brief));
        transcript
    }
}

enum ToolRound {
    Observed(String),
    Fatal(String),
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
