//! Conversation orchestrator.
//!
//! Owns one user turn end to end: conversation bookkeeping, routing,
//! the agent pipeline with evaluator-driven control flow, optional
//! negotiation, streaming synthesis, and cancellation. Every event a
//! turn produces fans out to the user's push subscriptions; callers of
//! `run_turn` additionally receive the turn's own scoped stream.

use crate::agents::evaluator::EvalLimits;
use crate::agents::{
    AgentInvocation, AgentRegistry, AgentRuntime, EvalDecision, IntentRouter, Negotiator,
    PipelineEvaluator, RoutingDecision,
};
use crate::agents::runtime::FailureKind;
use crate::context::PipelineContext;
use crate::error::{EngineError, EngineResult};
use crate::push::{EventStream, PushFabric, UserBus};
use crate::store::Store;
use crate::trace::{Trace, TraceStatus};
use careerflow_common::{
    AgentStatus, Attachment, ChatMessage, CompletionRequest, ConversationId, ErrorKind, EventKind,
    LlmConfig, LlmProvider, Message, Role, TraceId, TurnConfig, UserId,
};
use futures::StreamExt;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

const CANCELLED_MESSAGE: &str = "Request cancelled by user.";
const LLM_DOWN_MESSAGE: &str =
    "I'm having trouble reaching my language model right now. Please try again in a moment.";

/// One user message submitted for orchestration.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user: UserId,
    pub conversation: Option<ConversationId>,
    pub text: String,
    pub attachment: Option<Attachment>,
    pub profile_hint: Option<String>,
    /// Bypasses the router; used by the goal executor to pin one agent.
    pub pinned_route: Option<RoutingDecision>,
}

impl TurnRequest {
    pub fn new(user: UserId, text: impl Into<String>) -> Self {
        Self {
            user,
            conversation: None,
            text: text.into(),
            attachment: None,
            profile_hint: None,
            pinned_route: None,
        }
    }
}

/// What a completed turn produced, for callers that wait rather than stream.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub conversation: ConversationId,
    pub assistant_text: String,
    pub trace_ids: Vec<TraceId>,
    pub completed_agents: usize,
    pub failed_agents: usize,
    pub cancelled: bool,
}

pub struct Orchestrator {
    provider: Arc<dyn LlmProvider>,
    agents: Arc<AgentRegistry>,
    runtime: AgentRuntime,
    router: IntentRouter,
    evaluator: PipelineEvaluator,
    negotiator: Negotiator,
    store: Arc<dyn Store>,
    fabric: Arc<PushFabric>,
    llm: LlmConfig,
    turn_config: TurnConfig,
    active_turns: StdMutex<HashMap<(UserId, ConversationId), CancellationToken>>,
    conversation_locks: StdMutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        agents: Arc<AgentRegistry>,
        runtime: AgentRuntime,
        router: IntentRouter,
        evaluator: PipelineEvaluator,
        negotiator: Negotiator,
        store: Arc<dyn Store>,
        fabric: Arc<PushFabric>,
        llm: LlmConfig,
        turn_config: TurnConfig,
    ) -> Self {
        Self {
            provider,
            agents,
            runtime,
            router,
            evaluator,
            negotiator,
            store,
            fabric,
            llm,
            turn_config,
            active_turns: StdMutex::new(HashMap::new()),
            conversation_locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Public entry: submit a user message and stream the turn's events.
    pub async fn run_turn(self: &Arc<Self>, request: TurnRequest) -> EngineResult<EventStream> {
        if request.text.trim().is_empty() {
            return Err(EngineError::InvalidInput("user text must be non-empty".into()));
        }

        let (bus, stream) = self.fabric.scoped_bus(request.user);
        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            let _ = orchestrator.drive_turn(request, bus).await;
        });
        Ok(stream)
    }

    /// Run a turn to completion and return its outcome. Events still fan
    /// out to the user's subscriptions. Used by the goal executor.
    pub async fn run_turn_collect(&self, request: TurnRequest) -> EngineResult<TurnOutcome> {
        if request.text.trim().is_empty() {
            return Err(EngineError::InvalidInput("user text must be non-empty".into()));
        }
        let bus = UserBus::new(Arc::clone(&self.fabric), request.user);
        self.drive_turn(request, bus).await
    }

    /// Raise the cancel token for the active turn of (user, conversation).
    /// Idempotent: repeated calls are no-ops and emit nothing.
    pub fn cancel_turn(&self, user: UserId, conversation: ConversationId) {
        let turns = self.active_turns.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = turns.get(&(user, conversation)) {
            info!(%user, %conversation, "cancelling turn");
            token.cancel();
        }
    }

    #[instrument(skip_all, fields(user = %request.user))]
    async fn drive_turn(&self, request: TurnRequest, bus: UserBus) -> EngineResult<TurnOutcome> {
        match self.drive_turn_inner(&request, &bus).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                warn!(error = %err, "turn terminated with error");
                bus.emit(EventKind::Error {
                    kind: err.kind(),
                    message: err.to_string(),
                });
                bus.emit(EventKind::Done);
                Err(err)
            }
        }
    }

    async fn drive_turn_inner(
        &self,
        request: &TurnRequest,
        bus: &UserBus,
    ) -> EngineResult<TurnOutcome> {
        // Resolve the conversation, creating lazily on first message.
        let (conversation, created) = match request.conversation {
            Some(id) => {
                let existing = self.store.conversation(id).await?.ok_or_else(|| {
                    EngineError::InvalidInput(format!("unknown conversation: {id}"))
                })?;
                if existing.user_id != request.user {
                    return Err(EngineError::Unauthorized(
                        "conversation belongs to another user".into(),
                    ));
                }
                (existing, false)
            }
            None => {
                let title = title_from(&request.text);
                (self.store.create_conversation(request.user, &title).await?, true)
            }
        };

        // One writer per conversation id at a time.
        let lock = self.conversation_lock(conversation.id);
        let _conversation_guard = lock.lock().await;

        let token = CancellationToken::new();
        let _turn_guard = TurnGuard::register(self, request.user, conversation.id, token.clone());

        if created {
            bus.emit(EventKind::ConversationId {
                conversation_id: conversation.id,
            });
        }

        let history = self.store.messages(conversation.id).await?;
        self.store
            .append_message(conversation.id, Role::User, &request.text)
            .await?;

        let route = match &request.pinned_route {
            Some(route) => route.clone(),
            None => {
                self.router
                    .route(
                        &request.text,
                        &history,
                        request.profile_hint.as_deref(),
                        &self.agents,
                    )
                    .await
            }
        };
        bus.emit(EventKind::Routing {
            intent: route.intent.clone(),
            agents: route.agents.clone(),
            confidence: route.confidence,
        });

        if route.is_direct() {
            return self
                .direct_response(request, &conversation.id, &history, bus, &token)
                .await;
        }

        // Agent pipeline under the turn's wall-clock budget. On budget
        // exhaustion the loop future is dropped; whatever landed in the
        // shared context feeds synthesis.
        let mut context = PipelineContext::new();
        let mut traces: Vec<Trace> = Vec::new();
        let mut cancelled = false;
        let timed_out = tokio::time::timeout(
            self.turn_config.budget(),
            self.agent_loop(
                request,
                &route,
                &history,
                &mut context,
                &mut traces,
                bus,
                &token,
                &mut cancelled,
            ),
        )
        .await
        .is_err();

        if timed_out {
            warn!("turn budget exceeded, cancelling remaining agents");
            token.cancel();
            bus.emit(EventKind::Error {
                kind: ErrorKind::TurnBudgetExceeded,
                message: "turn budget exceeded; answering with partial results".into(),
            });
        }

        // Negotiation phase, when reports disagree.
        if self.negotiator.enabled() && !cancelled && !timed_out && context.reports().len() >= 2 {
            if let Some(participants) = self.negotiator.detect_divergence(context.reports()) {
                let result = self
                    .negotiator
                    .run(context.reports(), &participants, bus, &token)
                    .await;
                context.note(format!(
                    "Negotiated position (consensus: {}): {}",
                    result.reached, result.position
                ));
            }
        }

        let assistant_text = self
            .synthesize(request, &context, cancelled, bus)
            .await;

        self.store
            .append_message(conversation.id, Role::Assistant, &assistant_text)
            .await?;

        let trace_ids: Vec<TraceId> = traces.iter().map(|t| t.id).collect();
        let completed_agents = context.completed_count();
        let failed_agents = context.failure_count();
        for trace in traces {
            self.store.insert_trace(trace).await?;
        }
        bus.emit(EventKind::TraceIds {
            ids: trace_ids.clone(),
        });
        bus.emit(EventKind::Done);

        Ok(TurnOutcome {
            conversation: conversation.id,
            assistant_text,
            trace_ids,
            completed_agents,
            failed_agents,
            cancelled,
        })
    }

    /// Conversational reply without any agent step.
    async fn direct_response(
        &self,
        request: &TurnRequest,
        conversation: &ConversationId,
        history: &[Message],
        bus: &UserBus,
        cancel: &CancellationToken,
    ) -> EngineResult<TurnOutcome> {
        let mut trace = Trace::start("direct", &request.text);
        trace.record("responding without agents", None, None);

        let mut messages = vec![ChatMessage::system(
            "You are CareerFlow, a friendly career assistant. You can search jobs, \
             analyze resume fit, write application materials and prep interviews. \
             Answer conversationally.",
        )];
        for entry in history.iter().rev().take(self.router.history_window()).rev() {
            match entry.role {
                Role::User => messages.push(ChatMessage::user(entry.content.clone())),
                Role::Assistant => messages.push(ChatMessage::assistant(entry.content.clone())),
            }
        }
        messages.push(ChatMessage::user(request.text.clone()));

        let completion = CompletionRequest::new(self.llm.model.clone(), messages)
            .with_max_tokens(self.llm.max_tokens)
            .with_temperature(0.6);

        let mut assistant_text = String::new();
        match self.provider.complete_stream(completion).await {
            Ok(mut stream) => {
                while let Some(chunk) = stream.next().await {
                    if cancel.is_cancelled() {
                        break;
                    }
                    match chunk {
                        Ok(text) => {
                            assistant_text.push_str(&text);
                            bus.emit(EventKind::Content { text });
                        }
                        Err(err) => {
                            warn!(error = %err, "direct response stream failed mid-way");
                            break;
                        }
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, "llm unavailable for direct response");
            }
        }
        if assistant_text.trim().is_empty() {
            assistant_text = LLM_DOWN_MESSAGE.to_string();
            bus.emit(EventKind::Content {
                text: assistant_text.clone(),
            });
        }

        trace.finish(TraceStatus::Completed, 0);
        let trace_id = trace.id;
        self.store.insert_trace(trace).await?;
        self.store
            .append_message(*conversation, Role::Assistant, &assistant_text)
            .await?;
        bus.emit(EventKind::TraceIds { ids: vec![trace_id] });
        bus.emit(EventKind::Done);

        Ok(TurnOutcome {
            conversation: *conversation,
            assistant_text,
            trace_ids: vec![trace_id],
            completed_agents: 0,
            failed_agents: 0,
            cancelled: cancel.is_cancelled(),
        })
    }

    /// The pipeline loop: pop, run, evaluate, apply.
    #[allow(clippy::too_many_arguments)]
    async fn agent_loop(
        &self,
        request: &TurnRequest,
        route: &RoutingDecision,
        history: &[Message],
        context: &mut PipelineContext,
        traces: &mut Vec<Trace>,
        bus: &UserBus,
        cancel: &CancellationToken,
        cancelled_out: &mut bool,
    ) {
        let mut queue: VecDeque<String> = route.agents.iter().cloned().collect();
        let mut limits = EvalLimits::new();
        let known_agents = self.agents.names();

        while let Some(agent_name) = queue.pop_front() {
            if cancel.is_cancelled() {
                *cancelled_out = true;
                break;
            }
            let Some(spec) = self.agents.get(&agent_name) else {
                warn!(agent = %agent_name, "routed agent missing from registry, skipping");
                continue;
            };

            bus.emit(EventKind::AgentStatus {
                agent: agent_name.clone(),
                status: AgentStatus::Running,
                message: None,
            });

            let invocation = AgentInvocation {
                spec: &spec,
                brief: request.text.clone(),
                history,
                attachment: request.attachment.as_ref(),
                context,
            };

            match self.runtime.run(invocation, bus, cancel).await {
                Ok(run) => {
                    bus.emit(EventKind::AgentStatus {
                        agent: agent_name.clone(),
                        status: AgentStatus::Complete,
                        message: None,
                    });
                    traces.push(run.trace);

                    let remaining: Vec<String> = queue.iter().cloned().collect();
                    let decision = self
                        .evaluator
                        .evaluate(&run.report, &remaining, context, &known_agents, &mut limits)
                        .await;
                    context.push_report(run.report);
                    bus.emit(EventKind::Evaluator {
                        decision: decision.name().to_string(),
                        reason: decision.reason().to_string(),
                        target_agent: decision.target().map(str::to_string),
                    });

                    match decision {
                        EvalDecision::Continue => {}
                        EvalDecision::SkipNext { .. } => {
                            if let Some(skipped) = queue.pop_front() {
                                info!(agent = %skipped, "evaluator skipped next agent");
                            }
                        }
                        EvalDecision::Stop { .. } => queue.clear(),
                        EvalDecision::LoopBack { target, .. }
                        | EvalDecision::AddAgent { target, .. } => {
                            queue.push_front(target);
                        }
                    }
                }
                Err(failure) => {
                    let message = match &failure.kind {
                        FailureKind::Cancelled => "cancelled".to_string(),
                        other => other.error_kind().as_str().to_string(),
                    };
                    bus.emit(EventKind::AgentStatus {
                        agent: agent_name.clone(),
                        status: AgentStatus::Failed,
                        message: Some(message.clone()),
                    });
                    traces.push(failure.trace);

                    if failure.kind == FailureKind::Cancelled {
                        *cancelled_out = true;
                        break;
                    }
                    context.note_failure(&agent_name, &message);
                }
            }
        }
    }

    /// Compose the final assistant message from the shared context.
    async fn synthesize(
        &self,
        request: &TurnRequest,
        context: &PipelineContext,
        cancelled: bool,
        bus: &UserBus,
    ) -> String {
        if cancelled {
            bus.emit(EventKind::Content {
                text: CANCELLED_MESSAGE.to_string(),
            });
            return CANCELLED_MESSAGE.to_string();
        }

        let completed = context.completed_count();
        let failed = context.failure_count();

        // A mostly-failed pipeline gets an apology, not a confident answer.
        if failed > 0 && failed * 2 >= completed + failed {
            let names: Vec<String> = context
                .failed_agents()
                .iter()
                .map(|entry| {
                    let raw = entry.split(':').next().unwrap_or(entry).trim();
                    self.agents.display_name(raw)
                })
                .collect();
            let text = format!(
                "I'm sorry — I couldn't complete that request. The {} agent{} ran into \
                 trouble, so I don't have a reliable answer. Please try again.",
                names.join(", "),
                if names.len() == 1 { "" } else { "s" },
            );
            bus.emit(EventKind::Content { text: text.clone() });
            return text;
        }

        let mut report_block = String::new();
        for report in context.reports() {
            report_block.push_str(&format!(
                "## {} (confidence {:.0}%)\n{}\n\n",
                report.agent,
                report.confidence * 100.0,
                report.summary,
            ));
        }

        let completion = CompletionRequest::new(
            self.llm.model.clone(),
            vec![
                ChatMessage::system(
                    "You are CareerFlow. Integrate the specialist agents' findings below \
                     into one coherent, helpful answer for the user. Do not mention the \
                     agents by name; speak as a single assistant.",
                ),
                ChatMessage::user(format!(
                    "User request:\n{}\n\nAgent findings:\n{}",
                    request.text, report_block
                )),
            ],
        )
        .with_max_tokens(self.llm.max_tokens)
        .with_temperature(0.4);

        match self.provider.complete_stream(completion).await {
            Ok(mut stream) => {
                let mut text = String::new();
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(piece) => {
                            text.push_str(&piece);
                            bus.emit(EventKind::Content { text: piece });
                        }
                        Err(err) => {
                            warn!(error = %err, "synthesis stream failed mid-way");
                            break;
                        }
                    }
                }
                if text.trim().is_empty() {
                    let fallback = fallback_summary(context);
                    bus.emit(EventKind::Content {
                        text: fallback.clone(),
                    });
                    fallback
                } else {
                    text
                }
            }
            Err(err) => {
                warn!(error = %err, "llm unavailable for synthesis, using template");
                let fallback = fallback_summary(context);
                bus.emit(EventKind::Content {
                    text: fallback.clone(),
                });
                fallback
            }
        }
    }

    fn conversation_lock(&self, conversation: ConversationId) -> Arc<AsyncMutex<()>> {
        let mut locks = self
            .conversation_locks
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        locks
            .entry(conversation)
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}

/// Registers the turn's cancel token and removes it on every exit path.
struct TurnGuard<'a> {
    orchestrator: &'a Orchestrator,
    key: (UserId, ConversationId),
}

impl<'a> TurnGuard<'a> {
    fn register(
        orchestrator: &'a Orchestrator,
        user: UserId,
        conversation: ConversationId,
        token: CancellationToken,
    ) -> Self {
        orchestrator
            .active_turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((user, conversation), token);
        Self {
            orchestrator,
            key: (user, conversation),
        }
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator
            .active_turns
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

/// Templated synthesis used when the provider is down mid-turn.
fn fallback_summary(context: &PipelineContext) -> String {
    if context.reports().is_empty() {
        return LLM_DOWN_MESSAGE.to_string();
    }
    let mut text = String::from("Here's what I found:\n");
    for report in context.reports() {
        text.push_str(&format!("\n- {}", report.summary));
    }
    text
}

fn title_from(text: &str) -> String {
    let mut title: String = text.trim().chars().take(60).collect();
    if title.is_empty() {
        title = "New conversation".to_string();
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_clamped() {
        let long = "x".repeat(200);
        assert_eq!(title_from(&long).len(), 60);
        assert_eq!(title_from("  "), "New conversation");
    }

    #[test]
    fn fallback_summary_lists_reports() {
        let mut context = PipelineContext::new();
        context.push_report(careerflow_common::AgentReport {
            agent: "scout".into(),
            summary: "Found 3 roles".into(),
            content: serde_json::Value::Null,
            confidence: 0.8,
            rationale: String::new(),
        });
        let text = fallback_summary(&context);
        assert!(text.contains("Found 3 roles"));
    }
}
