//! Goal executor.
//!
//! Runs a goal's steps through the orchestrator's public entry, one step
//! per synthetic turn with the step's agent pinned. Supports single-step
//! and autonomous modes; the autonomous loop re-evaluates the plan
//! between steps and replaces the remaining tail when a step's output
//! changes the picture.

use crate::agents::RoutingDecision;
use crate::error::{EngineError, EngineResult};
use crate::goals::planner::GoalPlanner;
use crate::orchestrator::{Orchestrator, TurnRequest};
use crate::push::{EventStream, PushFabric, UserBus};
use crate::store::{NewStep, NotificationDraft, Store};
use crate::tools::schema_of;
use careerflow_common::{
    ChatMessage, CompletionRequest, EventKind, Goal, GoalConfig, GoalId, GoalStatus, LlmConfig,
    LlmProvider, Step, StepKind, StepStatus, TraceId, UserId,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
struct ReplanOutput {
    /// continue | modify_step | add_step | skip_next
    action: String,
    reason: String,
    new_title: Option<String>,
    new_description: Option<String>,
    agent: Option<String>,
}

const REPLAN_PROMPT: &str = "You are a plan evaluator. A step in a multi-step career plan \
just completed. Decide whether the remaining plan still makes sense.\n\n\
DECISIONS:\n\
- \"continue\": proceed with the next step as planned\n\
- \"modify_step\": the next step needs adjustment; provide new_description (and optionally new_title)\n\
- \"add_step\": insert an extra step before the next one; provide new_title, new_description, agent\n\
- \"skip_next\": the next step is already covered by this step's output\n\n\
Return JSON: {action, reason, new_title, new_description, agent}.";

enum StepRun {
    Completed { output: String, trace: Option<TraceId> },
    Failed { reason: String },
    Cancelled,
}

pub struct GoalExecutor {
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    fabric: Arc<PushFabric>,
    planner: GoalPlanner,
    provider: Arc<dyn LlmProvider>,
    llm: LlmConfig,
    config: GoalConfig,
    holds: StdMutex<HashSet<GoalId>>,
    cancels: StdMutex<HashMap<GoalId, CancellationToken>>,
}

impl GoalExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        fabric: Arc<PushFabric>,
        planner: GoalPlanner,
        provider: Arc<dyn LlmProvider>,
        llm: LlmConfig,
        config: GoalConfig,
    ) -> Self {
        Self {
            store,
            orchestrator,
            fabric,
            planner,
            provider,
            llm,
            config,
            holds: StdMutex::new(HashSet::new()),
            cancels: StdMutex::new(HashMap::new()),
        }
    }

    /// Plan and persist a new goal for `user`.
    #[instrument(skip_all, fields(%user))]
    pub async fn create_goal(
        &self,
        user: UserId,
        objective: &str,
        profile_hint: Option<&str>,
    ) -> EngineResult<(Goal, Vec<Step>)> {
        if objective.trim().is_empty() {
            return Err(EngineError::InvalidInput("goal objective must be non-empty".into()));
        }
        let draft = self
            .planner
            .plan(objective, profile_hint, self.orchestrator.agents())
            .await;
        self.store
            .create_goal(user, &draft.title, objective, draft.steps)
            .await
    }

    /// Run the lowest-ordinal pending step, streaming step events
    /// followed by `done`.
    pub async fn execute_step(self: &Arc<Self>, goal_id: GoalId) -> EngineResult<EventStream> {
        let goal = self.load_goal(goal_id).await?;
        let hold = self.acquire(goal_id)?;
        let (bus, stream) = self.fabric.scoped_bus(goal.user_id);

        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let _hold = hold;
            match executor.store.next_pending_step(goal.id).await {
                Ok(Some(step)) => {
                    let _ = executor.run_step(&goal, &step, &bus, 0).await;
                    if step.kind == StepKind::Clarify {
                        executor.pause(&goal, "awaiting clarification").await;
                    } else {
                        executor.finalize_goal(&goal, &bus).await;
                    }
                }
                Ok(None) => {
                    info!(goal = %goal.id, "no pending steps to execute");
                }
                Err(err) => {
                    bus.emit(EventKind::Error {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
            bus.emit(EventKind::Done);
        });

        Ok(stream)
    }

    /// Run all remaining steps autonomously, re-planning between steps.
    pub async fn auto_execute(self: &Arc<Self>, goal_id: GoalId) -> EngineResult<EventStream> {
        let goal = self.load_goal(goal_id).await?;
        if goal.status != GoalStatus::Active {
            return Err(EngineError::GoalPrecondition(format!(
                "goal is {}, not active",
                goal.status
            )));
        }
        let hold = self.acquire(goal_id)?;
        let token = CancellationToken::new();
        self.cancels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(goal_id, token.clone());

        let (bus, stream) = self.fabric.scoped_bus(goal.user_id);
        let executor = Arc::clone(self);
        tokio::spawn(async move {
            let _hold = hold;
            executor.drive_autonomous(&goal, &bus, &token).await;
            executor
                .cancels
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&goal.id);
            bus.emit(EventKind::Done);
        });

        Ok(stream)
    }

    /// Raise the goal-scoped cancel token. Idempotent.
    pub fn cancel_goal(&self, goal_id: GoalId) {
        let cancels = self.cancels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(token) = cancels.get(&goal_id) {
            info!(goal = %goal_id, "cancelling goal run");
            token.cancel();
        }
    }

    async fn drive_autonomous(&self, goal: &Goal, bus: &UserBus, token: &CancellationToken) {
        for _ in 0..self.config.max_total_steps {
            if token.is_cancelled() {
                self.pause(goal, "cancelled").await;
                return;
            }
            let step = match self.store.next_pending_step(goal.id).await {
                Ok(Some(step)) => step,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to load next step, pausing goal");
                    self.pause(goal, "store error").await;
                    return;
                }
            };

            let run = self.run_step(goal, &step, bus, self.config.retry_budget).await;
            match run {
                StepRun::Cancelled => {
                    self.pause(goal, "cancelled").await;
                    return;
                }
                StepRun::Failed { reason } => {
                    warn!(step = %step.id, %reason, "step failed with retry budget exhausted, pausing");
                    self.pause(goal, &reason).await;
                    return;
                }
                StepRun::Completed { output, .. } => {
                    if step.kind == StepKind::Clarify {
                        // The question is on its way to the user; nothing
                        // else can run until they answer.
                        self.pause(goal, "awaiting clarification").await;
                        return;
                    }
                    self.maybe_replan(goal, &step, &output, bus).await;
                }
            }
        }

        self.finalize_goal(goal, bus).await;
    }

    /// Execute one step as a synthetic turn with the step's agent pinned.
    async fn run_step(
        &self,
        goal: &Goal,
        step: &Step,
        bus: &UserBus,
        retry_budget: u32,
    ) -> StepRun {
        if self
            .store
            .update_step(step.id, StepStatus::InProgress, None, None)
            .await
            .is_err()
        {
            return StepRun::Failed {
                reason: "could not transition step to in_progress".into(),
            };
        }
        bus.emit(EventKind::GoalStepStart {
            step_number: step.ordinal,
            title: step.title.clone(),
            agent: step.agent.clone(),
        });

        if step.kind == StepKind::Clarify {
            bus.emit(EventKind::Content {
                text: step.description.clone(),
            });
            let _ = self
                .store
                .update_step(step.id, StepStatus::Completed, Some(step.description.clone()), None)
                .await;
            bus.emit(EventKind::GoalStepComplete {
                step_number: step.ordinal,
                status: StepStatus::Completed,
                output_preview: preview(&step.description),
            });
            return StepRun::Completed {
                output: step.description.clone(),
                trace: None,
            };
        }

        let text = self.step_brief(goal, step).await;
        let mut attempts = 0;
        let run = loop {
            attempts += 1;
            let request = TurnRequest {
                user: goal.user_id,
                conversation: None,
                text: text.clone(),
                attachment: None,
                profile_hint: None,
                pinned_route: Some(RoutingDecision::pinned(
                    "goal_step",
                    step.agent.clone(),
                    format!("Executing goal step: {}", step.title),
                )),
            };

            match self.orchestrator.run_turn_collect(request).await {
                Ok(outcome) if outcome.cancelled => break StepRun::Cancelled,
                Ok(outcome) if outcome.completed_agents == 0 && outcome.failed_agents > 0 => {
                    if attempts > retry_budget {
                        break StepRun::Failed {
                            reason: "agent did not produce output".into(),
                        };
                    }
                    info!(step = %step.id, attempts, "retrying failed step");
                }
                Ok(outcome) => {
                    break StepRun::Completed {
                        output: outcome.assistant_text,
                        trace: outcome.trace_ids.first().copied(),
                    }
                }
                Err(err) => {
                    if attempts > retry_budget {
                        break StepRun::Failed {
                            reason: err.to_string(),
                        };
                    }
                    warn!(step = %step.id, error = %err, "step turn errored, retrying");
                }
            }
        };

        match &run {
            StepRun::Completed { output, trace } => {
                let _ = self
                    .store
                    .update_step(step.id, StepStatus::Completed, Some(output.clone()), *trace)
                    .await;
                bus.emit(EventKind::GoalStepComplete {
                    step_number: step.ordinal,
                    status: StepStatus::Completed,
                    output_preview: preview(output),
                });
            }
            StepRun::Failed { reason } => {
                let _ = self
                    .store
                    .update_step(step.id, StepStatus::Failed, Some(reason.clone()), None)
                    .await;
                bus.emit(EventKind::GoalStepComplete {
                    step_number: step.ordinal,
                    status: StepStatus::Failed,
                    output_preview: preview(reason),
                });
            }
            StepRun::Cancelled => {
                let _ = self
                    .store
                    .update_step(step.id, StepStatus::Failed, Some("cancelled".into()), None)
                    .await;
                bus.emit(EventKind::GoalStepComplete {
                    step_number: step.ordinal,
                    status: StepStatus::Failed,
                    output_preview: "cancelled".into(),
                });
            }
        }
        run
    }

    /// Re-evaluate the remaining plan after a completed step; apply the
    /// adjustment to the pending tail.
    async fn maybe_replan(&self, goal: &Goal, completed: &Step, output: &str, bus: &UserBus) {
        let pending: Vec<Step> = match self.store.steps(goal.id).await {
            Ok(steps) => steps
                .into_iter()
                .filter(|s| s.status == StepStatus::Pending)
                .collect(),
            Err(_) => return,
        };
        let Some(next) = pending.first() else {
            return;
        };

        let remaining_block = pending
            .iter()
            .map(|s| format!("- Step {}: {} ({})", s.ordinal, s.title, s.agent))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "Completed step: {} ({})\nOutput preview: {}\n\nRemaining steps:\n{}",
            completed.title,
            completed.agent,
            preview(output),
            remaining_block,
        );
        let request = CompletionRequest::new(
            self.llm.eval_model().to_string(),
            vec![ChatMessage::system(REPLAN_PROMPT), ChatMessage::user(user)],
        )
        .with_max_tokens(200)
        .with_temperature(0.1);

        let output: Option<ReplanOutput> = self
            .provider
            .complete_structured(request, schema_of::<ReplanOutput>())
            .await
            .ok()
            .and_then(|raw| serde_json::from_value(raw).ok());

        let Some(decision) = output else {
            return;
        };
        if decision.action == "continue" {
            return;
        }

        let reason = decision.reason.clone();
        let applied = match decision.action.as_str() {
            "skip_next" => {
                let note = format!("Skipped: {reason}");
                let ok = self
                    .store
                    .update_step(next.id, StepStatus::Skipped, Some(note), None)
                    .await
                    .is_ok();
                if ok {
                    bus.emit(EventKind::GoalStepComplete {
                        step_number: next.ordinal,
                        status: StepStatus::Skipped,
                        output_preview: preview(&reason),
                    });
                }
                ok
            }
            "modify_step" => {
                let title = decision.new_title.unwrap_or_default();
                let description = decision.new_description.unwrap_or_default();
                if description.is_empty() && title.is_empty() {
                    false
                } else {
                    self.store
                        .modify_step(next.id, &title, &description)
                        .await
                        .is_ok()
                }
            }
            "add_step" => {
                let title = decision.new_title.unwrap_or_default();
                let agent = decision.agent.unwrap_or_default();
                if title.is_empty() || !self.orchestrator.agents().contains(&agent) {
                    warn!(%agent, "replan add_step rejected");
                    false
                } else {
                    self.store
                        .insert_step(
                            goal.id,
                            next.ordinal,
                            NewStep {
                                title,
                                description: decision.new_description.unwrap_or_default(),
                                agent,
                                kind: StepKind::Agent,
                            },
                        )
                        .await
                        .is_ok()
                }
            }
            other => {
                warn!(action = other, "unknown replan action ignored");
                false
            }
        };

        if applied {
            bus.emit(EventKind::GoalReplan {
                adjustment: decision.action,
                reason,
            });
        }
    }

    /// Brief for the synthetic turn: the step as user intent, prior
    /// steps' outputs as context.
    async fn step_brief(&self, goal: &Goal, step: &Step) -> String {
        let description = if step.description.trim().is_empty() {
            &step.title
        } else {
            &step.description
        };
        let mut text = format!("{}: {}", goal.title, description);

        if let Ok(steps) = self.store.steps(goal.id).await {
            let prior: Vec<String> = steps
                .iter()
                .filter(|s| s.status == StepStatus::Completed && s.ordinal < step.ordinal)
                .filter_map(|s| {
                    s.output
                        .as_ref()
                        .map(|output| format!("Step {} ({}): {}", s.ordinal, s.title, preview(output)))
                })
                .collect();
            if !prior.is_empty() {
                text.push_str("\n\nResults from earlier steps:\n");
                text.push_str(&prior.join("\n"));
            }
        }
        text
    }

    async fn finalize_goal(&self, goal: &Goal, bus: &UserBus) {
        let Ok(steps) = self.store.steps(goal.id).await else {
            return;
        };
        let all_terminal = !steps.is_empty() && steps.iter().all(|s| s.status.is_terminal());
        let any_failed = steps.iter().any(|s| s.status == StepStatus::Failed);
        if !all_terminal || any_failed {
            return;
        }

        if self
            .store
            .update_goal_status(goal.id, GoalStatus::Completed)
            .await
            .is_ok()
        {
            info!(goal = %goal.id, "goal completed");
            if let Ok(notification) = self
                .store
                .create_notification(NotificationDraft {
                    user_id: goal.user_id,
                    kind: "goal_completed".into(),
                    title: "Goal completed".into(),
                    body: format!("Every step of \"{}\" is done.", goal.title),
                    payload: json!({"goal_id": goal.id.to_string()}),
                })
                .await
            {
                bus.emit(EventKind::Notification {
                    id: notification.id,
                    kind: notification.kind,
                    title: notification.title,
                    body: notification.body,
                });
            }
        }
    }

    async fn pause(&self, goal: &Goal, reason: &str) {
        info!(goal = %goal.id, reason, "pausing goal");
        let _ = self
            .store
            .update_goal_status(goal.id, GoalStatus::Paused)
            .await;
    }

    async fn load_goal(&self, goal_id: GoalId) -> EngineResult<Goal> {
        self.store
            .goal(goal_id)
            .await?
            .ok_or_else(|| EngineError::GoalPrecondition(format!("unknown goal: {goal_id}")))
    }

    /// Invariant: one executor per goal. Released when the hold drops.
    fn acquire(self: &Arc<Self>, goal_id: GoalId) -> EngineResult<GoalHold> {
        let mut holds = self.holds.lock().unwrap_or_else(|e| e.into_inner());
        if !holds.insert(goal_id) {
            return Err(EngineError::GoalPrecondition(
                "another executor already holds this goal".into(),
            ));
        }
        Ok(GoalHold {
            executor: Arc::clone(self),
            goal: goal_id,
        })
    }
}

struct GoalHold {
    executor: Arc<GoalExecutor>,
    goal: GoalId,
}

impl Drop for GoalHold {
    fn drop(&mut self) {
        self.executor
            .holds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.goal);
    }
}

fn preview(text: &str) -> String {
    if text.len() <= 500 {
        return text.to_string();
    }
    let mut cut = 500;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}
