//! The assembled CareerFlow system.
//!
//! Construction-time wiring of every component; the public methods are
//! exactly the request surface a transport exposes.

use crate::agents::{AgentRegistry, AgentRuntime, IntentRouter, Negotiator, PipelineEvaluator};
use crate::error::EngineResult;
use crate::goals::{GoalExecutor, GoalPlanner};
use crate::orchestrator::{Orchestrator, TurnRequest};
use crate::push::{EventStream, PushFabric, SubscriberAuth, Subscription};
use crate::store::{MemoryStore, Store};
use crate::tasks::TaskRunner;
use crate::tools::ToolRegistry;
use careerflow_common::{
    Attachment, ConversationId, Goal, GoalId, LlmProvider, Rating, Step, SystemConfig, TaskRunId,
    TraceId, UserId,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct CareerFlowBuilder {
    config: SystemConfig,
    provider: Arc<dyn LlmProvider>,
    auth: Arc<dyn SubscriberAuth>,
    store: Option<Arc<dyn Store>>,
    tools: Option<ToolRegistry>,
}

impl CareerFlowBuilder {
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn build(self) -> CareerFlow {
        let config = self.config;
        let provider = self.provider;
        let store: Arc<dyn Store> = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let tools = Arc::new(self.tools.unwrap_or_else(ToolRegistry::with_builtin_tools));
        let agents = Arc::new(AgentRegistry::from_configs(&config.agents));
        let fabric = Arc::new(PushFabric::new(config.push.clone(), self.auth));

        let runtime = AgentRuntime::new(
            Arc::clone(&provider),
            Arc::clone(&tools),
            config.llm.clone(),
            config.runtime.clone(),
        );
        let router = IntentRouter::new(
            Arc::clone(&provider),
            config.llm.clone(),
            config.router.clone(),
        );
        let evaluator = PipelineEvaluator::new(Arc::clone(&provider), config.llm.clone());
        let negotiator = Negotiator::new(
            Arc::clone(&provider),
            config.llm.clone(),
            config.negotiation.clone(),
        );

        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&provider),
            agents,
            runtime,
            router,
            evaluator,
            negotiator,
            Arc::clone(&store),
            Arc::clone(&fabric),
            config.llm.clone(),
            config.turn.clone(),
        ));

        let planner = GoalPlanner::new(
            Arc::clone(&provider),
            config.llm.clone(),
            config.goals.clone(),
        );
        let goals = Arc::new(GoalExecutor::new(
            Arc::clone(&store),
            Arc::clone(&orchestrator),
            Arc::clone(&fabric),
            planner,
            Arc::clone(&provider),
            config.llm.clone(),
            config.goals.clone(),
        ));

        let tasks = Arc::new(TaskRunner::new(
            Arc::clone(&store),
            Arc::clone(&fabric),
            Arc::clone(&tools),
            config.tasks.clone(),
        ));

        CareerFlow {
            store,
            fabric,
            orchestrator,
            goals,
            tasks,
        }
    }
}

pub struct CareerFlow {
    store: Arc<dyn Store>,
    fabric: Arc<PushFabric>,
    orchestrator: Arc<Orchestrator>,
    goals: Arc<GoalExecutor>,
    tasks: Arc<TaskRunner>,
}

impl CareerFlow {
    pub fn builder(
        config: SystemConfig,
        provider: Arc<dyn LlmProvider>,
        auth: Arc<dyn SubscriberAuth>,
    ) -> CareerFlowBuilder {
        CareerFlowBuilder {
            config,
            provider,
            auth,
            store: None,
            tools: None,
        }
    }

    /// Spawn the fabric's heartbeat sweeper. Call once after construction.
    pub fn start(&self) {
        self.fabric.spawn_heartbeat_sweeper();
    }

    /// Submit a user message; returns the turn's ordered event stream.
    pub async fn run_turn(&self, request: TurnRequest) -> EngineResult<EventStream> {
        self.orchestrator.run_turn(request).await
    }

    /// Convenience wrapper for the common submission shape.
    pub async fn send_message(
        &self,
        user: UserId,
        conversation: Option<ConversationId>,
        text: impl Into<String>,
        attachment: Option<Attachment>,
    ) -> EngineResult<EventStream> {
        self.run_turn(TurnRequest {
            user,
            conversation,
            text: text.into(),
            attachment,
            profile_hint: None,
            pinned_route: None,
        })
        .await
    }

    /// Idempotent cancellation of the active turn of (user, conversation).
    pub fn cancel_turn(&self, user: UserId, conversation: ConversationId) {
        self.orchestrator.cancel_turn(user, conversation);
    }

    pub async fn create_goal(
        &self,
        user: UserId,
        objective: &str,
    ) -> EngineResult<(Goal, Vec<Step>)> {
        self.goals.create_goal(user, objective, None).await
    }

    pub async fn get_goal(&self, goal: GoalId) -> EngineResult<Option<(Goal, Vec<Step>)>> {
        let Some(record) = self.store.goal(goal).await? else {
            return Ok(None);
        };
        let steps = self.store.steps(goal).await?;
        Ok(Some((record, steps)))
    }

    pub async fn execute_step(&self, goal: GoalId) -> EngineResult<EventStream> {
        self.goals.execute_step(goal).await
    }

    pub async fn auto_execute_goal(&self, goal: GoalId) -> EngineResult<EventStream> {
        self.goals.auto_execute(goal).await
    }

    pub fn cancel_goal(&self, goal: GoalId) {
        self.goals.cancel_goal(goal);
    }

    /// Authenticated push subscription.
    pub async fn subscribe(&self, auth_proof: &str) -> EngineResult<Subscription> {
        self.fabric.subscribe(auth_proof).await
    }

    /// Annotate a trace with user feedback. Accepts duplicates; only the
    /// first recording is kept.
    pub async fn submit_feedback(&self, trace: TraceId, rating: Rating) -> EngineResult<()> {
        let _recorded = self.store.set_feedback(trace, rating).await?;
        Ok(())
    }

    /// One-shot background task execution.
    pub async fn run_task(
        &self,
        user: UserId,
        kind: &str,
        config: Value,
    ) -> EngineResult<TaskRunId> {
        self.tasks.run_once(user, kind, config).await
    }

    /// Interval scheduling for periodic task types.
    pub fn schedule_task(
        &self,
        user: UserId,
        kind: &'static str,
        interval: Duration,
        config: Value,
    ) -> CancellationToken {
        self.tasks.schedule(user, kind, interval, config)
    }

    pub fn cancel_task(&self, run: TaskRunId) {
        self.tasks.cancel(run);
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn fabric(&self) -> &Arc<PushFabric> {
        &self.fabric
    }
}
