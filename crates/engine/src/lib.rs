//! CareerFlow orchestration engine.
//!
//! The core of the multi-agent career assistant: tool registry, agent
//! runtime, intent routing, evaluator-driven pipelines, negotiation,
//! goal planning/execution, background tasks and the per-user push
//! fabric. Transports (HTTP, WebSocket) and durable persistence are
//! external collaborators wired in through the traits in [`push`] and
//! [`store`].

pub mod agents;
pub mod context;
pub mod error;
pub mod goals;
pub mod orchestrator;
pub mod push;
pub mod store;
pub mod system;
pub mod tasks;
pub mod tools;
pub mod trace;

pub use agents::{AgentRegistry, IntentRouter, Negotiator, PipelineEvaluator, RoutingDecision};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{Orchestrator, TurnOutcome, TurnRequest};
pub use push::{EventStream, PushFabric, SubscriberAuth, Subscription};
pub use store::{MemoryStore, NewStep, NotificationDraft, Store};
pub use system::{CareerFlow, CareerFlowBuilder};
pub use tasks::{BackgroundTask, TaskRunner};
pub use tools::{ToolHandler, ToolRegistry};
pub use trace::{Trace, TraceEntry, TraceStatus};
