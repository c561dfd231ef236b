//! End-to-end orchestration scenarios against the scripted provider.

mod common;

use careerflow_engine::EngineError;
use careerflow_common::{AgentStatus, ErrorKind, EventKind, Rating, Role, SystemConfig, UserId};
use common::*;
use std::sync::Arc;
use std::time::Duration;

fn first_conversation_id(events: &[careerflow_common::Envelope]) -> careerflow_common::ConversationId {
    events
        .iter()
        .find_map(|e| match &e.event {
            EventKind::ConversationId { conversation_id } => Some(*conversation_id),
            _ => None,
        })
        .expect("turn should announce its conversation")
}

#[tokio::test]
async fn direct_answer_path_streams_content_and_persists() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("general_chat", &[], 0.9));
    provider.push_stream("Hey! I can search jobs, analyze fit and prep interviews.");

    let system = system(Arc::clone(&provider));
    let stream = system
        .send_message(UserId(1), None, "hello", None)
        .await
        .unwrap();
    let events = stream.collect().await;

    let kinds = kinds(&events);
    assert_eq!(kinds.first(), Some(&"conversation_id"));
    assert_eq!(kinds.get(1), Some(&"routing"));
    assert!(kinds.contains(&"content"));
    assert_eq!(kinds[kinds.len() - 2], "trace_ids");
    assert_eq!(kinds[kinds.len() - 1], "done");

    // routing carried an empty agent list
    let routed_empty = events.iter().any(|e| {
        matches!(&e.event, EventKind::Routing { agents, .. } if agents.is_empty())
    });
    assert!(routed_empty);

    // one trace for the direct path
    let trace_count = events
        .iter()
        .find_map(|e| match &e.event {
            EventKind::TraceIds { ids } => Some(ids.len()),
            _ => None,
        })
        .unwrap();
    assert_eq!(trace_count, 1);

    // assistant message persisted non-empty
    let conversation = first_conversation_id(&events);
    let messages = system.store().messages(conversation).await.unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1].role, Role::Assistant);
    assert!(!messages[1].content.trim().is_empty());
}

#[tokio::test]
async fn single_agent_pipeline_runs_tool_and_synthesizes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("job_search", &["scout"], 0.9));
    provider.push_structured(tool_move_json(
        "search_jobs",
        serde_json::json!({"keywords": ["rust"], "max_results": 15}),
    ));
    provider.push_structured(final_move_json("Found 2 strong remote Rust roles.", 0.85));
    provider.push_structured(eval_json("continue", "good output", None));
    provider.push_stream("Here are the best matches I found for you.");

    let system = system(Arc::clone(&provider));
    let stream = system
        .send_message(UserId(1), None, "Search for remote Rust jobs", None)
        .await
        .unwrap();
    let events = stream.collect().await;
    let kinds = kinds(&events);

    let expected_subsequence = [
        "routing",
        "agent_status",
        "agent_reasoning",
        "tool_status",
        "agent_status",
        "evaluator",
        "content",
        "trace_ids",
        "done",
    ];
    let mut cursor = 0;
    for kind in &kinds {
        if cursor < expected_subsequence.len() && *kind == expected_subsequence[cursor] {
            cursor += 1;
        }
    }
    assert_eq!(
        cursor,
        expected_subsequence.len(),
        "event kinds {kinds:?} missed part of {expected_subsequence:?}"
    );

    // reasoning event names the tool
    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::AgentReasoning { agent, tool: Some(tool), .. }
            if agent == "scout" && tool == "search_jobs"
    )));

    // evaluator continued
    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::Evaluator { decision, .. } if decision == "continue"
    )));

    // per-subscription sequence numbers start at 1 and increase strictly
    for (index, envelope) in events.iter().enumerate() {
        assert_eq!(envelope.seq, index as u64 + 1);
    }
}

#[tokio::test]
async fn cancellation_mid_agent_terminates_cleanly() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("job_search", &["scout"], 0.9));
    // Scout reaches for the parked research tool, which holds the turn
    // open until cancellation lands.
    provider.push_structured(tool_move_json(
        "research_company",
        serde_json::json!({"company": "Lumenware"}),
    ));

    let system = system_with_tools(Arc::clone(&provider), parked_tools());
    let conversation = system
        .store()
        .create_conversation(UserId(1), "cancel test")
        .await
        .unwrap();

    let mut stream = system
        .send_message(UserId(1), Some(conversation.id), "research Lumenware", None)
        .await
        .unwrap();

    let mut events = Vec::new();
    while let Some(envelope) = stream.next().await {
        if matches!(
            &envelope.event,
            EventKind::AgentStatus {
                status: AgentStatus::Running,
                ..
            }
        ) {
            system.cancel_turn(UserId(1), conversation.id);
        }
        events.push(envelope);
    }

    // failed status carries the cancellation marker
    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::AgentStatus {
            status: AgentStatus::Failed,
            message: Some(message),
            ..
        } if message == "cancelled"
    )));

    // abbreviated assistant message mentions the cancellation
    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::Content { text } if text.contains("cancelled")
    )));

    let kinds = kinds(&events);
    assert!(kinds.contains(&"trace_ids"));
    assert_eq!(kinds.last(), Some(&"done"));

    // no agent starts after the cancel was observed
    let failed_at = events
        .iter()
        .position(|e| matches!(
            &e.event,
            EventKind::AgentStatus { status: AgentStatus::Failed, .. }
        ))
        .unwrap();
    assert!(!events[failed_at..].iter().any(|e| matches!(
        &e.event,
        EventKind::AgentStatus { status: AgentStatus::Running, .. }
    )));

    // repeated cancellation is a no-op and emits nothing further
    system.cancel_turn(UserId(1), conversation.id);
    system.cancel_turn(UserId(1), conversation.id);
    let mut quiet = system.fabric().attach(UserId(1));
    let extra = tokio::time::timeout(Duration::from_millis(100), quiet.next()).await;
    assert!(extra.is_err(), "repeated cancel published events");
}

#[tokio::test]
async fn evaluator_stop_short_circuits_the_plan() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("write_materials", &["match", "forge"], 0.9));
    provider.push_structured(final_move_json("Weak fit: missing core skills.", 0.2));
    provider.push_structured(eval_json("stop", "confidence too low to write materials", None));
    provider.push_stream("Based on the analysis, this role is not a strong fit.");

    let system = system(Arc::clone(&provider));
    let stream = system
        .send_message(UserId(1), None, "apply to this role for me", None)
        .await
        .unwrap();
    let events = stream.collect().await;

    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::Evaluator { decision, .. } if decision == "stop"
    )));

    // forge never ran
    assert!(!events.iter().any(|e| matches!(
        &e.event,
        EventKind::AgentStatus { agent, .. } if agent == "forge"
    )));
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn mostly_failed_pipeline_apologizes() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("job_search", &["scout"], 0.9));
    // No further scripted responses: scout's reasoning call fails.

    let system = system(Arc::clone(&provider));
    let stream = system
        .send_message(UserId(1), None, "find roles", None)
        .await
        .unwrap();
    let events = stream.collect().await;

    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::AgentStatus { status: AgentStatus::Failed, .. }
    )));
    let apology = events
        .iter()
        .find_map(|e| match &e.event {
            EventKind::Content { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap();
    assert!(apology.contains("sorry"));
    assert!(apology.contains("Scout"));
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn exhausted_turn_budget_still_terminates_with_done() {
    let mut config = SystemConfig::default();
    config.turn.budget_secs = 0;

    let provider = Arc::new(ScriptedProvider::new().with_delay(Duration::from_millis(50)));
    provider.push_structured(route_json("job_search", &["scout"], 0.9));

    let system = system_with_config(Arc::clone(&provider), config);
    let stream = system
        .send_message(UserId(1), None, "find roles", None)
        .await
        .unwrap();
    let events = stream.collect().await;

    assert!(events.iter().any(|e| matches!(
        &e.event,
        EventKind::Error {
            kind: ErrorKind::TurnBudgetExceeded,
            ..
        }
    )));
    assert_eq!(kinds(&events).last(), Some(&"done"));
}

#[tokio::test]
async fn empty_user_text_is_rejected() {
    let provider = Arc::new(ScriptedProvider::new());
    let system = system(provider);
    let err = system
        .send_message(UserId(1), None, "   ", None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
}

#[tokio::test]
async fn feedback_is_recorded_once() {
    let provider = Arc::new(ScriptedProvider::new());
    provider.push_structured(route_json("general_chat", &[], 0.9));
    provider.push_stream("Hi there!");

    let system = system(Arc::clone(&provider));
    let events = system
        .send_message(UserId(1), None, "hello", None)
        .await
        .unwrap()
        .collect()
        .await;

    let trace_id = events
        .iter()
        .find_map(|e| match &e.event {
            EventKind::TraceIds { ids } => ids.first().copied(),
            _ => None,
        })
        .unwrap();

    system.submit_feedback(trace_id, Rating::Positive).await.unwrap();
    // duplicate submission is accepted but not recorded
    system.submit_feedback(trace_id, Rating::Negative).await.unwrap();

    let trace = system.store().trace(trace_id).await.unwrap().unwrap();
    assert_eq!(trace.feedback.unwrap().rating, Rating::Positive);
}
