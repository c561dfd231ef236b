//! Background task runner scenarios.

mod common;

use careerflow_common::{Application, ApplicationStatus, EventKind, TaskStatus, UserId};
use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn wait_for_terminal_update(
    subscription: &mut careerflow_engine::Subscription,
) -> (TaskStatus, Option<String>) {
    loop {
        let envelope = tokio::time::timeout(Duration::from_secs(5), subscription.next())
            .await
            .expect("task update should arrive")
            .expect("subscription should stay open");
        if let EventKind::TaskUpdate {
            status, summary, ..
        } = envelope.event
        {
            if status != TaskStatus::Running {
                return (status, summary);
            }
        }
    }
}

#[tokio::test]
async fn company_deep_dive_notifies_and_completes() {
    let system = system(Arc::new(ScriptedProvider::new()));
    let mut subscription = system.subscribe("token-1").await.unwrap();

    let run_id = system
        .run_task(
            UserId(1),
            "company_deep_dive",
            json!({"company": "Lumenware", "role": "Staff Engineer"}),
        )
        .await
        .unwrap();

    let (status, summary) = wait_for_terminal_update(&mut subscription).await;
    assert_eq!(status, TaskStatus::Completed);
    assert!(summary.unwrap().contains("Lumenware"));

    let run = system.store().task_run(run_id).await.unwrap().unwrap();
    assert_eq!(run.status, TaskStatus::Completed);
    assert!(run.finished_at.is_some());

    let notifications = system.store().notifications(UserId(1)).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "company_research");
    assert!(notifications[0].body.contains("Lumenware"));
}

#[tokio::test]
async fn job_monitor_requires_keywords() {
    let system = system(Arc::new(ScriptedProvider::new()));
    let mut subscription = system.subscribe("token-2").await.unwrap();

    system
        .run_task(UserId(2), "job_monitor", json!({}))
        .await
        .unwrap();

    let (status, _) = wait_for_terminal_update(&mut subscription).await;
    assert_eq!(status, TaskStatus::Failed);
    assert!(system
        .store()
        .notifications(UserId(2))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn job_monitor_notifies_once_per_unread_match() {
    let system = system(Arc::new(ScriptedProvider::new()));

    for _ in 0..2 {
        let run_id = system
            .run_task(UserId(3), "job_monitor", json!({"keywords": ["rust"]}))
            .await
            .unwrap();
        // poll the store rather than the stream; both runs publish updates
        for _ in 0..50 {
            let run = system.store().task_run(run_id).await.unwrap().unwrap();
            if run.status != TaskStatus::Pending && run.status != TaskStatus::Running {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    // the second sweep deduplicated against the unread notification
    let notifications = system.store().notifications(UserId(3)).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "job_match");
}

#[tokio::test]
async fn application_tracker_reminds_about_stale_applications() {
    let system = system(Arc::new(ScriptedProvider::new()));
    system
        .store()
        .upsert_application(Application {
            id: Uuid::new_v4(),
            user_id: UserId(4),
            job_title: "Backend Engineer".into(),
            company: "Harborview".into(),
            status: ApplicationStatus::Applied,
            updated_at: Utc::now() - ChronoDuration::days(10),
        })
        .await
        .unwrap();

    let mut subscription = system.subscribe("token-4").await.unwrap();
    system
        .run_task(UserId(4), "application_tracker", json!({}))
        .await
        .unwrap();

    let (status, summary) = wait_for_terminal_update(&mut subscription).await;
    assert_eq!(status, TaskStatus::Completed);
    assert!(summary.unwrap().contains("1 notifications"));

    let notifications = system.store().notifications(UserId(4)).await.unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].kind, "application_reminder");
    assert!(notifications[0].body.contains("Harborview"));
}

#[tokio::test]
async fn unknown_task_kind_is_rejected() {
    let system = system(Arc::new(ScriptedProvider::new()));
    let err = system
        .run_task(UserId(1), "mine_bitcoin", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, careerflow_engine::EngineError::InvalidInput(_)));
}
