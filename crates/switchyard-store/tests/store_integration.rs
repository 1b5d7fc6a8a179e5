use serde_json::json;
use switchyard_core::{
    ActivityEntry, Actor, BusMessage, Event, EventKind, Handoff, HandoffStatus, RetryCounters,
    ReviewAction, ReviewItem, ReviewKind, ReviewResponse, SwitchyardError, Task, TaskLifecycle,
    TaskState, Trigger,
};
use switchyard_store::{DurableStore, FileStore, InMemoryStore};
use uuid::Uuid;

/// Helper: create a FileStore in a temp directory.
async fn temp_store() -> (FileStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileStore::open(tmp.path().join("data")).await.unwrap();
    (store, tmp)
}

/// Replace one record directory of a `temp_store` with a plain file, so every
/// write into that table fails.
async fn break_table(tmp: &tempfile::TempDir, table: &str) {
    let path = tmp.path().join("data").join(table);
    tokio::fs::remove_dir_all(&path).await.unwrap();
    tokio::fs::write(&path, b"not a directory").await.unwrap();
}

/// Walk a task through `triggers`, recording one event per transition.
async fn drive(store: &dyn DurableStore, task: &Task, triggers: &[Trigger]) {
    let mut lifecycle = TaskLifecycle::new(task.state);
    for trigger in triggers {
        let transition = lifecycle.try_trigger(*trigger).unwrap();
        let updated = store
            .update_task_state(task.id, transition.from, transition.to)
            .await
            .unwrap();
        store
            .append_event(&Event::transition(&updated, &transition, Actor::agent("orchestrator")))
            .await
            .unwrap();
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_create_and_get_task() {
    let (store, _tmp) = temp_store().await;
    let task = Task::new("price_quote", json!({"sku": "A-1"}));
    store.create_task(&task).await.unwrap();

    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.intent, "price_quote");
    assert_eq!(loaded.state, TaskState::Submitted);
    assert_eq!(loaded.payload, json!({"sku": "A-1"}));
}

#[tokio::test]
async fn test_get_nonexistent_task_returns_none() {
    let (store, _tmp) = temp_store().await;
    assert!(store.get_task(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_cas_update_persists_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let task = Task::new("quote", json!({}));
    {
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.create_task(&task).await.unwrap();
        store
            .update_task_state(task.id, TaskState::Submitted, TaskState::Reasoning)
            .await
            .unwrap();
        store
            .update_task(
                task.id,
                RetryCounters {
                    schema: 2,
                    modification: 0,
                },
                Some(35),
            )
            .await
            .unwrap();
    }

    let reopened = FileStore::open(tmp.path()).await.unwrap();
    let loaded = reopened.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.state, TaskState::Reasoning);
    assert_eq!(loaded.retries.schema, 2);
    assert_eq!(loaded.risk_score, Some(35));
}

#[tokio::test]
async fn test_stale_state_is_reported() {
    let (store, _tmp) = temp_store().await;
    let task = Task::new("quote", json!({}));
    store.create_task(&task).await.unwrap();
    store
        .update_task_state(task.id, TaskState::Submitted, TaskState::Cancelled)
        .await
        .unwrap();

    let err = store
        .update_task_state(task.id, TaskState::Submitted, TaskState::Reasoning)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        SwitchyardError::StaleState {
            expected: TaskState::Submitted,
            actual: TaskState::Cancelled,
            ..
        }
    ));
}

#[tokio::test]
async fn test_concurrent_writers_only_one_wins() {
    let store = std::sync::Arc::new(InMemoryStore::new());
    let task = Task::new("quote", json!({}));
    store.create_task(&task).await.unwrap();

    let mut handles = Vec::new();
    for next in [TaskState::Reasoning, TaskState::Cancelled] {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store
                .update_task_state(task.id, TaskState::Submitted, next)
                .await
                .is_ok()
        }));
    }
    let mut wins = 0;
    for handle in handles {
        if handle.await.unwrap() {
            wins += 1;
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_failed_task_write_leaves_cache_unchanged() {
    let (store, tmp) = temp_store().await;
    let task = Task::new("quote", json!({}));
    store.create_task(&task).await.unwrap();
    break_table(&tmp, "tasks").await;

    assert!(store
        .update_task_state(task.id, TaskState::Submitted, TaskState::Reasoning)
        .await
        .is_err());
    assert!(store
        .update_task(
            task.id,
            RetryCounters {
                schema: 1,
                modification: 0,
            },
            Some(80),
        )
        .await
        .is_err());
    let loaded = store.get_task(task.id).await.unwrap().unwrap();
    assert_eq!(loaded.state, TaskState::Submitted);
    assert_eq!(loaded.retries.schema, 0);
    assert_eq!(loaded.risk_score, None);

    let orphan = Task::new("quote", json!({}));
    assert!(store.create_task(&orphan).await.is_err());
    assert!(store.get_task(orphan.id).await.unwrap().is_none());
    assert_eq!(store.list_tasks().await.unwrap().len(), 1);
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_events_are_ordered_per_trace_and_survive_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let task = Task::new("quote", json!({}));
    let other = Task::new("research", json!({}));
    {
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.create_task(&task).await.unwrap();
        store.create_task(&other).await.unwrap();
        drive(&store, &task, &[Trigger::Start, Trigger::PlanReady]).await;
        drive(&store, &other, &[Trigger::Cancel]).await;
        store
            .append_event(&Event::new(EventKind::Blocked, Actor::agent("sales")))
            .await
            .unwrap();
    }

    let store = FileStore::open(tmp.path()).await.unwrap();
    let events = store.list_events(task.trace_id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].to_state, Some(TaskState::Reasoning));
    assert_eq!(events[1].to_state, Some(TaskState::PlanGenerated));
    assert_eq!(
        switchyard_core::replay(&events).unwrap(),
        TaskState::PlanGenerated
    );
    assert_eq!(store.all_events().await.unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// Handoffs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_handoff_create_update_list() {
    let (store, _tmp) = temp_store().await;
    let mut handoff = Handoff::new("orchestrator", "pricing", json!({"sku": "A"}));
    store.create_handoff(&handoff).await.unwrap();

    handoff.complete(json!({"price": 10}));
    store.update_handoff(&handoff).await.unwrap();

    let loaded = store.get_handoff(handoff.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, HandoffStatus::Completed);
    assert_eq!(loaded.result, Some(json!({"price": 10})));
    assert_eq!(store.list_handoffs().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_unknown_handoff_fails() {
    let (store, _tmp) = temp_store().await;
    let handoff = Handoff::new("a", "b", json!(null));
    assert!(matches!(
        store.update_handoff(&handoff).await,
        Err(SwitchyardError::Store(_))
    ));
}

// ---------------------------------------------------------------------------
// Activity and reviews
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_activity_log_appends() {
    let (store, tmp) = temp_store().await;
    let msg = BusMessage::new("sales", "pricing", "floor?", json!({}));
    store
        .append_activity(&ActivityEntry::new("agent:pricing:inbox", msg))
        .await
        .unwrap();
    let entries = store.list_activity().await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].channel, "agent:pricing:inbox");
    assert!(tmp.path().join("data").join("activity.jsonl").exists());
}

#[tokio::test]
async fn test_review_resolves_exactly_once_on_disk() {
    let tmp = tempfile::tempdir().unwrap();
    let item = ReviewItem::new(ReviewKind::DraftReview, "quote over limit", "orchestrator")
        .with_payload(json!({"discount": 40}));
    {
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.create_review(&item).await.unwrap();
        assert_eq!(store.list_reviews(true).await.unwrap().len(), 1);
        store
            .resolve_review(
                item.id,
                ReviewResponse::new(ReviewAction::RequestModification, "supervisor")
                    .with_note(Some("too generous".into())),
            )
            .await
            .unwrap();
    }

    let store = FileStore::open(tmp.path()).await.unwrap();
    let loaded = store.get_review(item.id).await.unwrap().unwrap();
    let response = loaded.response.unwrap();
    assert_eq!(response.action, ReviewAction::RequestModification);
    assert_eq!(response.note.as_deref(), Some("too generous"));
    assert!(store.list_reviews(true).await.unwrap().is_empty());
    assert!(store
        .resolve_review(item.id, ReviewResponse::new(ReviewAction::Approve, "supervisor"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_resolve_unknown_review_fails() {
    let store = InMemoryStore::new();
    let result = store
        .resolve_review(Uuid::new_v4(), ReviewResponse::new(ReviewAction::Approve, "x"))
        .await;
    assert!(matches!(result, Err(SwitchyardError::Review(_))));
}

#[tokio::test]
async fn test_failed_review_write_keeps_item_pending() {
    let (store, tmp) = temp_store().await;
    let item = ReviewItem::new(ReviewKind::RoutingReview, "two-step plan", "orchestrator");
    store.create_review(&item).await.unwrap();
    break_table(&tmp, "reviews").await;

    assert!(store
        .resolve_review(item.id, ReviewResponse::new(ReviewAction::Approve, "supervisor"))
        .await
        .is_err());
    assert!(store.get_review(item.id).await.unwrap().unwrap().is_pending());
    assert_eq!(store.list_reviews(true).await.unwrap().len(), 1);
}
