use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::{
    Actor, Event, EventKind, ReviewAction, ReviewItem, ReviewResponse, SwitchyardError,
    SwitchyardResult,
};
use switchyard_store::DurableStore;
use tokio::sync::{broadcast, oneshot, RwLock};
use tracing::{info, warn};
use uuid::Uuid;

const OBSERVER_CAPACITY: usize = 256;

/// Stores review items, notifies observers, and wakes whoever blocks on an answer.
pub struct ReviewDesk {
    store: Arc<dyn DurableStore>,
    waiters: RwLock<HashMap<Uuid, oneshot::Sender<ReviewResponse>>>,
    observers: broadcast::Sender<ReviewItem>,
}

impl ReviewDesk {
    /// A desk storing its items in `store`.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            store,
            waiters: RwLock::new(HashMap::new()),
            observers,
        }
    }

    /// Receive every review item opened from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ReviewItem> {
        self.observers.subscribe()
    }

    /// Persist a new review item and announce it.
    pub async fn open(&self, item: ReviewItem) -> SwitchyardResult<ReviewItem> {
        self.store.create_review(&item).await?;

        let mut event = Event::new(EventKind::Escalation, Actor::agent(&item.opened_by))
            .with_note(format!("{} opened: {}", item.kind.as_str(), item.subject));
        if let Some(task_id) = item.task_id {
            let trace_id = self.store.get_task(task_id).await?.map(|t| t.trace_id);
            event = event.with_trace(Some(task_id), trace_id);
        }
        self.store.append_event(&event).await?;

        info!(
            review_id = %item.id,
            kind = item.kind.as_str(),
            opened_by = %item.opened_by,
            "Review item opened"
        );
        // No observers is fine: the item is already persisted.
        let _ = self.observers.send(item.clone());
        Ok(item)
    }

    /// Open an item and suspend until a human answers it. There is no timeout.
    pub async fn open_and_wait(&self, item: ReviewItem) -> SwitchyardResult<ReviewResponse> {
        let id = item.id;
        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(id, tx);

        if let Err(e) = self.open(item).await {
            self.waiters.write().await.remove(&id);
            return Err(e);
        }

        rx.await.map_err(|_| {
            SwitchyardError::Review(format!("review {id} was dropped without an answer"))
        })
    }

    /// Record the single terminal answer and wake a blocked waiter, if any.
    pub async fn respond(
        &self,
        id: Uuid,
        action: ReviewAction,
        responder: &str,
        note: Option<String>,
    ) -> SwitchyardResult<ReviewItem> {
        let response = ReviewResponse::new(action, responder).with_note(note);
        let item = self.store.resolve_review(id, response.clone()).await?;
        info!(review_id = %id, action = %action, responder, "Review item answered");

        if let Some(waiter) = self.waiters.write().await.remove(&id) {
            if waiter.send(response).is_err() {
                warn!(review_id = %id, "Review waiter went away before the answer arrived");
            }
        }
        Ok(item)
    }

    /// Fetch an item by id.
    pub async fn get(&self, id: Uuid) -> SwitchyardResult<Option<ReviewItem>> {
        self.store.get_review(id).await
    }

    /// Unanswered items, oldest first.
    pub async fn pending(&self) -> SwitchyardResult<Vec<ReviewItem>> {
        self.store.list_reviews(true).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use switchyard_core::ReviewKind;
    use switchyard_store::InMemoryStore;

    fn desk() -> (Arc<ReviewDesk>, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        (Arc::new(ReviewDesk::new(store.clone())), store)
    }

    #[tokio::test]
    async fn test_open_persists_and_notifies() {
        let (desk, store) = desk();
        let mut observer = desk.subscribe();
        let item = ReviewItem::new(ReviewKind::AgentEscalation, "refund above limit", "billing")
            .with_payload(json!({"amount": 900}));
        let id = item.id;
        desk.open(item).await.unwrap();

        assert_eq!(observer.recv().await.unwrap().id, id);
        assert_eq!(desk.pending().await.unwrap().len(), 1);
        let events = store.all_events().await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Escalation);
    }

    #[tokio::test]
    async fn test_blocking_wait_wakes_on_answer() {
        let (desk, _) = desk();
        let mut observer = desk.subscribe();
        let item = ReviewItem::new(ReviewKind::AgentEscalation, "approve refund", "billing");

        let waiting = {
            let desk = desk.clone();
            tokio::spawn(async move { desk.open_and_wait(item).await })
        };
        let opened = observer.recv().await.unwrap();
        desk.respond(opened.id, ReviewAction::Approve, "supervisor", Some("ok".into()))
            .await
            .unwrap();

        let response = waiting.await.unwrap().unwrap();
        assert_eq!(response.action, ReviewAction::Approve);
        assert_eq!(response.responder, "supervisor");
        assert!(desk.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_answer_is_rejected() {
        let (desk, _) = desk();
        let item = desk
            .open(ReviewItem::new(ReviewKind::SchemaEscalation, "bad output", "pricing"))
            .await
            .unwrap();
        desk.respond(item.id, ReviewAction::Acknowledge, "ops", None).await.unwrap();
        let err = desk
            .respond(item.id, ReviewAction::Acknowledge, "ops", None)
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchyardError::Review(_)));
    }

    #[tokio::test]
    async fn test_unoffered_action_is_rejected() {
        let (desk, _) = desk();
        let item = desk
            .open(ReviewItem::new(ReviewKind::SchemaEscalation, "bad output", "pricing"))
            .await
            .unwrap();
        assert!(desk
            .respond(item.id, ReviewAction::Approve, "ops", None)
            .await
            .is_err());
        assert!(desk.get(item.id).await.unwrap().unwrap().is_pending());
    }
}
