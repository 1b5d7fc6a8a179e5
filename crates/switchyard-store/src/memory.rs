use crate::store::DurableStore;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use switchyard_core::{
    ActivityEntry, Event, Handoff, RetryCounters, ReviewItem, ReviewResponse, SwitchyardError,
    SwitchyardResult, Task, TaskState,
};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub(crate) struct Tables {
    pub(crate) tasks: HashMap<Uuid, Task>,
    pub(crate) events: Vec<Event>,
    pub(crate) handoffs: HashMap<Uuid, Handoff>,
    pub(crate) activity: Vec<ActivityEntry>,
    pub(crate) reviews: HashMap<Uuid, ReviewItem>,
}

/// Process-local store. Everything is lost when the process exits.
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
        }
    }

    pub(crate) fn from_tables(tables: Tables) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Put a task back as it was before a failed write, or drop it if it was new.
    pub(crate) async fn restore_task(&self, id: Uuid, previous: Option<Task>) {
        let mut tables = self.tables.write().await;
        match previous {
            Some(task) => tables.tasks.insert(id, task),
            None => tables.tasks.remove(&id),
        };
    }

    pub(crate) async fn restore_handoff(&self, id: Uuid, previous: Option<Handoff>) {
        let mut tables = self.tables.write().await;
        match previous {
            Some(handoff) => tables.handoffs.insert(id, handoff),
            None => tables.handoffs.remove(&id),
        };
    }

    pub(crate) async fn restore_review(&self, id: Uuid, previous: Option<ReviewItem>) {
        let mut tables = self.tables.write().await;
        match previous {
            Some(item) => tables.reviews.insert(id, item),
            None => tables.reviews.remove(&id),
        };
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn missing_task(id: Uuid) -> SwitchyardError {
    SwitchyardError::Store(format!("task {id} not found"))
}

fn sorted_by<T, K: Ord>(mut items: Vec<T>, key: impl Fn(&T) -> K) -> Vec<T> {
    items.sort_by_key(key);
    items
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn create_task(&self, task: &Task) -> SwitchyardResult<()> {
        let mut tables = self.tables.write().await;
        if tables.tasks.contains_key(&task.id) {
            return Err(SwitchyardError::Store(format!("task {} already exists", task.id)));
        }
        tables.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: Uuid) -> SwitchyardResult<Option<Task>> {
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn update_task_state(
        &self,
        id: Uuid,
        expected: TaskState,
        next: TaskState,
    ) -> SwitchyardResult<Task> {
        let mut tables = self.tables.write().await;
        let task = tables.tasks.get_mut(&id).ok_or_else(|| missing_task(id))?;
        if task.state != expected {
            return Err(SwitchyardError::StaleState {
                task_id: id,
                expected,
                actual: task.state,
            });
        }
        task.state = next;
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    async fn update_task(
        &self,
        id: Uuid,
        retries: RetryCounters,
        risk_score: Option<u32>,
    ) -> SwitchyardResult<Task> {
        let mut tables = self.tables.write().await;
        let task = tables.tasks.get_mut(&id).ok_or_else(|| missing_task(id))?;
        task.retries = retries;
        task.risk_score = risk_score;
        Ok(task.clone())
    }

    async fn list_tasks(&self) -> SwitchyardResult<Vec<Task>> {
        let tasks = self.tables.read().await.tasks.values().cloned().collect();
        Ok(sorted_by(tasks, |t: &Task| t.created_at))
    }

    async fn append_event(&self, event: &Event) -> SwitchyardResult<()> {
        self.tables.write().await.events.push(event.clone());
        Ok(())
    }

    async fn list_events(&self, trace_id: Uuid) -> SwitchyardResult<Vec<Event>> {
        let tables = self.tables.read().await;
        Ok(tables
            .events
            .iter()
            .filter(|e| e.trace_id == Some(trace_id))
            .cloned()
            .collect())
    }

    async fn all_events(&self) -> SwitchyardResult<Vec<Event>> {
        Ok(self.tables.read().await.events.clone())
    }

    async fn create_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()> {
        let mut tables = self.tables.write().await;
        if tables.handoffs.contains_key(&handoff.id) {
            return Err(SwitchyardError::Store(format!(
                "handoff {} already exists",
                handoff.id
            )));
        }
        tables.handoffs.insert(handoff.id, handoff.clone());
        Ok(())
    }

    async fn update_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()> {
        let mut tables = self.tables.write().await;
        match tables.handoffs.get_mut(&handoff.id) {
            Some(stored) => {
                *stored = handoff.clone();
                Ok(())
            }
            None => Err(SwitchyardError::Store(format!(
                "handoff {} not found",
                handoff.id
            ))),
        }
    }

    async fn get_handoff(&self, id: Uuid) -> SwitchyardResult<Option<Handoff>> {
        Ok(self.tables.read().await.handoffs.get(&id).cloned())
    }

    async fn list_handoffs(&self) -> SwitchyardResult<Vec<Handoff>> {
        let handoffs = self.tables.read().await.handoffs.values().cloned().collect();
        Ok(sorted_by(handoffs, |h: &Handoff| h.created_at))
    }

    async fn append_activity(&self, entry: &ActivityEntry) -> SwitchyardResult<()> {
        self.tables.write().await.activity.push(entry.clone());
        Ok(())
    }

    async fn list_activity(&self) -> SwitchyardResult<Vec<ActivityEntry>> {
        Ok(self.tables.read().await.activity.clone())
    }

    async fn create_review(&self, item: &ReviewItem) -> SwitchyardResult<()> {
        let mut tables = self.tables.write().await;
        if tables.reviews.contains_key(&item.id) {
            return Err(SwitchyardError::Store(format!("review {} already exists", item.id)));
        }
        tables.reviews.insert(item.id, item.clone());
        Ok(())
    }

    async fn get_review(&self, id: Uuid) -> SwitchyardResult<Option<ReviewItem>> {
        Ok(self.tables.read().await.reviews.get(&id).cloned())
    }

    async fn resolve_review(
        &self,
        id: Uuid,
        response: ReviewResponse,
    ) -> SwitchyardResult<ReviewItem> {
        let mut tables = self.tables.write().await;
        let item = tables
            .reviews
            .get_mut(&id)
            .ok_or_else(|| SwitchyardError::Review(format!("review {id} not found")))?;
        item.respond(response)?;
        Ok(item.clone())
    }

    async fn list_reviews(&self, pending_only: bool) -> SwitchyardResult<Vec<ReviewItem>> {
        let reviews = self
            .tables
            .read()
            .await
            .reviews
            .values()
            .filter(|r| !pending_only || r.is_pending())
            .cloned()
            .collect();
        Ok(sorted_by(reviews, |r: &ReviewItem| r.created_at))
    }
}
