use async_trait::async_trait;
use switchyard_core::{
    ActivityEntry, Event, Handoff, RetryCounters, ReviewItem, ReviewResponse, SwitchyardResult,
    Task, TaskState,
};
use uuid::Uuid;

/// Persistence for tasks, the event trail, handoffs, bus activity, and review items.
///
/// Events and activity entries are append-only. Task state only changes through
/// [`DurableStore::update_task_state`], which is a compare-and-set on the state the
/// caller last read.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Persist a new task.
    async fn create_task(&self, task: &Task) -> SwitchyardResult<()>;

    /// Fetch a task by id.
    async fn get_task(&self, id: Uuid) -> SwitchyardResult<Option<Task>>;

    /// Move a task from `expected` to `next`.
    ///
    /// Fails with `StaleState` if the stored state is not `expected`, and with `Store`
    /// if the task does not exist. Returns the updated task.
    async fn update_task_state(
        &self,
        id: Uuid,
        expected: TaskState,
        next: TaskState,
    ) -> SwitchyardResult<Task>;

    /// Overwrite a task's retry counters and risk score.
    async fn update_task(
        &self,
        id: Uuid,
        retries: RetryCounters,
        risk_score: Option<u32>,
    ) -> SwitchyardResult<Task>;

    /// All tasks, oldest first.
    async fn list_tasks(&self) -> SwitchyardResult<Vec<Task>>;

    /// Append one event to the trail.
    async fn append_event(&self, event: &Event) -> SwitchyardResult<()>;

    /// Events of one trace, in append order.
    async fn list_events(&self, trace_id: Uuid) -> SwitchyardResult<Vec<Event>>;

    /// Every event in append order, including agent-level events with no trace.
    async fn all_events(&self) -> SwitchyardResult<Vec<Event>>;

    /// Persist a new handoff.
    async fn create_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()>;

    /// Overwrite an existing handoff.
    async fn update_handoff(&self, handoff: &Handoff) -> SwitchyardResult<()>;

    /// Fetch a handoff by id.
    async fn get_handoff(&self, id: Uuid) -> SwitchyardResult<Option<Handoff>>;

    /// All handoffs, oldest first.
    async fn list_handoffs(&self) -> SwitchyardResult<Vec<Handoff>>;

    /// Append one bus activity entry.
    async fn append_activity(&self, entry: &ActivityEntry) -> SwitchyardResult<()>;

    /// Every bus activity entry in append order.
    async fn list_activity(&self) -> SwitchyardResult<Vec<ActivityEntry>>;

    /// Persist a new review item.
    async fn create_review(&self, item: &ReviewItem) -> SwitchyardResult<()>;

    /// Fetch a review item by id.
    async fn get_review(&self, id: Uuid) -> SwitchyardResult<Option<ReviewItem>>;

    /// Record the single terminal response of a review item.
    ///
    /// Fails with `Review` if the item is missing, already answered, or does not
    /// offer the chosen action.
    async fn resolve_review(&self, id: Uuid, response: ReviewResponse)
        -> SwitchyardResult<ReviewItem>;

    /// Review items, oldest first, optionally only the unanswered ones.
    async fn list_reviews(&self, pending_only: bool) -> SwitchyardResult<Vec<ReviewItem>>;
}
