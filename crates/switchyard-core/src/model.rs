use crate::lifecycle::{TaskState, Transition, Trigger};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who caused an event: an agent, a human supervisor acting in a role, or the system.
///
/// Serialized as `agent:<id>`, `user:<role>`, or `system`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Actor {
    /// A registered agent, by id.
    Agent(String),
    /// A human, by role.
    User(String),
    /// The orchestration runtime itself.
    System,
}

impl Actor {
    /// An agent actor.
    pub fn agent(id: impl Into<String>) -> Self {
        Actor::Agent(id.into())
    }

    /// A human actor acting in `role`.
    pub fn user(role: impl Into<String>) -> Self {
        Actor::User(role.into())
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Actor::Agent(id) => write!(f, "agent:{id}"),
            Actor::User(role) => write!(f, "user:{role}"),
            Actor::System => write!(f, "system"),
        }
    }
}

impl From<Actor> for String {
    fn from(actor: Actor) -> Self {
        actor.to_string()
    }
}

impl From<String> for Actor {
    fn from(s: String) -> Self {
        if s == "system" {
            Actor::System
        } else if let Some(role) = s.strip_prefix("user:") {
            Actor::User(role.to_string())
        } else if let Some(id) = s.strip_prefix("agent:") {
            Actor::Agent(id.to_string())
        } else {
            Actor::Agent(s)
        }
    }
}

/// Retry counters per failure class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryCounters {
    /// Attempts whose output failed the schema check.
    pub schema: u32,
    /// Re-plans requested by a human reviewer.
    pub modification: u32,
}

/// The unit of work tracked from submission to a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub id: Uuid,
    /// Originating intent, e.g. `"price_quote"`.
    pub intent: String,
    /// Current lifecycle state. Only changes through the store's compare-and-set.
    pub state: TaskState,
    /// The normalized request payload.
    pub payload: serde_json::Value,
    /// Retries spent so far.
    #[serde(default)]
    pub retries: RetryCounters,
    /// Risk score, unset until a plan has been scored.
    pub risk_score: Option<u32>,
    /// Correlates every event recorded for this task.
    pub trace_id: Uuid,
    /// Free-form grouping tag.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// When the task was submitted.
    pub created_at: DateTime<Utc>,
    /// When the task last changed.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// A fresh task in `submitted` with its own trace id.
    pub fn new(intent: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            intent: intent.into(),
            state: TaskState::Submitted,
            payload,
            retries: RetryCounters::default(),
            risk_score: None,
            trace_id: Uuid::new_v4(),
            pipeline: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the route label.
    pub fn with_pipeline(mut self, pipeline: Option<String>) -> Self {
        self.pipeline = pipeline;
        self
    }
}

/// What an [`Event`] records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A lifecycle state transition.
    Transition,
    /// A dispatch attempt was handed to an agent.
    Handoff,
    /// A dispatched handler returned successfully.
    TaskEnd,
    /// A dispatched handler failed.
    Error,
    /// An agent was blocked waiting on another agent.
    Blocked,
    /// A blocked agent was released.
    Unblocked,
    /// A decision was escalated to a human.
    Escalation,
    /// A dependency failed and a deterministic fallback was used instead.
    Degraded,
}

/// An immutable, append-only record of one transition or significant occurrence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique event id.
    pub id: Uuid,
    /// What happened.
    pub kind: EventKind,
    /// Unset for agent-level events that belong to no task.
    pub task_id: Option<Uuid>,
    /// Trace the event belongs to.
    pub trace_id: Option<Uuid>,
    /// State before a transition.
    pub from_state: Option<TaskState>,
    /// State after a transition.
    pub to_state: Option<TaskState>,
    /// Trigger of a transition.
    #[serde(default)]
    pub trigger: Option<Trigger>,
    /// Who caused it.
    pub actor: Actor,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
    /// Free-form detail.
    #[serde(default)]
    pub note: Option<String>,
}

impl Event {
    /// An event with no task attached.
    pub fn new(kind: EventKind, actor: Actor) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            task_id: None,
            trace_id: None,
            from_state: None,
            to_state: None,
            trigger: None,
            actor,
            timestamp: Utc::now(),
            note: None,
        }
    }

    /// The event accompanying one applied lifecycle transition.
    pub fn transition(task: &Task, transition: &Transition, actor: Actor) -> Self {
        let mut event = Self::new(EventKind::Transition, actor).for_task(task);
        event.from_state = Some(transition.from);
        event.to_state = Some(transition.to);
        event.trigger = Some(transition.trigger);
        event
    }

    /// Attach the event to `task` and its trace.
    pub fn for_task(mut self, task: &Task) -> Self {
        self.task_id = Some(task.id);
        self.trace_id = Some(task.trace_id);
        self
    }

    /// Attach the event to a task and trace by id.
    pub fn with_trace(mut self, task_id: Option<Uuid>, trace_id: Option<Uuid>) -> Self {
        self.task_id = task_id;
        self.trace_id = trace_id;
        self
    }

    /// Add a free-form note.
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Status of a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffStatus {
    /// Handed to the agent, no result yet.
    Dispatching,
    /// The agent returned a result.
    Completed,
    /// The agent failed or could not be reached.
    Failed,
}

/// The audit record of exactly one dispatch attempt. Retries create new handoffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handoff {
    /// Unique handoff id.
    pub id: Uuid,
    /// Dispatching agent.
    pub from_agent: String,
    /// Target agent.
    pub to_agent: String,
    /// Optional classification tag.
    pub intent: Option<String>,
    /// What the target was given.
    pub payload: serde_json::Value,
    /// Where the attempt stands.
    pub status: HandoffStatus,
    /// The target's result once completed.
    pub result: Option<serde_json::Value>,
    /// Failure message once failed.
    #[serde(default)]
    pub error: Option<String>,
    /// Task the dispatch was made for.
    #[serde(default)]
    pub task_id: Option<Uuid>,
    /// Trace the dispatch was made under.
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    /// When the attempt started.
    pub created_at: DateTime<Utc>,
    /// When the attempt finished either way.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Handoff {
    /// A new attempt in `dispatching`.
    pub fn new(
        from_agent: impl Into<String>,
        to_agent: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_agent: from_agent.into(),
            to_agent: to_agent.into(),
            intent: None,
            payload,
            status: HandoffStatus::Dispatching,
            result: None,
            error: None,
            task_id: None,
            trace_id: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Mark the attempt completed with `result`.
    pub fn complete(&mut self, result: serde_json::Value) {
        self.status = HandoffStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
    }

    /// Mark the attempt failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = HandoffStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }
}
