use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use switchyard_core::TaskState;
use uuid::Uuid;

/// One routed unit of work inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    /// Target agent id.
    pub agent: String,
    /// What the agent is given.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Classification tag recorded on the handoff.
    #[serde(default)]
    pub intent: Option<String>,
    /// The step changes something outside the system (sends mail, books money, ...).
    #[serde(default)]
    pub external_side_effects: bool,
    /// May run without review when it is the plan's only step.
    #[serde(default)]
    pub auto_approve_eligible: bool,
}

impl PlanStep {
    /// A step with no side effects that is not eligible for auto-approval.
    pub fn new(agent: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            agent: agent.into(),
            payload,
            intent: None,
            external_side_effects: false,
            auto_approve_eligible: false,
        }
    }

    /// Mark the step eligible for auto-approval.
    pub fn eligible(mut self) -> Self {
        self.auto_approve_eligible = true;
        self
    }

    /// Mark the step as having external side effects.
    pub fn with_side_effects(mut self) -> Self {
        self.external_side_effects = true;
        self
    }

    /// Set the classification tag.
    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }
}

/// Where a plan came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanSource {
    /// Drafted by the text generator.
    Generated,
    /// Taken from a configured route.
    Template,
}

/// A routing score and what made it up.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// 0–100.
    pub score: u32,
    /// Human-readable contributions to the score.
    pub factors: Vec<String>,
}

/// An ordered list of steps for one task.
///
/// Plans are never edited; a re-plan produces a new plan with a new id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan id.
    pub id: Uuid,
    /// Steps in dispatch order.
    pub steps: Vec<PlanStep>,
    /// Routing risk.
    pub risk: RiskAssessment,
    /// Exactly one step, and that step is eligible. Risk is judged separately.
    pub auto_approve_eligible: bool,
    /// How the plan was drafted.
    pub source: PlanSource,
    /// When it was drafted.
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// An unscored plan over `steps`.
    pub fn new(steps: Vec<PlanStep>, source: PlanSource) -> Self {
        let auto_approve_eligible = steps.len() == 1 && steps.iter().all(|s| s.auto_approve_eligible);
        Self {
            id: Uuid::new_v4(),
            steps,
            risk: RiskAssessment::default(),
            auto_approve_eligible,
            source,
            created_at: Utc::now(),
        }
    }

    /// Attach the routing score.
    pub fn with_risk(mut self, risk: RiskAssessment) -> Self {
        self.risk = risk;
        self
    }

    /// Target agent ids in step order.
    pub fn targets(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.agent.as_str()).collect()
    }
}

/// The result one step's handler returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepOutput {
    /// The agent that produced it.
    pub agent: String,
    /// The dispatch that carried it.
    pub handoff_id: Uuid,
    /// What the handler returned.
    pub result: serde_json::Value,
}

/// Where a task stands after the driver stopped advancing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    /// The task.
    pub task_id: Uuid,
    /// Its trace.
    pub trace_id: Uuid,
    /// State the driver stopped in.
    pub state: TaskState,
    /// The review item the task is parked on (or that records its escalation).
    pub review_id: Option<Uuid>,
    /// Step outputs gathered during this drive.
    pub results: Vec<StepOutput>,
    /// The plan the task finished with. Only set once the task is terminal;
    /// from then on [`Orchestrator::plan`](crate::Orchestrator::plan) no longer has it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<ExecutionPlan>,
}

impl TaskOutcome {
    /// Whether the task can no longer move.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Metrics tracked per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Payloads handled.
    pub dispatches: u32,
    /// Payloads whose handler failed.
    pub failures: u32,
    /// Bus queries sent.
    pub queries: u32,
    /// Escalations to humans.
    pub escalations: u32,
    /// Total handler time.
    pub duration_ms: u64,
}

/// Snapshot of one agent's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent id.
    pub agent: String,
    /// Task it is working on, if any.
    pub current_task: Option<Uuid>,
    /// What it is doing.
    pub status: WorkerStatus,
    /// Counters since start.
    pub metrics: AgentMetrics,
}

impl AgentState {
    /// An idle agent with zeroed metrics.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            current_task: None,
            status: WorkerStatus::Idle,
            metrics: AgentMetrics::default(),
        }
    }
}

/// What an agent is doing right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum WorkerStatus {
    /// Nothing in hand.
    Idle,
    /// Running a dispatched payload.
    Working,
    /// Waiting on a query reply.
    BlockedOnAgent {
        /// The agent it waits on.
        agent: String,
    },
    /// Waiting on a review item.
    BlockedOnHuman {
        /// The review item it waits on.
        review_id: Uuid,
    },
    /// The last dispatch failed.
    Error,
}
