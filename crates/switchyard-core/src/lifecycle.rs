use crate::model::{Event, EventKind};
use crate::{SwitchyardError, SwitchyardResult};
use serde::{Deserialize, Serialize};

/// The state of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not yet picked up.
    Submitted,
    /// The orchestrator is drafting a plan.
    Reasoning,
    /// A scored plan awaits the routing decision.
    PlanGenerated,
    /// Parked on a routing review.
    PendingReview,
    /// Cleared for dispatch.
    Approved,
    /// Handing steps to agents.
    Dispatching,
    /// Agent outputs are in and being governed.
    Executing,
    /// An output failed the schema check; retry or escalate next.
    SchemaFailRetry,
    /// Parked on a draft review of the outputs.
    OutputReview,
    /// A reviewer asked for changes; the task re-plans.
    NeedsModification,
    /// Outputs accepted, ready to complete.
    ApprovedOutput,
    /// Finished successfully.
    Completed,
    /// Stopped by a human or by the system.
    Cancelled,
    /// A reviewer turned the plan down.
    Rejected,
    /// Handed to a human; the system will not resume it.
    Escalated,
}

impl TaskState {
    /// Every declared state.
    pub const ALL: [TaskState; 15] = [
        TaskState::Submitted,
        TaskState::Reasoning,
        TaskState::PlanGenerated,
        TaskState::PendingReview,
        TaskState::Approved,
        TaskState::Dispatching,
        TaskState::Executing,
        TaskState::SchemaFailRetry,
        TaskState::OutputReview,
        TaskState::NeedsModification,
        TaskState::ApprovedOutput,
        TaskState::Completed,
        TaskState::Cancelled,
        TaskState::Rejected,
        TaskState::Escalated,
    ];

    /// Snake-case name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Submitted => "submitted",
            TaskState::Reasoning => "reasoning",
            TaskState::PlanGenerated => "plan_generated",
            TaskState::PendingReview => "pending_review",
            TaskState::Approved => "approved",
            TaskState::Dispatching => "dispatching",
            TaskState::Executing => "executing",
            TaskState::SchemaFailRetry => "schema_fail_retry",
            TaskState::OutputReview => "output_review",
            TaskState::NeedsModification => "needs_modification",
            TaskState::ApprovedOutput => "approved_output",
            TaskState::Completed => "completed",
            TaskState::Cancelled => "cancelled",
            TaskState::Rejected => "rejected",
            TaskState::Escalated => "escalated",
        }
    }

    /// Terminal states declare no outgoing transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Cancelled | TaskState::Rejected | TaskState::Escalated
        )
    }

    /// States in which the task is parked until a human answers a review item.
    pub fn awaits_human(&self) -> bool {
        matches!(self, TaskState::PendingReview | TaskState::OutputReview)
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named event that may move a task from one state to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Pick up a submitted task.
    Start,
    /// Abandon the task.
    Cancel,
    /// A plan was drafted.
    PlanReady,
    /// Give up and hand the task to a human.
    Escalate,
    /// Routing cleared the plan without review.
    AutoApprove,
    /// Routing wants a human to look at the plan.
    RequestReview,
    /// A reviewer approved.
    Approve,
    /// A reviewer rejected.
    Reject,
    /// Start handing steps out.
    Dispatch,
    /// All steps returned.
    BeginExecution,
    /// An output broke its contract's schema.
    SchemaFail,
    /// Outputs passed governance.
    AcceptOutput,
    /// Outputs crossed the risk threshold.
    FlagOutput,
    /// Try again after a schema failure or a modification request.
    Retry,
    /// A reviewer asked for changes to the draft.
    RequestModification,
    /// Close out an accepted task.
    Complete,
}

impl Trigger {
    /// Every declared trigger.
    pub const ALL: [Trigger; 16] = [
        Trigger::Start,
        Trigger::Cancel,
        Trigger::PlanReady,
        Trigger::Escalate,
        Trigger::AutoApprove,
        Trigger::RequestReview,
        Trigger::Approve,
        Trigger::Reject,
        Trigger::Dispatch,
        Trigger::BeginExecution,
        Trigger::SchemaFail,
        Trigger::AcceptOutput,
        Trigger::FlagOutput,
        Trigger::Retry,
        Trigger::RequestModification,
        Trigger::Complete,
    ];

    /// Snake-case name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Start => "start",
            Trigger::Cancel => "cancel",
            Trigger::PlanReady => "plan_ready",
            Trigger::Escalate => "escalate",
            Trigger::AutoApprove => "auto_approve",
            Trigger::RequestReview => "request_review",
            Trigger::Approve => "approve",
            Trigger::Reject => "reject",
            Trigger::Dispatch => "dispatch",
            Trigger::BeginExecution => "begin_execution",
            Trigger::SchemaFail => "schema_fail",
            Trigger::AcceptOutput => "accept_output",
            Trigger::FlagOutput => "flag_output",
            Trigger::Retry => "retry",
            Trigger::RequestModification => "request_modification",
            Trigger::Complete => "complete",
        }
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

use TaskState as S;
use Trigger as T;

/// The declared transition table: `(from, trigger) -> to`.
const TRANSITIONS: [(TaskState, Trigger, TaskState); 22] = [
    (S::Submitted, T::Start, S::Reasoning),
    (S::Submitted, T::Cancel, S::Cancelled),
    (S::Reasoning, T::PlanReady, S::PlanGenerated),
    (S::Reasoning, T::Escalate, S::Escalated),
    (S::PlanGenerated, T::AutoApprove, S::Approved),
    (S::PlanGenerated, T::RequestReview, S::PendingReview),
    (S::PendingReview, T::Approve, S::Approved),
    (S::PendingReview, T::Reject, S::Rejected),
    (S::PendingReview, T::Cancel, S::Cancelled),
    (S::Approved, T::Dispatch, S::Dispatching),
    (S::Dispatching, T::BeginExecution, S::Executing),
    (S::Dispatching, T::Escalate, S::Escalated),
    (S::Executing, T::SchemaFail, S::SchemaFailRetry),
    (S::Executing, T::AcceptOutput, S::ApprovedOutput),
    (S::Executing, T::FlagOutput, S::OutputReview),
    (S::SchemaFailRetry, T::Retry, S::Reasoning),
    (S::SchemaFailRetry, T::Escalate, S::Escalated),
    (S::OutputReview, T::Approve, S::ApprovedOutput),
    (S::OutputReview, T::RequestModification, S::NeedsModification),
    (S::OutputReview, T::Cancel, S::Cancelled),
    (S::NeedsModification, T::Retry, S::Reasoning),
    (S::ApprovedOutput, T::Complete, S::Completed),
];

/// The full declared transition table.
pub fn transitions() -> &'static [(TaskState, Trigger, TaskState)] {
    &TRANSITIONS
}

/// Compute the state reached by applying `trigger` in `current`.
///
/// Returns [`SwitchyardError::InvalidTransition`] for any pair missing from the
/// declared table; the machine never silently no-ops.
pub fn can_transition(current: TaskState, trigger: Trigger) -> SwitchyardResult<TaskState> {
    TRANSITIONS
        .iter()
        .find(|(from, t, _)| *from == current && *t == trigger)
        .map(|(_, _, to)| *to)
        .ok_or(SwitchyardError::InvalidTransition {
            from: current,
            trigger,
        })
}

/// Triggers declared for `state`, in table order.
pub fn available_triggers(state: TaskState) -> Vec<Trigger> {
    TRANSITIONS
        .iter()
        .filter(|(from, _, _)| *from == state)
        .map(|(_, t, _)| *t)
        .collect()
}

/// One applied transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    /// State before the trigger.
    pub from: TaskState,
    /// The applied trigger.
    pub trigger: Trigger,
    /// State after the trigger.
    pub to: TaskState,
}

/// A lifecycle view over one task's current state.
///
/// Holds no I/O and is never shared: callers rebuild it from the stored state on
/// every request, apply a trigger, and persist the result themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskLifecycle {
    state: TaskState,
}

impl TaskLifecycle {
    /// View a task sitting in `state`.
    pub fn new(state: TaskState) -> Self {
        Self { state }
    }

    /// The current state.
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Apply `trigger`, advancing the local state on success.
    pub fn try_trigger(&mut self, trigger: Trigger) -> SwitchyardResult<Transition> {
        let to = can_transition(self.state, trigger)?;
        let transition = Transition {
            from: self.state,
            trigger,
            to,
        };
        self.state = to;
        Ok(transition)
    }
}

/// Rebuild a task's final state from its event trail.
///
/// Only `transition` events participate. Each one must start where the previous
/// one ended and must be legal under the declared table; a trail that violates
/// either is reported as an [`SwitchyardError::InvalidTransition`] or
/// [`SwitchyardError::Store`] error.
pub fn replay(events: &[Event]) -> SwitchyardResult<TaskState> {
    let mut lifecycle = TaskLifecycle::new(TaskState::Submitted);
    for event in events.iter().filter(|e| e.kind == EventKind::Transition) {
        let (Some(from), Some(to), Some(trigger)) = (event.from_state, event.to_state, event.trigger)
        else {
            return Err(SwitchyardError::Store(format!(
                "transition event {} is missing its states or trigger",
                event.id
            )));
        };
        if from != lifecycle.state() {
            return Err(SwitchyardError::Store(format!(
                "event {} starts from '{from}' but the trail is at '{}'",
                event.id,
                lifecycle.state()
            )));
        }
        let applied = lifecycle.try_trigger(trigger)?;
        if applied.to != to {
            return Err(SwitchyardError::Store(format!(
                "event {} records '{to}' but '{trigger}' leads to '{}'",
                event.id, applied.to
            )));
        }
    }
    Ok(lifecycle.state())
}
