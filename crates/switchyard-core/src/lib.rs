//! Core types and error definitions for Switchyard.
//!
//! This crate provides the foundational types shared across all Switchyard crates:
//! the error taxonomy, the task/handoff/event data model, bus message envelopes,
//! human-review items, and the pure task lifecycle state machine.
//!
//! # Main types
//!
//! - [`SwitchyardError`]: Unified error enum for all Switchyard subsystems.
//! - [`SwitchyardResult`]: Convenience alias for `Result<T, SwitchyardError>`.
//! - [`TaskLifecycle`]: Side-effect-free validator of task state transitions.
//! - [`Task`], [`Event`], [`Handoff`]: Durable records of the orchestration trail.
//! - [`BusMessage`]: Envelope exchanged over the message bus.
//! - [`ReviewItem`]: A decision surfaced to a human supervisor.

/// Ingress normalization of heterogeneous task requests.
pub mod ingress;
/// Task lifecycle state machine and event replay.
pub mod lifecycle;
/// Bus message envelopes and channel naming.
pub mod message;
/// Task, event, and handoff records.
pub mod model;
/// Human-review items and responses.
pub mod review;

pub use ingress::{EntityRef, TaskRequest};
pub use lifecycle::{can_transition, replay, TaskLifecycle, TaskState, Transition, Trigger};
pub use message::{inbox_channel, reply_channel, ActivityEntry, BusMessage};
pub use model::{Actor, Event, EventKind, Handoff, HandoffStatus, RetryCounters, Task};
pub use review::{ReviewAction, ReviewItem, ReviewKind, ReviewResponse, RiskLevel};

use uuid::Uuid;

// --- Error types ---

/// Top-level error type for Switchyard.
///
/// Governance outcomes (schema failures, rule risk) are deliberately absent:
/// they are expressed as task state transitions, never as errors.
#[derive(Debug, thiserror::Error)]
pub enum SwitchyardError {
    /// Dispatch or query addressed to an agent id that is not registered.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// A trigger was applied to a state that does not declare it.
    #[error("Invalid transition: trigger '{trigger}' is not declared for state '{from}'")]
    InvalidTransition {
        /// State the task was in.
        from: TaskState,
        /// Trigger that was rejected.
        trigger: Trigger,
    },

    /// A bus query received no reply in time.
    #[error("Query to '{to}' timed out after {after_ms}ms (forced: {forced})")]
    QueryTimeout {
        /// Agent the query was addressed to.
        to: String,
        /// How long the caller waited.
        after_ms: u64,
        /// Whether the timeout was forced by deadlock resolution.
        forced: bool,
    },

    /// The pub/sub fabric under the message bus is unreachable.
    #[error("Bus unavailable: {0}")]
    BusUnavailable(String),

    /// The text-generation service is down or timed out.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// The text-generation service answered with something unusable.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// A non-retryable HTTP failure (e.g. a rejected request).
    #[error("HTTP error: {0}")]
    Http(String),

    /// An agent handler failed while handling a dispatched payload.
    #[error("Agent '{agent}' failed: {message}")]
    Handler {
        /// The agent whose handler failed.
        agent: String,
        /// The handler's error message.
        message: String,
    },

    /// The durable store failed or a record is missing.
    #[error("Store error: {0}")]
    Store(String),

    /// A compare-and-set state update lost against a concurrent writer.
    #[error("Stale state for task {task_id}: expected '{expected}', found '{actual}'")]
    StaleState {
        /// The task whose row was updated.
        task_id: Uuid,
        /// The state the writer read.
        expected: TaskState,
        /// The state actually stored.
        actual: TaskState,
    },

    /// A review item was missing, already answered, or given an action it does not offer.
    #[error("Review error: {0}")]
    Review(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SwitchyardError {
    /// Whether the caller may reasonably retry, escalate, or degrade instead of failing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SwitchyardError::QueryTimeout { .. }
                | SwitchyardError::BusUnavailable(_)
                | SwitchyardError::ServiceUnavailable(_)
                | SwitchyardError::MalformedResponse(_)
        )
    }
}

/// A convenience `Result` alias using [`SwitchyardError`].
pub type SwitchyardResult<T> = Result<T, SwitchyardError>;

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_message() {
        let err = SwitchyardError::InvalidTransition {
            from: TaskState::Completed,
            trigger: Trigger::Retry,
        };
        let msg = err.to_string();
        assert!(msg.contains("retry"));
        assert!(msg.contains("completed"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(SwitchyardError::QueryTimeout {
            to: "pricing".into(),
            after_ms: 50,
            forced: false
        }
        .is_recoverable());
        assert!(SwitchyardError::ServiceUnavailable("down".into()).is_recoverable());
        assert!(!SwitchyardError::UnknownAgent("ghost".into()).is_recoverable());
        assert!(!SwitchyardError::InvalidTransition {
            from: TaskState::Submitted,
            trigger: Trigger::Complete
        }
        .is_recoverable());
    }

    #[test]
    fn test_json_error_conversion() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
        let err: SwitchyardError = parse.unwrap_err().into();
        assert!(matches!(err, SwitchyardError::Json(_)));
    }
}
