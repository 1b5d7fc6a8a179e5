//! Human-review items for human-in-the-loop (HITL) decisions.
//!
//! These types live in `switchyard-core` so that the store (which persists them)
//! and the orchestrator (which opens and resolves them) share one definition.

use crate::{SwitchyardError, SwitchyardResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Coarse risk band shown next to a review item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Routine.
    Low,
    /// Worth a look.
    Medium,
    /// Needs a careful decision.
    High,
    /// Needs a decision before anything else.
    Critical,
}

impl RiskLevel {
    /// Band a 0–100 risk score.
    pub fn from_score(score: u32) -> Self {
        match score {
            0..=24 => RiskLevel::Low,
            25..=49 => RiskLevel::Medium,
            50..=74 => RiskLevel::High,
            _ => RiskLevel::Critical,
        }
    }

    /// Parse a band name. Unknown names read as `Medium`.
    pub fn parse_level(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "medium" => RiskLevel::Medium,
            "high" => RiskLevel::High,
            "critical" => RiskLevel::Critical,
            _ => RiskLevel::Medium,
        }
    }
}

/// Why a review item exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewKind {
    /// A plan did not qualify for autonomous dispatch.
    RoutingReview,
    /// An agent's output crossed the business-rule risk threshold.
    DraftReview,
    /// An agent's output failed the schema check on every allowed attempt.
    SchemaEscalation,
    /// An agent asked for a human decision, or dispatch could not proceed.
    AgentEscalation,
}

/// A named action a reviewer may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    /// Let the task go on as proposed.
    Approve,
    /// Turn the proposal down.
    Reject,
    /// Send the draft back with feedback.
    RequestModification,
    /// Stop the task.
    Cancel,
    /// Note an escalation without acting on the task.
    Acknowledge,
}

impl ReviewAction {
    /// Snake-case name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewAction::Approve => "approve",
            ReviewAction::Reject => "reject",
            ReviewAction::RequestModification => "request_modification",
            ReviewAction::Cancel => "cancel",
            ReviewAction::Acknowledge => "acknowledge",
        }
    }

    /// Parse an action name. Accepts `modify` and `ack` as short forms.
    pub fn parse_action(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "approve" => Some(ReviewAction::Approve),
            "reject" => Some(ReviewAction::Reject),
            "request_modification" | "modify" => Some(ReviewAction::RequestModification),
            "cancel" => Some(ReviewAction::Cancel),
            "acknowledge" | "ack" => Some(ReviewAction::Acknowledge),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReviewAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReviewKind {
    /// Snake-case name, as serialized.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewKind::RoutingReview => "routing_review",
            ReviewKind::DraftReview => "draft_review",
            ReviewKind::SchemaEscalation => "schema_escalation",
            ReviewKind::AgentEscalation => "agent_escalation",
        }
    }

    /// The ordered actions offered for this kind of item.
    pub fn default_actions(&self) -> Vec<ReviewAction> {
        match self {
            ReviewKind::RoutingReview => vec![
                ReviewAction::Approve,
                ReviewAction::Reject,
                ReviewAction::Cancel,
            ],
            ReviewKind::DraftReview => vec![
                ReviewAction::Approve,
                ReviewAction::RequestModification,
                ReviewAction::Cancel,
            ],
            ReviewKind::SchemaEscalation => vec![ReviewAction::Acknowledge],
            ReviewKind::AgentEscalation => vec![ReviewAction::Approve, ReviewAction::Reject],
        }
    }
}

/// The single terminal response a review item accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewResponse {
    /// The chosen action.
    pub action: ReviewAction,
    /// Role of the human who answered, e.g. `"supervisor"`.
    pub responder: String,
    /// Free-form note from the responder.
    pub note: Option<String>,
    /// When the response was recorded.
    pub responded_at: DateTime<Utc>,
}

impl ReviewResponse {
    /// A response without a note.
    pub fn new(action: ReviewAction, responder: impl Into<String>) -> Self {
        Self {
            action,
            responder: responder.into(),
            note: None,
            responded_at: Utc::now(),
        }
    }

    /// Attach the responder's note.
    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// A decision surfaced to a human supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    /// Unique item id.
    pub id: Uuid,
    /// Why the item exists.
    pub kind: ReviewKind,
    /// Project or pipeline label the item belongs to.
    pub context: String,
    /// One-line summary shown to the reviewer.
    pub subject: String,
    /// Why the system could not proceed on its own.
    pub reason: String,
    /// Structured data for display, including whatever triggered the review.
    pub payload: serde_json::Value,
    /// Actions the reviewer may choose from.
    pub actions: Vec<ReviewAction>,
    /// Risk band shown with the item.
    pub risk_level: RiskLevel,
    /// Task parked on this item, if any.
    pub task_id: Option<Uuid>,
    /// Agent that opened the item.
    pub opened_by: String,
    /// When the item was opened.
    pub created_at: DateTime<Utc>,
    /// The answer, once given.
    pub response: Option<ReviewResponse>,
}

impl ReviewItem {
    /// An unanswered item offering the kind's default actions.
    pub fn new(kind: ReviewKind, subject: impl Into<String>, opened_by: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            context: String::from("default"),
            subject: subject.into(),
            reason: String::new(),
            payload: serde_json::Value::Null,
            actions: kind.default_actions(),
            risk_level: RiskLevel::Medium,
            task_id: None,
            opened_by: opened_by.into(),
            created_at: Utc::now(),
            response: None,
        }
    }

    /// Set the project or pipeline label.
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    /// Explain why the system stopped.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    /// Attach the data the reviewer needs.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the risk band.
    pub fn with_risk(mut self, level: RiskLevel) -> Self {
        self.risk_level = level;
        self
    }

    /// Park `task_id` on this item.
    pub fn for_task(mut self, task_id: Uuid) -> Self {
        self.task_id = Some(task_id);
        self
    }

    /// Whether nobody has answered yet.
    pub fn is_pending(&self) -> bool {
        self.response.is_none()
    }

    /// Record the terminal response. Fails if the item was already answered or
    /// does not offer the chosen action.
    pub fn respond(&mut self, response: ReviewResponse) -> SwitchyardResult<()> {
        if let Some(existing) = &self.response {
            return Err(SwitchyardError::Review(format!(
                "review {} was already answered with '{}'",
                self.id, existing.action
            )));
        }
        if !self.actions.contains(&response.action) {
            return Err(SwitchyardError::Review(format!(
                "review {} does not offer '{}'",
                self.id, response.action
            )));
        }
        self.response = Some(response);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        assert_eq!(RiskLevel::from_score(5), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(30), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(50), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(100), RiskLevel::Critical);
    }

    #[test]
    fn test_risk_level_parsing() {
        assert_eq!(RiskLevel::parse_level("HIGH"), RiskLevel::High);
        assert_eq!(RiskLevel::parse_level("unknown"), RiskLevel::Medium);
    }

    #[test]
    fn test_action_parsing() {
        assert_eq!(ReviewAction::parse_action("approve"), Some(ReviewAction::Approve));
        assert_eq!(
            ReviewAction::parse_action("request-modification"),
            Some(ReviewAction::RequestModification)
        );
        assert_eq!(ReviewAction::parse_action("ack"), Some(ReviewAction::Acknowledge));
        assert_eq!(ReviewAction::parse_action("shrug"), None);
    }

    #[test]
    fn test_routing_review_actions_are_ordered() {
        let item = ReviewItem::new(ReviewKind::RoutingReview, "3-step plan", "orchestrator");
        assert_eq!(
            item.actions,
            vec![ReviewAction::Approve, ReviewAction::Reject, ReviewAction::Cancel]
        );
        assert!(item.is_pending());
    }

    #[test]
    fn test_exactly_one_response() {
        let mut item = ReviewItem::new(ReviewKind::DraftReview, "large quote", "orchestrator");
        item.respond(ReviewResponse::new(ReviewAction::Approve, "supervisor"))
            .unwrap();
        assert!(!item.is_pending());
        let second = item.respond(ReviewResponse::new(ReviewAction::Cancel, "supervisor"));
        assert!(matches!(second, Err(SwitchyardError::Review(_))));
        assert_eq!(item.response.unwrap().action, ReviewAction::Approve);
    }

    #[test]
    fn test_unoffered_action_rejected() {
        let mut item = ReviewItem::new(ReviewKind::SchemaEscalation, "bad output", "orchestrator");
        let result = item.respond(ReviewResponse::new(ReviewAction::Approve, "supervisor"));
        assert!(result.is_err());
        assert!(item.is_pending());
    }
}
