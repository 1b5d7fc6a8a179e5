use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Channel an agent listens on for incoming bus messages.
pub fn inbox_channel(agent_id: &str) -> String {
    format!("agent:{agent_id}:inbox")
}

/// Channel a single query's reply is published on.
pub fn reply_channel(correlation_id: Uuid) -> String {
    format!("reply:{correlation_id}")
}

/// An envelope exchanged over the message bus. Ephemeral: only the activity
/// log entry wrapping it is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    /// Unique per message.
    pub id: Uuid,
    /// Sending agent id.
    pub from: String,
    /// Receiving agent id.
    pub to: String,
    /// Short human-readable topic.
    pub subject: String,
    /// Message body.
    pub payload: serde_json::Value,
    /// Channel the sender awaits a reply on, set for queries.
    #[serde(default)]
    pub reply_to: Option<String>,
    /// Pairs a query with its reply.
    #[serde(default)]
    pub correlation_id: Option<Uuid>,
    /// Trace of the task the sender was working on, if any.
    #[serde(default)]
    pub trace_id: Option<Uuid>,
    /// When the message was built.
    pub timestamp: DateTime<Utc>,
}

impl BusMessage {
    /// A fire-and-forget message from one agent to another.
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            payload,
            reply_to: None,
            correlation_id: None,
            trace_id: None,
            timestamp: Utc::now(),
        }
    }

    /// Mark this message as a request awaiting a reply on `reply_channel(correlation_id)`.
    pub fn expecting_reply(mut self, correlation_id: Uuid) -> Self {
        self.reply_to = Some(reply_channel(correlation_id));
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Tag the message with the sender's task trace.
    pub fn with_trace(mut self, trace_id: Option<Uuid>) -> Self {
        self.trace_id = trace_id;
        self
    }

    /// Whether the sender waits for a reply.
    pub fn is_request(&self) -> bool {
        self.reply_to.is_some()
    }

    /// Build the reply to this message, carrying its correlation id back.
    pub fn reply(&self, payload: serde_json::Value) -> Self {
        let mut reply = BusMessage::new(
            self.to.clone(),
            self.from.clone(),
            format!("re: {}", self.subject),
            payload,
        );
        reply.correlation_id = self.correlation_id;
        reply.trace_id = self.trace_id;
        reply
    }
}

/// A persisted log line for one message published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Unique per entry.
    pub id: Uuid,
    /// Channel the message was published on.
    pub channel: String,
    /// The message as published.
    pub message: BusMessage,
    /// When the bus recorded it.
    pub recorded_at: DateTime<Utc>,
}

impl ActivityEntry {
    /// Log `message` as published on `channel`.
    pub fn new(channel: impl Into<String>, message: BusMessage) -> Self {
        Self {
            id: Uuid::new_v4(),
            channel: channel.into(),
            message,
            recorded_at: Utc::now(),
        }
    }
}
