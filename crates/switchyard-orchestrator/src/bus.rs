use crate::deadlock::{WaitEdge, WaitGraph};
use crate::monitor::AgentMonitor;
use crate::registry::AgentHandler;
use crate::review::ReviewDesk;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use switchyard_core::{
    inbox_channel, reply_channel, ActivityEntry, BusMessage, ReviewItem, ReviewKind,
    ReviewResponse, SwitchyardError, SwitchyardResult,
};
use switchyard_store::DurableStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// A live subscription to one fabric channel.
pub struct Subscription {
    channel: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl Subscription {
    /// Wrap a broadcast receiver for `channel`.
    pub fn new(channel: impl Into<String>, receiver: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            channel: channel.into(),
            receiver,
        }
    }

    /// The channel this subscription listens on.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next message, or `None` once the channel is closed. Lagging drops the
    /// skipped messages with a warning and keeps reading.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.receiver.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(channel = %self.channel, skipped = n, "Subscription lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// A generic publish/subscribe transport.
#[async_trait]
pub trait PubSubFabric: Send + Sync {
    /// Publish to a channel, returning how many subscribers received it.
    async fn publish(&self, channel: &str, message: BusMessage) -> SwitchyardResult<usize>;

    /// Start receiving messages published to `channel` from now on.
    async fn subscribe(&self, channel: &str) -> SwitchyardResult<Subscription>;

    /// Whether publish and subscribe currently work.
    fn is_available(&self) -> bool;
}

/// In-process fabric backed by one tokio broadcast channel per name.
pub struct InMemoryFabric {
    channels: Mutex<HashMap<String, broadcast::Sender<BusMessage>>>,
    available: AtomicBool,
}

impl InMemoryFabric {
    /// A fabric with no channels yet.
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the fabric going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        if available {
            info!("Fabric available");
        } else {
            warn!("Fabric marked unavailable");
        }
    }

    fn ensure_available(&self) -> SwitchyardResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SwitchyardError::BusUnavailable("in-memory fabric is down".into()))
        }
    }
}

impl Default for InMemoryFabric {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSubFabric for InMemoryFabric {
    async fn publish(&self, channel: &str, message: BusMessage) -> SwitchyardResult<usize> {
        self.ensure_available()?;
        let channels = self.channels.lock();
        let Some(sender) = channels.get(channel) else {
            debug!(channel, "No subscribers on channel");
            return Ok(0);
        };
        Ok(sender.send(message).unwrap_or(0))
    }

    async fn subscribe(&self, channel: &str) -> SwitchyardResult<Subscription> {
        self.ensure_available()?;
        let mut channels = self.channels.lock();
        channels.retain(|_, sender| sender.receiver_count() > 0);
        let receiver = channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe();
        Ok(Subscription::new(channel, receiver))
    }

    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }
}

/// How a fire-and-forget send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Published live to this many subscribers.
    Published {
        /// Subscribers that received it.
        receivers: usize,
    },
    /// The fabric was down; the message only reached the activity log.
    Persisted,
}

/// Agent-to-agent messaging plus escalation to humans.
///
/// Every message is written to the activity log before it is published, so the
/// log stays complete while the fabric is down.
pub struct MessageBus {
    fabric: Arc<dyn PubSubFabric>,
    store: Arc<dyn DurableStore>,
    waits: Arc<WaitGraph>,
    monitor: Arc<AgentMonitor>,
    desk: Arc<ReviewDesk>,
}

impl MessageBus {
    /// A bus over `fabric` that logs to `store` and escalates through `desk`.
    pub fn new(
        fabric: Arc<dyn PubSubFabric>,
        store: Arc<dyn DurableStore>,
        waits: Arc<WaitGraph>,
        monitor: Arc<AgentMonitor>,
        desk: Arc<ReviewDesk>,
    ) -> Self {
        Self {
            fabric,
            store,
            waits,
            monitor,
            desk,
        }
    }

    /// Whether the fabric underneath is up.
    pub fn is_available(&self) -> bool {
        self.fabric.is_available()
    }

    /// Fire-and-forget delivery to `message.to`'s inbox.
    pub async fn send(&self, message: BusMessage) -> SwitchyardResult<Delivery> {
        let channel = inbox_channel(&message.to);
        self.publish_logged(&channel, message).await
    }

    async fn publish_logged(&self, channel: &str, message: BusMessage) -> SwitchyardResult<Delivery> {
        self.store
            .append_activity(&ActivityEntry::new(channel, message.clone()))
            .await?;

        if !self.fabric.is_available() {
            warn!(channel, message_id = %message.id, "Fabric unavailable, message persisted only");
            return Ok(Delivery::Persisted);
        }
        match self.fabric.publish(channel, message).await {
            Ok(receivers) => Ok(Delivery::Published { receivers }),
            Err(SwitchyardError::BusUnavailable(reason)) => {
                warn!(channel, reason = %reason, "Fabric went away during send, message persisted only");
                Ok(Delivery::Persisted)
            }
            Err(e) => Err(e),
        }
    }

    /// Send a request to `message.to` and suspend until its reply arrives.
    ///
    /// Fails with [`SwitchyardError::QueryTimeout`] after `timeout`, or earlier
    /// with `forced: true` if the deadlock detector picks this wait to break a
    /// cycle. Fails with [`SwitchyardError::BusUnavailable`] if the fabric is down.
    pub async fn query(&self, message: BusMessage, timeout: Duration) -> SwitchyardResult<BusMessage> {
        if !self.fabric.is_available() {
            return Err(SwitchyardError::BusUnavailable(format!(
                "cannot query '{}' while the fabric is down",
                message.to
            )));
        }

        let correlation_id = Uuid::new_v4();
        let message = message.expecting_reply(correlation_id);
        let mut replies = self.fabric.subscribe(&reply_channel(correlation_id)).await?;
        let inbox = inbox_channel(&message.to);
        self.store
            .append_activity(&ActivityEntry::new(&inbox, message.clone()))
            .await?;

        let from = message.from.clone();
        let to = message.to.clone();
        let forced = self.waits.begin(
            WaitEdge::new(&from, &to, correlation_id).with_trace(message.trace_id),
        );
        self.monitor.blocked_on_agent(&from, &to).await;
        debug!(from = %from, to = %to, correlation_id = %correlation_id, "Query sent");

        let started = Instant::now();
        let outcome = async {
            self.fabric.publish(&inbox, message).await?;
            tokio::select! {
                reply = next_reply(&mut replies, correlation_id) => {
                    reply.ok_or_else(|| SwitchyardError::BusUnavailable(
                        format!("reply channel for query to '{to}' closed"),
                    ))
                }
                _ = tokio::time::sleep(timeout) => Err(SwitchyardError::QueryTimeout {
                    to: to.clone(),
                    after_ms: started.elapsed().as_millis() as u64,
                    forced: false,
                }),
                Ok(()) = forced => Err(SwitchyardError::QueryTimeout {
                    to: to.clone(),
                    after_ms: started.elapsed().as_millis() as u64,
                    forced: true,
                }),
            }
        }
        .await;

        self.waits.end(correlation_id);
        self.monitor.unblocked(&from).await;
        if let Err(e) = &outcome {
            warn!(from = %from, to = %to, error = %e, "Query failed");
        }
        outcome
    }

    /// Answer a request on its reply channel, carrying its correlation id back.
    pub async fn reply(&self, original: &BusMessage, payload: serde_json::Value) -> SwitchyardResult<Delivery> {
        let Some(channel) = original.reply_to.clone() else {
            warn!(message_id = %original.id, "Reply to a message that expects none, dropped");
            return Ok(Delivery::Published { receivers: 0 });
        };
        self.publish_logged(&channel, original.reply(payload)).await
    }

    /// Subscribe to an agent's inbox.
    pub async fn inbox(&self, agent: &str) -> SwitchyardResult<Subscription> {
        self.fabric.subscribe(&inbox_channel(agent)).await
    }

    /// Feed an agent's inbox to its handler, replying to every request.
    ///
    /// The subscription is in place when this returns. The loop ends when the
    /// inbox channel closes.
    pub async fn serve_inbox(
        self: &Arc<Self>,
        agent: Arc<dyn AgentHandler>,
    ) -> SwitchyardResult<JoinHandle<()>> {
        let mut inbox = self.inbox(agent.id()).await?;
        let bus = Arc::clone(self);
        Ok(tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                let result = agent.handle(msg.payload.clone()).await;
                if !msg.is_request() {
                    if let Err(e) = result {
                        warn!(agent = %agent.id(), error = %e, "Inbox message handling failed");
                    }
                    continue;
                }
                let payload = result.unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }));
                if let Err(e) = bus.reply(&msg, payload).await {
                    warn!(agent = %agent.id(), error = %e, "Reply failed");
                }
            }
            debug!(agent = %agent.id(), "Inbox closed");
        }))
    }

    /// Raise an agent escalation to a human supervisor.
    ///
    /// With `blocking`, the calling agent is marked blocked-on-human and suspends
    /// without timeout until a decision arrives. Otherwise it returns `None` once
    /// the item is persisted.
    pub async fn escalate_to_human(
        &self,
        from: &str,
        subject: &str,
        payload: serde_json::Value,
        blocking: bool,
    ) -> SwitchyardResult<Option<ReviewResponse>> {
        let item = ReviewItem::new(ReviewKind::AgentEscalation, subject, from)
            .with_context("agent")
            .with_payload(payload);
        self.escalate(item, blocking).await
    }

    /// Raise a prepared review item, optionally waiting for its answer.
    pub async fn escalate(&self, item: ReviewItem, blocking: bool) -> SwitchyardResult<Option<ReviewResponse>> {
        let from = item.opened_by.clone();
        self.monitor.record_escalation(&from).await;
        if !blocking {
            self.desk.open(item).await?;
            return Ok(None);
        }

        self.monitor.blocked_on_human(&from, item.id).await;
        let response = self.desk.open_and_wait(item).await;
        self.monitor.unblocked(&from).await;
        response.map(Some)
    }
}

async fn next_reply(replies: &mut Subscription, correlation_id: Uuid) -> Option<BusMessage> {
    loop {
        let msg = replies.recv().await?;
        if msg.correlation_id == Some(correlation_id) {
            return Some(msg);
        }
    }
}
