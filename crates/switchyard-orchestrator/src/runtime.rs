use crate::bus::{InMemoryFabric, MessageBus, PubSubFabric};
use crate::deadlock::{DeadlockDetector, WaitGraph};
use crate::dispatcher::Dispatcher;
use crate::monitor::AgentMonitor;
use crate::registry::{AgentHandler, AgentRegistry};
use crate::review::ReviewDesk;
use std::sync::Arc;
use switchyard_core::SwitchyardResult;
use switchyard_store::DurableStore;
use tokio::task::JoinHandle;
use tracing::info;

/// Everything the orchestrator and the agents share, wired once at startup.
pub struct Runtime {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn DurableStore>,
    monitor: Arc<AgentMonitor>,
    desk: Arc<ReviewDesk>,
    waits: Arc<WaitGraph>,
    bus: Arc<MessageBus>,
    dispatcher: Arc<Dispatcher>,
    detector: Arc<DeadlockDetector>,
}

impl Runtime {
    /// Registered agents.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// The durable store everything records to.
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    /// Per-agent state and metrics.
    pub fn monitor(&self) -> &Arc<AgentMonitor> {
        &self.monitor
    }

    /// The human review desk.
    pub fn desk(&self) -> &Arc<ReviewDesk> {
        &self.desk
    }

    /// Outstanding query waits.
    pub fn waits(&self) -> &Arc<WaitGraph> {
        &self.waits
    }

    /// The message bus.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The audited dispatch path.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The deadlock detector over `waits`.
    pub fn deadlock_detector(&self) -> &Arc<DeadlockDetector> {
        &self.detector
    }

    /// Start an inbox loop for every registered agent.
    pub async fn serve_inboxes(&self) -> SwitchyardResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::with_capacity(self.registry.len());
        for (id, _) in self.registry.list_agents() {
            if let Some(agent) = self.registry.get(&id) {
                handles.push(self.bus.serve_inbox(Arc::clone(agent)).await?);
            }
        }
        Ok(handles)
    }
}

/// Builds a [`Runtime`].
///
/// The bus exists before any agent is registered, so agents that talk to
/// each other can capture it from [`RuntimeBuilder::bus`].
pub struct RuntimeBuilder {
    registry: AgentRegistry,
    store: Arc<dyn DurableStore>,
    monitor: Arc<AgentMonitor>,
    desk: Arc<ReviewDesk>,
    waits: Arc<WaitGraph>,
    bus: Arc<MessageBus>,
}

impl RuntimeBuilder {
    /// A builder over an in-process fabric.
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self::with_fabric(store, Arc::new(InMemoryFabric::new()))
    }

    /// A builder over a caller-supplied fabric.
    pub fn with_fabric(store: Arc<dyn DurableStore>, fabric: Arc<dyn PubSubFabric>) -> Self {
        let monitor = Arc::new(AgentMonitor::new());
        let desk = Arc::new(ReviewDesk::new(store.clone()));
        let waits = Arc::new(WaitGraph::new());
        let bus = Arc::new(MessageBus::new(
            fabric,
            store.clone(),
            waits.clone(),
            monitor.clone(),
            desk.clone(),
        ));
        Self {
            registry: AgentRegistry::new(),
            store,
            monitor,
            desk,
            waits,
            bus,
        }
    }

    /// The bus, for agents that need to query peers from their handlers.
    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    /// Register an agent.
    pub fn register(mut self, agent: Arc<dyn AgentHandler>) -> Self {
        self.registry.register(agent);
        self
    }

    /// Freeze the registry and wire the dispatch path.
    pub fn build(self) -> Runtime {
        let registry = Arc::new(self.registry);
        let dispatcher = Arc::new(Dispatcher::new(
            registry.clone(),
            self.store.clone(),
            self.monitor.clone(),
        ));
        let detector = Arc::new(DeadlockDetector::new(self.waits.clone(), self.store.clone()));
        info!(agents = registry.len(), "Runtime built");
        Runtime {
            registry,
            store: self.store,
            monitor: self.monitor,
            desk: self.desk,
            waits: self.waits,
            bus: self.bus,
            dispatcher,
            detector,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::FnAgent;
    use serde_json::json;
    use std::time::Duration;
    use switchyard_core::BusMessage;
    use switchyard_store::InMemoryStore;

    #[tokio::test]
    async fn test_build_freezes_registry() {
        let runtime = RuntimeBuilder::new(Arc::new(InMemoryStore::new()))
            .register(Arc::new(FnAgent::new("echo", "Echo", |p| async move { Ok(p) })))
            .build();
        assert_eq!(runtime.registry().len(), 1);
        let (_, result) = runtime
            .dispatcher()
            .dispatch_to("echo", json!({"x": 1}), "test")
            .await
            .unwrap();
        assert_eq!(result, json!({"x": 1}));
    }

    #[tokio::test]
    async fn test_agents_can_query_through_captured_bus() {
        let builder = RuntimeBuilder::new(Arc::new(InMemoryStore::new()));
        let bus = builder.bus();
        let runtime = builder
            .register(Arc::new(FnAgent::new("rates", "Rates", |_| async move {
                Ok(json!({"eur_usd": 1.1}))
            })))
            .register(Arc::new(FnAgent::new("pricing", "Pricing", move |_| {
                let bus = bus.clone();
                async move {
                    let reply = bus
                        .query(
                            BusMessage::new("pricing", "rates", "rate?", json!({})),
                            Duration::from_secs(1),
                        )
                        .await?;
                    Ok(json!({"rate": reply.payload["eur_usd"]}))
                }
            })))
            .build();
        let _inboxes = runtime.serve_inboxes().await.unwrap();

        let (_, result) = runtime
            .dispatcher()
            .dispatch_to("pricing", json!({}), "test")
            .await
            .unwrap();
        assert_eq!(result, json!({"rate": 1.1}));
    }
}
