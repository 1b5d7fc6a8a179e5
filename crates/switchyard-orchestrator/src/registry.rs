use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use switchyard_core::SwitchyardResult;
use tracing::info;

/// A named, stateless capability unit.
///
/// `handle` receives an opaque payload and returns opaque structured data; only
/// output governance interprets it, through the agent's contract.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    /// Registry key and bus address.
    fn id(&self) -> &str;

    /// Display name.
    fn name(&self) -> &str;

    /// Handle one dispatched payload or bus message body.
    async fn handle(&self, payload: serde_json::Value) -> SwitchyardResult<serde_json::Value>;
}

type HandlerFn = dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = SwitchyardResult<serde_json::Value>> + Send>>
    + Send
    + Sync;

/// An agent backed by a closure.
pub struct FnAgent {
    id: String,
    name: String,
    handler: Box<HandlerFn>,
}

impl FnAgent {
    /// An agent whose handler is `handler`.
    pub fn new<F, Fut>(id: impl Into<String>, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SwitchyardResult<serde_json::Value>> + Send + 'static,
    {
        Self {
            id: id.into(),
            name: name.into(),
            handler: Box::new(move |payload| Box::pin(handler(payload))),
        }
    }
}

#[async_trait]
impl AgentHandler for FnAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, payload: serde_json::Value) -> SwitchyardResult<serde_json::Value> {
        (self.handler)(payload).await
    }
}

/// Agents keyed by id.
///
/// Filled at startup, then frozen behind an `Arc`: the dispatch path only reads it.
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn AgentHandler>>,
}

impl AgentRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Add an agent. Registering an id twice replaces the earlier agent.
    pub fn register(&mut self, agent: Arc<dyn AgentHandler>) {
        let id = agent.id().to_string();
        info!(agent = %id, name = %agent.name(), "Registered agent");
        self.agents.insert(id, agent);
    }

    /// Remove an agent, returning it if it was registered.
    pub fn deregister(&mut self, id: &str) -> Option<Arc<dyn AgentHandler>> {
        let removed = self.agents.remove(id);
        if removed.is_some() {
            info!(agent = %id, "Deregistered agent");
        }
        removed
    }

    /// Look an agent up by id.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn AgentHandler>> {
        self.agents.get(id)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    /// `(id, name)` pairs sorted by id.
    pub fn list_agents(&self) -> Vec<(String, String)> {
        let mut agents: Vec<(String, String)> = self
            .agents
            .values()
            .map(|a| (a.id().to_string(), a.name().to_string()))
            .collect();
        agents.sort();
        agents
    }

    /// Number of registered agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether no agent is registered.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}
