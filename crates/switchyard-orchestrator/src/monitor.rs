use crate::types::{AgentMetrics, AgentState, WorkerStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Tracks state and metrics for every agent that has done anything.
///
/// Agents appear on first use; there is no fixed roster.
pub struct AgentMonitor {
    states: Arc<RwLock<HashMap<String, AgentState>>>,
}

impl AgentMonitor {
    /// A monitor that has seen no agents.
    pub fn new() -> Self {
        Self {
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn update(&self, agent: &str, f: impl FnOnce(&mut AgentState)) {
        let mut states = self.states.write().await;
        let state = states
            .entry(agent.to_string())
            .or_insert_with(|| AgentState::new(agent));
        f(state);
    }

    /// Mark an agent as working, optionally on a task.
    pub async fn start_task(&self, agent: &str, task_id: Option<Uuid>) {
        self.update(agent, |state| {
            state.current_task = task_id;
            state.status = WorkerStatus::Working;
            state.metrics.dispatches += 1;
        })
        .await;
    }

    /// Mark an agent as idle after a successful dispatch.
    pub async fn finish_task(&self, agent: &str, duration_ms: u64) {
        self.update(agent, |state| {
            state.current_task = None;
            state.status = WorkerStatus::Idle;
            state.metrics.duration_ms += duration_ms;
        })
        .await;
    }

    /// Record a failed dispatch.
    pub async fn record_error(&self, agent: &str, duration_ms: u64) {
        self.update(agent, |state| {
            state.current_task = None;
            state.metrics.failures += 1;
            state.metrics.duration_ms += duration_ms;
            state.status = WorkerStatus::Error;
        })
        .await;
    }

    /// Mark an agent as blocked on a query to another agent.
    pub async fn blocked_on_agent(&self, agent: &str, target: &str) {
        self.update(agent, |state| {
            state.metrics.queries += 1;
            state.status = WorkerStatus::BlockedOnAgent {
                agent: target.to_string(),
            };
        })
        .await;
    }

    /// Mark an agent as blocked until a human answers a review item.
    pub async fn blocked_on_human(&self, agent: &str, review_id: Uuid) {
        self.update(agent, |state| {
            state.status = WorkerStatus::BlockedOnHuman { review_id };
        })
        .await;
    }

    /// Count an escalation to a human, blocking or not.
    pub async fn record_escalation(&self, agent: &str) {
        self.update(agent, |state| state.metrics.escalations += 1).await;
    }

    /// Clear a blocked mark, returning the agent to working or idle.
    pub async fn unblocked(&self, agent: &str) {
        self.update(agent, |state| {
            state.status = if state.current_task.is_some() {
                WorkerStatus::Working
            } else {
                WorkerStatus::Idle
            };
        })
        .await;
    }

    /// Get a snapshot of all agent states, sorted by agent id.
    pub async fn snapshot(&self) -> Vec<AgentState> {
        let states = self.states.read().await;
        let mut all: Vec<AgentState> = states.values().cloned().collect();
        all.sort_by(|a, b| a.agent.cmp(&b.agent));
        all
    }

    /// State of one agent, if it has done anything yet.
    pub async fn get_state(&self, agent: &str) -> Option<AgentState> {
        self.states.read().await.get(agent).cloned()
    }

    /// Get aggregate metrics across all agents.
    pub async fn aggregate_metrics(&self) -> AgentMetrics {
        let states = self.states.read().await;
        let mut total = AgentMetrics::default();
        for state in states.values() {
            total.dispatches += state.metrics.dispatches;
            total.failures += state.metrics.failures;
            total.queries += state.metrics.queries;
            total.escalations += state.metrics.escalations;
            total.duration_ms += state.metrics.duration_ms;
        }
        total
    }

    /// Serialize the current state as JSON.
    pub async fn to_json(&self) -> serde_json::Value {
        let states = self.snapshot().await;
        let aggregate = self.aggregate_metrics().await;
        serde_json::json!({
            "agents": states,
            "aggregate": aggregate,
        })
    }
}

impl Default for AgentMonitor {
    fn default() -> Self {
        Self::new()
    }
}
