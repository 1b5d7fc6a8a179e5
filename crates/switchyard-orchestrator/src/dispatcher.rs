use crate::monitor::AgentMonitor;
use crate::registry::AgentRegistry;
use std::sync::Arc;
use std::time::Instant;
use switchyard_core::{
    Actor, Event, EventKind, Handoff, SwitchyardError, SwitchyardResult, Task,
};
use switchyard_store::DurableStore;
use tracing::{info, warn};
use uuid::Uuid;

/// One payload addressed to one agent.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    /// Agent to hand the payload to.
    pub target: String,
    /// What the agent is given.
    pub payload: serde_json::Value,
    /// Dispatching agent id.
    pub from: String,
    /// Classification tag recorded on the handoff.
    pub intent: Option<String>,
    /// Task the dispatch serves.
    pub task_id: Option<Uuid>,
    /// Trace of that task.
    pub trace_id: Option<Uuid>,
}

impl DispatchRequest {
    /// A request with no intent or task attached.
    pub fn new(target: impl Into<String>, payload: serde_json::Value, from: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            payload,
            from: from.into(),
            intent: None,
            task_id: None,
            trace_id: None,
        }
    }

    /// Set the classification tag.
    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }

    /// Correlate the handoff and its events with a task's trace.
    pub fn for_task(mut self, task: &Task) -> Self {
        self.task_id = Some(task.id);
        self.trace_id = Some(task.trace_id);
        self
    }
}

/// The audited, synchronous dispatch path.
///
/// Every attempt on a registered agent leaves exactly one [`Handoff`] and an event
/// pair in the store: `handoff` then `task_end` on success, `handoff` then `error`
/// on failure.
pub struct Dispatcher {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn DurableStore>,
    monitor: Arc<AgentMonitor>,
}

impl Dispatcher {
    /// A dispatcher over the registry, recording to `store`.
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn DurableStore>,
        monitor: Arc<AgentMonitor>,
    ) -> Self {
        Self {
            registry,
            store,
            monitor,
        }
    }

    /// The agents this dispatcher can reach.
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    /// Shorthand for a dispatch that belongs to no task.
    pub async fn dispatch_to(
        &self,
        target: &str,
        payload: serde_json::Value,
        from: &str,
    ) -> SwitchyardResult<(Handoff, serde_json::Value)> {
        self.dispatch(DispatchRequest::new(target, payload, from)).await
    }

    /// Run the target agent's handler on the payload and wait for its result.
    ///
    /// An unregistered target fails with [`SwitchyardError::UnknownAgent`] before
    /// anything is written. A handler failure is recorded on the handoff and
    /// returned as [`SwitchyardError::Handler`].
    pub async fn dispatch(
        &self,
        req: DispatchRequest,
    ) -> SwitchyardResult<(Handoff, serde_json::Value)> {
        let agent = self
            .registry
            .get(&req.target)
            .cloned()
            .ok_or_else(|| SwitchyardError::UnknownAgent(req.target.clone()))?;

        let mut handoff = Handoff::new(&req.from, &req.target, req.payload.clone());
        handoff.intent = req.intent.clone();
        handoff.task_id = req.task_id;
        handoff.trace_id = req.trace_id;
        self.store.create_handoff(&handoff).await?;

        let actor = Actor::agent(&req.from);
        self.store
            .append_event(
                &Event::new(EventKind::Handoff, actor.clone())
                    .with_trace(req.task_id, req.trace_id)
                    .with_note(format!("{} -> {} ({})", req.from, req.target, handoff.id)),
            )
            .await?;

        info!(
            handoff_id = %handoff.id,
            from = %req.from,
            to = %req.target,
            "Dispatching"
        );
        self.monitor.start_task(&req.target, req.task_id).await;
        let started = Instant::now();

        match agent.handle(req.payload).await {
            Ok(result) => {
                let elapsed = started.elapsed().as_millis() as u64;
                handoff.complete(result.clone());
                self.store.update_handoff(&handoff).await?;
                self.store
                    .append_event(
                        &Event::new(EventKind::TaskEnd, Actor::agent(&req.target))
                            .with_trace(req.task_id, req.trace_id)
                            .with_note(format!("handoff {} completed", handoff.id)),
                    )
                    .await?;
                self.monitor.finish_task(&req.target, elapsed).await;
                info!(handoff_id = %handoff.id, to = %req.target, elapsed_ms = elapsed, "Dispatch completed");
                Ok((handoff, result))
            }
            Err(e) => {
                let elapsed = started.elapsed().as_millis() as u64;
                let message = e.to_string();
                handoff.fail(&message);
                self.store.update_handoff(&handoff).await?;
                self.store
                    .append_event(
                        &Event::new(EventKind::Error, Actor::agent(&req.target))
                            .with_trace(req.task_id, req.trace_id)
                            .with_note(format!("handoff {} failed: {message}", handoff.id)),
                    )
                    .await?;
                self.monitor.record_error(&req.target, elapsed).await;
                warn!(handoff_id = %handoff.id, to = %req.target, error = %message, "Dispatch failed");
                Err(SwitchyardError::Handler {
                    agent: req.target,
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::registry::FnAgent;
    use serde_json::json;
    use switchyard_core::HandoffStatus;
    use switchyard_store::InMemoryStore;

    fn dispatcher() -> (Dispatcher, Arc<InMemoryStore>, Arc<AgentMonitor>) {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(FnAgent::new("pricing", "Pricing", |payload| async move {
            Ok(json!({"total": payload["qty"].as_i64().unwrap_or(0) * 10}))
        })));
        registry.register(Arc::new(FnAgent::new("broken", "Broken", |_| async move {
            Err(SwitchyardError::Store("ledger offline".into()))
        })));
        let store = Arc::new(InMemoryStore::new());
        let monitor = Arc::new(AgentMonitor::new());
        (
            Dispatcher::new(Arc::new(registry), store.clone(), monitor.clone()),
            store,
            monitor,
        )
    }

    #[tokio::test]
    async fn test_unknown_agent_creates_no_handoff() {
        let (dispatcher, store, _) = dispatcher();
        let err = dispatcher.dispatch_to("ghost", json!({}), "orchestrator").await.unwrap_err();
        assert!(matches!(err, SwitchyardError::UnknownAgent(ref id) if id == "ghost"));
        assert!(store.list_handoffs().await.unwrap().is_empty());
        assert!(store.all_events().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_successful_dispatch_audits_once() {
        let (dispatcher, store, monitor) = dispatcher();
        let (handoff, result) = dispatcher
            .dispatch_to("pricing", json!({"qty": 3}), "orchestrator")
            .await
            .unwrap();
        assert_eq!(result, json!({"total": 30}));
        assert_eq!(handoff.status, HandoffStatus::Completed);

        let handoffs = store.list_handoffs().await.unwrap();
        assert_eq!(handoffs.len(), 1);
        assert_eq!(handoffs[0].status, HandoffStatus::Completed);
        assert_eq!(handoffs[0].result, Some(json!({"total": 30})));

        let kinds: Vec<EventKind> = store.all_events().await.unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Handoff, EventKind::TaskEnd]);
        assert_eq!(monitor.get_state("pricing").await.unwrap().metrics.dispatches, 1);
    }

    #[tokio::test]
    async fn test_failed_dispatch_records_error() {
        let (dispatcher, store, monitor) = dispatcher();
        let err = dispatcher.dispatch_to("broken", json!({}), "orchestrator").await.unwrap_err();
        match err {
            SwitchyardError::Handler { agent, message } => {
                assert_eq!(agent, "broken");
                assert!(message.contains("ledger offline"));
            }
            other => panic!("Expected handler error, got {other:?}"),
        }

        let handoffs = store.list_handoffs().await.unwrap();
        assert_eq!(handoffs[0].status, HandoffStatus::Failed);
        assert!(handoffs[0].error.as_deref().unwrap().contains("ledger offline"));

        let kinds: Vec<EventKind> = store.all_events().await.unwrap().iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Handoff, EventKind::Error]);
        assert_eq!(monitor.get_state("broken").await.unwrap().metrics.failures, 1);
    }

    #[tokio::test]
    async fn test_task_dispatch_carries_trace() {
        let (dispatcher, store, _) = dispatcher();
        let task = Task::new("price_quote", json!({}));
        dispatcher
            .dispatch(
                DispatchRequest::new("pricing", json!({"qty": 1}), "orchestrator")
                    .with_intent(Some("price_quote".into()))
                    .for_task(&task),
            )
            .await
            .unwrap();

        let handoff = &store.list_handoffs().await.unwrap()[0];
        assert_eq!(handoff.trace_id, Some(task.trace_id));
        assert_eq!(handoff.intent.as_deref(), Some("price_quote"));
        assert_eq!(store.list_events(task.trace_id).await.unwrap().len(), 2);
    }
}
