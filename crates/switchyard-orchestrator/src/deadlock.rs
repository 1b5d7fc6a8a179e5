use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use switchyard_core::{Actor, Event, EventKind, SwitchyardResult};
use switchyard_store::DurableStore;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// `waiter` is blocked on a query to `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitEdge {
    /// The blocked agent.
    pub waiter: String,
    /// The agent it waits on.
    pub target: String,
    /// The outstanding query.
    pub correlation_id: Uuid,
    /// When the wait began.
    pub blocked_at: DateTime<Utc>,
    /// Trace of the waiter's task, if any.
    #[serde(default)]
    pub trace_id: Option<Uuid>,
}

impl WaitEdge {
    /// An edge starting now.
    pub fn new(waiter: impl Into<String>, target: impl Into<String>, correlation_id: Uuid) -> Self {
        Self {
            waiter: waiter.into(),
            target: target.into(),
            correlation_id,
            blocked_at: Utc::now(),
            trace_id: None,
        }
    }

    /// Tag the edge with a trace.
    pub fn with_trace(mut self, trace_id: Option<Uuid>) -> Self {
        self.trace_id = trace_id;
        self
    }
}

type Pending = (WaitEdge, oneshot::Sender<()>);

/// Live "who waits on whom" edges, one per outstanding query.
///
/// The bus adds an edge when a query starts and removes it when the query ends.
/// Forcing a timeout removes the edge and fires the query's cancel signal.
#[derive(Default)]
pub struct WaitGraph {
    edges: Mutex<HashMap<Uuid, Pending>>,
}

impl WaitGraph {
    /// An empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an edge. The returned receiver fires if the wait is forced to time out.
    pub fn begin(&self, edge: WaitEdge) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        debug!(waiter = %edge.waiter, target = %edge.target, correlation_id = %edge.correlation_id, "Wait edge added");
        self.edges.lock().insert(edge.correlation_id, (edge, tx));
        rx
    }

    /// Remove the edge for a finished query. Unknown ids are ignored.
    pub fn end(&self, correlation_id: Uuid) {
        self.edges.lock().remove(&correlation_id);
    }

    /// Snapshot of all edges, oldest first.
    pub fn edges(&self) -> Vec<WaitEdge> {
        let mut edges: Vec<WaitEdge> = self.edges.lock().values().map(|(e, _)| e.clone()).collect();
        edges.sort_by_key(|e| e.blocked_at);
        edges
    }

    /// Whether no query is outstanding.
    pub fn is_empty(&self) -> bool {
        self.edges.lock().is_empty()
    }

    /// Find one wait cycle, returned as the agents along it in wait order.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut adjacency: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for edge in self.edges() {
            adjacency.entry(edge.waiter).or_default().push(edge.target);
        }

        let mut visited: HashMap<String, u8> = HashMap::new();
        let mut path: Vec<String> = Vec::new();
        for start in adjacency.keys() {
            if visited.contains_key(start) {
                continue;
            }
            if let Some(cycle) = dfs_cycle(start, &adjacency, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    /// Cancel the wait with this correlation id. False if it already ended.
    pub fn force_timeout(&self, correlation_id: Uuid) -> bool {
        let Some((edge, cancel)) = self.edges.lock().remove(&correlation_id) else {
            return false;
        };
        if cancel.send(()).is_err() {
            debug!(waiter = %edge.waiter, "Forced wait had already finished");
            return false;
        }
        true
    }
}

fn dfs_cycle(
    node: &str,
    adjacency: &BTreeMap<String, Vec<String>>,
    visited: &mut HashMap<String, u8>,
    path: &mut Vec<String>,
) -> Option<Vec<String>> {
    match visited.get(node) {
        Some(1) => {
            let from = path.iter().position(|n| n == node)?;
            return Some(path[from..].to_vec());
        }
        Some(2) => return None,
        _ => {}
    }
    visited.insert(node.to_string(), 1);
    path.push(node.to_string());
    if let Some(targets) = adjacency.get(node) {
        for next in targets {
            if let Some(cycle) = dfs_cycle(next, adjacency, visited, path) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    visited.insert(node.to_string(), 2);
    None
}

/// A broken wait cycle and the wait that was forced to time out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadlockResolution {
    /// Agents in the cycle, in wait order.
    pub cycle: Vec<String>,
    /// The wait that was timed out.
    pub victim: WaitEdge,
}

/// Breaks query wait cycles by timing out the longest-waiting member.
pub struct DeadlockDetector {
    waits: Arc<WaitGraph>,
    store: Arc<dyn DurableStore>,
}

impl DeadlockDetector {
    /// A detector over the shared wait graph.
    pub fn new(waits: Arc<WaitGraph>, store: Arc<dyn DurableStore>) -> Self {
        Self { waits, store }
    }

    /// The current cycle, if any, without resolving it.
    pub fn detect(&self) -> Option<Vec<String>> {
        self.waits.find_cycle()
    }

    /// Find a cycle and force a timeout on the oldest wait inside it.
    ///
    /// The victim's query returns a forced `QueryTimeout`; a `blocked` and an
    /// `unblocked` event record the resolution.
    pub async fn detect_and_resolve(&self) -> SwitchyardResult<Option<DeadlockResolution>> {
        let Some(cycle) = self.waits.find_cycle() else {
            return Ok(None);
        };

        let on_cycle = |edge: &WaitEdge| {
            cycle.iter().enumerate().any(|(i, agent)| {
                *agent == edge.waiter && cycle[(i + 1) % cycle.len()] == edge.target
            })
        };
        let Some(victim) = self
            .waits
            .edges()
            .into_iter()
            .filter(|e| on_cycle(e))
            .min_by_key(|e| e.blocked_at)
        else {
            return Ok(None);
        };

        if !self.waits.force_timeout(victim.correlation_id) {
            return Ok(None);
        }

        let path = cycle.join(" -> ");
        warn!(
            cycle = %path,
            victim = %victim.waiter,
            target = %victim.target,
            correlation_id = %victim.correlation_id,
            "Deadlock detected, forcing timeout"
        );

        let actor = Actor::agent(&victim.waiter);
        self.store
            .append_event(
                &Event::new(EventKind::Blocked, actor.clone())
                    .with_trace(None, victim.trace_id)
                    .with_note(format!(
                        "deadlock {path} -> {}: '{}' waiting on '{}' since {}",
                        cycle[0], victim.waiter, victim.target, victim.blocked_at
                    )),
            )
            .await?;
        self.store
            .append_event(
                &Event::new(EventKind::Unblocked, actor)
                    .with_trace(None, victim.trace_id)
                    .with_note("forced"),
            )
            .await?;

        Ok(Some(DeadlockResolution { cycle, victim }))
    }

    /// Run [`detect_and_resolve`](Self::detect_and_resolve) every `interval`
    /// until `shutdown` turns true or its sender is dropped.
    pub fn spawn_watch(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "Deadlock watch started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = self.detect_and_resolve().await {
                            warn!(error = %e, "Deadlock scan failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Deadlock watch stopped");
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use switchyard_store::InMemoryStore;

    fn edge_at(waiter: &str, target: &str, secs_ago: i64) -> WaitEdge {
        let mut edge = WaitEdge::new(waiter, target, Uuid::new_v4());
        edge.blocked_at = Utc::now() - chrono::Duration::seconds(secs_ago);
        edge
    }

    #[test]
    fn test_no_cycle_in_chain() {
        let graph = WaitGraph::new();
        let _a = graph.begin(edge_at("a", "b", 2));
        let _b = graph.begin(edge_at("b", "c", 1));
        assert!(graph.find_cycle().is_none());
    }

    #[test]
    fn test_two_agent_cycle() {
        let graph = WaitGraph::new();
        let _a = graph.begin(edge_at("a", "b", 2));
        let _b = graph.begin(edge_at("b", "a", 1));
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_cycle_behind_a_tail() {
        let graph = WaitGraph::new();
        let _t = graph.begin(edge_at("a", "b", 3));
        let _x = graph.begin(edge_at("b", "c", 2));
        let _y = graph.begin(edge_at("c", "b", 1));
        let cycle = graph.find_cycle().unwrap();
        assert_eq!(cycle, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_end_clears_edge() {
        let graph = WaitGraph::new();
        let edge = edge_at("a", "b", 0);
        let cid = edge.correlation_id;
        let _rx = graph.begin(edge);
        graph.end(cid);
        assert!(graph.is_empty());
        assert!(!graph.force_timeout(cid));
    }

    #[tokio::test]
    async fn test_resolve_times_out_oldest_waiter() {
        let graph = Arc::new(WaitGraph::new());
        let store = Arc::new(InMemoryStore::new());
        let detector = DeadlockDetector::new(graph.clone(), store.clone());

        let _a = graph.begin(edge_at("a", "b", 1));
        let mut b = graph.begin(edge_at("b", "c", 5));
        let _c = graph.begin(edge_at("c", "a", 3));

        let resolution = detector.detect_and_resolve().await.unwrap().unwrap();
        assert_eq!(resolution.cycle.len(), 3);
        assert_eq!(resolution.victim.waiter, "b");
        assert!(b.try_recv().is_ok());
        assert_eq!(graph.edges().len(), 2);
        assert!(detector.detect().is_none());

        let events = store.all_events().await.unwrap();
        let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![EventKind::Blocked, EventKind::Unblocked]);
        assert_eq!(events[1].note.as_deref(), Some("forced"));
    }

    #[tokio::test]
    async fn test_nothing_to_resolve() {
        let detector = DeadlockDetector::new(Arc::new(WaitGraph::new()), Arc::new(InMemoryStore::new()));
        assert!(detector.detect_and_resolve().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_watch_stops_on_shutdown() {
        let detector = Arc::new(DeadlockDetector::new(
            Arc::new(WaitGraph::new()),
            Arc::new(InMemoryStore::new()),
        ));
        let (tx, rx) = watch::channel(false);
        let handle = detector.spawn_watch(Duration::from_millis(10), rx);
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
