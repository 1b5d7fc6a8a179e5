//! Agent dispatch, messaging, and lifecycle governance.
//!
//! A fixed set of agents is registered once at startup. The [`Orchestrator`] turns a
//! request into a [`switchyard_core::Task`], plans it, passes the plan through routing
//! governance, dispatches the steps, and passes every result through output
//! governance. Anything it cannot resolve on its own becomes a review item for a
//! human supervisor.
//!
//! # Main types
//!
//! - [`Orchestrator`]: Drives a task through its lifecycle.
//! - [`AgentRegistry`] / [`Dispatcher`]: Named agents and the audited dispatch path.
//! - [`MessageBus`]: Fire-and-forget sends, blocking queries, and human escalation.
//! - [`DeadlockDetector`]: Finds query wait cycles and breaks them.
//! - [`RoutingPolicy`] / [`OutputPolicy`]: The two governance checkpoints.
//! - [`ReviewDesk`]: Stores review items and wakes whoever waits on them.
//! - [`Runtime`]: The context object wiring all of the above together.

/// Message bus over a pub/sub fabric.
pub mod bus;
/// Governance and bus configuration.
pub mod config;
/// Wait graph and deadlock resolution.
pub mod deadlock;
/// Audited dispatch of payloads to agents.
pub mod dispatcher;
/// Task lifecycle driver.
pub mod engine;
/// Routing and output governance.
pub mod governance;
/// Per-agent status and metrics.
pub mod monitor;
/// Plan generation with a deterministic fallback.
pub mod planner;
/// Agent handlers and the registry.
pub mod registry;
/// Human review items and blocking waits on them.
pub mod review;
/// Runtime context construction.
pub mod runtime;
/// Shared orchestration types.
pub mod types;

pub use bus::{Delivery, InMemoryFabric, MessageBus, PubSubFabric, Subscription};
pub use config::{BusConfig, GovernanceConfig, RouteConfig, RouteStep};
pub use deadlock::{DeadlockDetector, DeadlockResolution, WaitEdge, WaitGraph};
pub use dispatcher::{DispatchRequest, Dispatcher};
pub use engine::{Orchestrator, ORCHESTRATOR_ID};
pub use governance::output::{
    FiredRule, JsonType, OutputContract, OutputPolicy, OutputVerdict, RangeRule, RiskRule,
    MAX_SCHEMA_ATTEMPTS,
};
pub use governance::routing::{RoutingDecision, RoutingPolicy};
pub use monitor::AgentMonitor;
pub use planner::{PlanDraft, Planner, TemplatePlanner};
pub use registry::{AgentHandler, AgentRegistry, FnAgent};
pub use review::ReviewDesk;
pub use runtime::{Runtime, RuntimeBuilder};
pub use types::{
    AgentMetrics, AgentState, ExecutionPlan, PlanSource, PlanStep, RiskAssessment, StepOutput,
    TaskOutcome, WorkerStatus,
};
