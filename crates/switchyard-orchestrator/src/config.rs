use crate::governance::output::{OutputContract, OutputPolicy, MAX_SCHEMA_ATTEMPTS};
use crate::governance::routing::RoutingPolicy;
use crate::types::PlanStep;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// One step of a deterministic route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteStep {
    /// Target agent id.
    pub agent: String,
    /// The step changes something outside the system.
    #[serde(default)]
    pub external_side_effects: bool,
    /// The step may run without review when it is the only one.
    #[serde(default = "default_true")]
    pub auto_approve_eligible: bool,
}

/// A fixed plan for an intent, used when no text generator is configured or it fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Intent or pipeline label the route answers to.
    pub intent: String,
    /// Steps in dispatch order.
    pub steps: Vec<RouteStep>,
}

impl RouteConfig {
    /// Materialize the route's steps, handing each one the request payload.
    pub fn plan_steps(&self, payload: &serde_json::Value) -> Vec<PlanStep> {
        self.steps
            .iter()
            .map(|s| PlanStep {
                agent: s.agent.clone(),
                payload: payload.clone(),
                intent: Some(self.intent.clone()),
                external_side_effects: s.external_side_effects,
                auto_approve_eligible: s.auto_approve_eligible,
            })
            .collect()
    }
}

/// Governance thresholds, per-agent sensitivity, output contracts, and routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceConfig {
    /// Highest plan score that may auto-approve.
    #[serde(default = "default_threshold")]
    pub routing_threshold: u32,
    /// Output scores at or above this go to draft review.
    #[serde(default = "default_threshold")]
    pub output_threshold: u32,
    /// Schema failures allowed before escalating.
    #[serde(default = "default_max_schema_attempts")]
    pub max_schema_attempts: u32,
    /// Extra routing risk per target agent.
    #[serde(default)]
    pub agent_sensitivity: HashMap<String, u32>,
    /// Per-agent output contracts.
    #[serde(default)]
    pub contracts: Vec<OutputContract>,
    /// Deterministic routes, also the source of step flags.
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

fn default_true() -> bool {
    true
}

fn default_threshold() -> u32 {
    50
}

fn default_max_schema_attempts() -> u32 {
    MAX_SCHEMA_ATTEMPTS
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            routing_threshold: default_threshold(),
            output_threshold: default_threshold(),
            max_schema_attempts: default_max_schema_attempts(),
            agent_sensitivity: HashMap::new(),
            contracts: Vec::new(),
            routes: Vec::new(),
        }
    }
}

impl GovernanceConfig {
    /// Routing policy with the configured threshold and sensitivities.
    pub fn routing_policy(&self) -> RoutingPolicy {
        let mut policy = RoutingPolicy::new(self.routing_threshold);
        policy.sensitivity = self.agent_sensitivity.clone();
        policy
    }

    /// Output policy with every configured contract.
    pub fn output_policy(&self) -> OutputPolicy {
        self.contracts.iter().cloned().fold(
            OutputPolicy::new(self.output_threshold)
                .with_max_schema_attempts(self.max_schema_attempts),
            OutputPolicy::with_contract,
        )
    }

    /// The route for `intent`, if one is configured.
    pub fn route(&self, intent: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.intent == intent)
    }
}

/// Message bus and deadlock watch timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// How long a bus query waits for its reply.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// How often the deadlock watch scans.
    #[serde(default = "default_deadlock_scan_ms")]
    pub deadlock_scan_ms: u64,
}

fn default_query_timeout_ms() -> u64 {
    5_000
}

fn default_deadlock_scan_ms() -> u64 {
    1_000
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: default_query_timeout_ms(),
            deadlock_scan_ms: default_deadlock_scan_ms(),
        }
    }
}

impl BusConfig {
    /// `query_timeout_ms` as a duration.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// `deadlock_scan_ms` as a duration.
    pub fn deadlock_scan_interval(&self) -> Duration {
        Duration::from_millis(self.deadlock_scan_ms)
    }
}
