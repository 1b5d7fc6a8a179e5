use crate::types::{ExecutionPlan, PlanStep, RiskAssessment};
use std::collections::HashMap;

/// Risk contributed by every step of a plan.
pub const STEP_WEIGHT: u32 = 5;
/// Additional risk for each step with external side effects.
pub const SIDE_EFFECT_WEIGHT: u32 = 25;

/// Outcome of routing governance for one plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDecision {
    /// Dispatch without asking anyone.
    AutoApprove,
    /// Park the task on a routing review.
    RequireReview {
        /// Why the plan did not qualify.
        reasons: Vec<String>,
    },
}

impl RoutingDecision {
    /// Whether the plan may run unattended.
    pub fn is_auto(&self) -> bool {
        matches!(self, RoutingDecision::AutoApprove)
    }
}

/// Static routing policy: a risk threshold and per-agent sensitivity.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
    /// Highest score that may auto-approve.
    pub threshold: u32,
    /// Extra risk for targeting an agent, keyed by agent id.
    pub sensitivity: HashMap<String, u32>,
}

impl RoutingPolicy {
    /// A policy with no agent sensitivities.
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            sensitivity: HashMap::new(),
        }
    }

    /// Add risk for plans that target `agent`.
    pub fn with_sensitivity(mut self, agent: impl Into<String>, sensitivity: u32) -> Self {
        self.sensitivity.insert(agent.into(), sensitivity);
        self
    }

    /// Score a plan's steps on a 0–100 scale.
    ///
    /// Each step adds [`STEP_WEIGHT`], each step with external side effects adds
    /// [`SIDE_EFFECT_WEIGHT`], and the most sensitive target agent adds its
    /// configured sensitivity once.
    pub fn score_plan(&self, steps: &[PlanStep]) -> RiskAssessment {
        let mut factors = Vec::new();
        let mut score = STEP_WEIGHT.saturating_mul(steps.len() as u32);
        factors.push(format!("{} step(s): +{score}", steps.len()));

        let side_effects = steps.iter().filter(|s| s.external_side_effects).count() as u32;
        if side_effects > 0 {
            let add = SIDE_EFFECT_WEIGHT.saturating_mul(side_effects);
            score = score.saturating_add(add);
            factors.push(format!("{side_effects} step(s) with external side effects: +{add}"));
        }

        let most_sensitive = steps
            .iter()
            .filter_map(|s| self.sensitivity.get(&s.agent).map(|v| (s.agent.as_str(), *v)))
            .max_by_key(|(_, v)| *v);
        if let Some((agent, sensitivity)) = most_sensitive {
            if sensitivity > 0 {
                score = score.saturating_add(sensitivity);
                factors.push(format!("sensitive target '{agent}': +{sensitivity}"));
            }
        }

        RiskAssessment {
            score: score.min(100),
            factors,
        }
    }

    /// Decide whether a scored plan may dispatch without a human.
    ///
    /// Auto-approval requires all three: score at or under the threshold, exactly one
    /// step, and that step being auto-approve eligible. Every failed condition is
    /// listed in the returned reasons.
    pub fn evaluate(&self, plan: &ExecutionPlan) -> RoutingDecision {
        let mut reasons = Vec::new();
        if plan.risk.score > self.threshold {
            reasons.push(format!(
                "risk score {} exceeds threshold {}",
                plan.risk.score, self.threshold
            ));
        }
        if plan.steps.len() != 1 {
            reasons.push(format!(
                "plan has {} steps; only single-step plans auto-approve",
                plan.steps.len()
            ));
        } else if !plan.steps[0].auto_approve_eligible {
            reasons.push(format!(
                "step targeting '{}' is not auto-approve eligible",
                plan.steps[0].agent
            ));
        }

        if reasons.is_empty() {
            RoutingDecision::AutoApprove
        } else {
            RoutingDecision::RequireReview { reasons }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::PlanSource;
    use serde_json::json;

    fn plan(steps: Vec<PlanStep>, score: u32) -> ExecutionPlan {
        ExecutionPlan::new(steps, PlanSource::Template).with_risk(RiskAssessment {
            score,
            factors: Vec::new(),
        })
    }

    #[test]
    fn test_single_eligible_low_risk_auto_approves() {
        let policy = RoutingPolicy::new(50);
        let p = plan(vec![PlanStep::new("pricing", json!({})).eligible()], 5);
        assert_eq!(policy.evaluate(&p), RoutingDecision::AutoApprove);
    }

    #[test]
    fn test_three_steps_require_review_even_at_low_risk() {
        let policy = RoutingPolicy::new(50);
        let p = plan(
            vec![
                PlanStep::new("a", json!({})).eligible(),
                PlanStep::new("b", json!({})).eligible(),
                PlanStep::new("c", json!({})).eligible(),
            ],
            5,
        );
        match policy.evaluate(&p) {
            RoutingDecision::RequireReview { reasons } => {
                assert_eq!(reasons.len(), 1);
                assert!(reasons[0].contains("3 steps"));
            }
            other => panic!("Expected review, got {other:?}"),
        }
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let policy = RoutingPolicy::new(50);
        let at = plan(vec![PlanStep::new("a", json!({})).eligible()], 50);
        let over = plan(vec![PlanStep::new("a", json!({})).eligible()], 51);
        assert!(policy.evaluate(&at).is_auto());
        assert!(!policy.evaluate(&over).is_auto());
    }

    #[test]
    fn test_ineligible_step_requires_review() {
        let policy = RoutingPolicy::new(50);
        let p = plan(vec![PlanStep::new("mailer", json!({}))], 5);
        assert!(!policy.evaluate(&p).is_auto());
    }

    #[test]
    fn test_empty_plan_requires_review() {
        let policy = RoutingPolicy::new(50);
        assert!(!policy.evaluate(&plan(Vec::new(), 0)).is_auto());
    }

    #[test]
    fn test_score_factors() {
        let policy = RoutingPolicy::new(50)
            .with_sensitivity("billing", 30)
            .with_sensitivity("research", 5);
        let steps = vec![
            PlanStep::new("research", json!({})),
            PlanStep::new("billing", json!({})).with_side_effects(),
        ];
        let risk = policy.score_plan(&steps);
        assert_eq!(risk.score, 10 + 25 + 30);
        assert_eq!(risk.factors.len(), 3);
    }

    #[test]
    fn test_single_plain_step_scores_five() {
        let policy = RoutingPolicy::new(50);
        let risk = policy.score_plan(&[PlanStep::new("pricing", json!({}))]);
        assert_eq!(risk.score, 5);
    }

    #[test]
    fn test_score_is_capped() {
        let policy = RoutingPolicy::new(50);
        let steps: Vec<PlanStep> = (0..10)
            .map(|i| PlanStep::new(format!("a{i}"), json!({})).with_side_effects())
            .collect();
        assert_eq!(policy.score_plan(&steps).score, 100);
    }
}
