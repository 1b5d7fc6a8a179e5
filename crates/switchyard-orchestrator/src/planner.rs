use crate::config::RouteConfig;
use crate::types::{PlanSource, PlanStep};
use serde::Deserialize;
use std::sync::Arc;
use switchyard_core::{SwitchyardError, SwitchyardResult, Task};
use switchyard_llm::{Prompt, TextGenerator};
use tracing::{debug, info, warn};

const PLANNER_SYSTEM_PROMPT: &str = "You route work to agents. Reply with a JSON object \
{\"steps\": [{\"agent\": <agent id>, \"payload\": <object>}]}. \
Use only the listed agent ids. Prefer the fewest steps.";

/// Deterministic plans from configured routes.
///
/// A task's pipeline label is looked up first, then its intent. Without a
/// matching route, an intent that names a registered agent becomes a single
/// eligible step to that agent.
#[derive(Debug, Clone, Default)]
pub struct TemplatePlanner {
    routes: Vec<RouteConfig>,
}

impl TemplatePlanner {
    /// Planner over the configured routes.
    pub fn new(routes: Vec<RouteConfig>) -> Self {
        Self { routes }
    }

    fn route(&self, key: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.intent == key)
    }

    fn task_route(&self, task: &Task) -> Option<&RouteConfig> {
        task.pipeline
            .as_deref()
            .and_then(|p| self.route(p))
            .or_else(|| self.route(&task.intent))
    }

    /// Deterministic steps for `task`, or a `Config` error when neither a route
    /// nor a registered agent matches.
    pub fn plan(&self, task: &Task, agents: &[(String, String)]) -> SwitchyardResult<Vec<PlanStep>> {
        if let Some(route) = self.task_route(task) {
            return Ok(route.plan_steps(&task.payload));
        }

        if agents.iter().any(|(id, _)| *id == task.intent) {
            return Ok(vec![PlanStep::new(&task.intent, task.payload.clone())
                .with_intent(&task.intent)
                .eligible()]);
        }

        Err(SwitchyardError::Config(format!(
            "no route and no agent for intent '{}'",
            task.intent
        )))
    }

    /// Overwrite a step's governance flags with what the routes say about its agent.
    ///
    /// The task's own route decides when it lists the agent. Otherwise the most
    /// restrictive flags the agent has in any route apply. An agent no route
    /// lists is eligible only as the single-agent fallback for its own intent,
    /// and is assumed to have side effects everywhere else.
    pub fn apply_route_flags(&self, task: &Task, step: &mut PlanStep) {
        let own = self
            .task_route(task)
            .and_then(|r| r.steps.iter().find(|s| s.agent == step.agent));
        let (side_effects, eligible) = match own {
            Some(s) => (s.external_side_effects, s.auto_approve_eligible),
            None => {
                let listed: Vec<_> = self
                    .routes
                    .iter()
                    .flat_map(|r| &r.steps)
                    .filter(|s| s.agent == step.agent)
                    .collect();
                if !listed.is_empty() {
                    (
                        listed.iter().any(|s| s.external_side_effects),
                        listed.iter().all(|s| s.auto_approve_eligible),
                    )
                } else if step.agent == task.intent {
                    (false, true)
                } else {
                    (true, false)
                }
            }
        };
        step.external_side_effects = side_effects;
        step.auto_approve_eligible = eligible;
    }
}

/// A plan's steps and how they were obtained.
#[derive(Debug, Clone)]
pub struct PlanDraft {
    /// Steps in dispatch order.
    pub steps: Vec<PlanStep>,
    /// Whether the generator or a template produced them.
    pub source: PlanSource,
    /// Why the generator was bypassed, when it was configured but failed.
    pub degraded: Option<String>,
}

#[derive(Deserialize)]
struct GeneratedPlan {
    steps: Vec<PlanStep>,
}

/// Plans with a text generator when one is configured, else from templates.
pub struct Planner {
    generator: Option<Arc<dyn TextGenerator>>,
    template: TemplatePlanner,
}

impl Planner {
    /// Plan with `generator` when present, falling back to `template`.
    pub fn new(generator: Option<Arc<dyn TextGenerator>>, template: TemplatePlanner) -> Self {
        Self {
            generator,
            template,
        }
    }

    /// Plan `task` over the registered `agents`.
    ///
    /// `feedback` carries what went wrong last time (schema violations or a
    /// reviewer's modification request) and is handed to every step payload.
    /// A recoverable generator failure falls back to the template planner and
    /// is reported in [`PlanDraft::degraded`].
    pub async fn plan(
        &self,
        task: &Task,
        agents: &[(String, String)],
        feedback: Option<&str>,
    ) -> SwitchyardResult<PlanDraft> {
        let mut draft = match &self.generator {
            Some(generator) => match self.generate(generator.as_ref(), task, agents, feedback).await {
                Ok(steps) => PlanDraft {
                    steps,
                    source: PlanSource::Generated,
                    degraded: None,
                },
                Err(e) if e.is_recoverable() => {
                    warn!(task_id = %task.id, generator = %generator.label(), error = %e, "Planning degraded to templates");
                    PlanDraft {
                        steps: self.template.plan(task, agents)?,
                        source: PlanSource::Template,
                        degraded: Some(e.to_string()),
                    }
                }
                Err(e) => return Err(e),
            },
            None => PlanDraft {
                steps: self.template.plan(task, agents)?,
                source: PlanSource::Template,
                degraded: None,
            },
        };

        if let Some(feedback) = feedback {
            for step in &mut draft.steps {
                if let Some(obj) = step.payload.as_object_mut() {
                    obj.insert("feedback".into(), serde_json::Value::String(feedback.to_string()));
                }
            }
        }
        info!(task_id = %task.id, steps = draft.steps.len(), source = ?draft.source, "Plan drafted");
        Ok(draft)
    }

    async fn generate(
        &self,
        generator: &dyn TextGenerator,
        task: &Task,
        agents: &[(String, String)],
        feedback: Option<&str>,
    ) -> SwitchyardResult<Vec<PlanStep>> {
        let roster: Vec<String> = agents.iter().map(|(id, name)| format!("- {id}: {name}")).collect();
        let mut user = format!(
            "Intent: {}\nPayload: {}\nAgents:\n{}",
            task.intent,
            task.payload,
            roster.join("\n")
        );
        if let Some(feedback) = feedback {
            user.push_str(&format!("\nThe previous attempt was rejected: {feedback}"));
        }

        let value = generator
            .generate(&Prompt::new(user).with_system(PLANNER_SYSTEM_PROMPT).json())
            .await?
            .into_json()?;
        let plan: GeneratedPlan = serde_json::from_value(value)
            .map_err(|e| SwitchyardError::MalformedResponse(format!("plan does not parse: {e}")))?;
        if plan.steps.is_empty() {
            return Err(SwitchyardError::MalformedResponse("plan has no steps".into()));
        }

        let steps = plan
            .steps
            .into_iter()
            .map(|mut step| {
                if step.payload.is_null() {
                    step.payload = task.payload.clone();
                }
                if step.intent.is_none() {
                    step.intent = Some(task.intent.clone());
                }
                self.template.apply_route_flags(task, &mut step);
                step
            })
            .collect::<Vec<_>>();
        debug!(task_id = %task.id, targets = ?steps.iter().map(|s| &s.agent).collect::<Vec<_>>(), "Generated plan parsed");
        Ok(steps)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::RouteStep;
    use serde_json::json;
    use switchyard_llm::{Generated, ScriptedGenerator};

    fn agents() -> Vec<(String, String)> {
        vec![
            ("mailer".to_string(), "Mailer".to_string()),
            ("pricing".to_string(), "Pricing".to_string()),
        ]
    }

    fn quote_route() -> RouteConfig {
        RouteConfig {
            intent: "quote_and_send".into(),
            steps: vec![
                RouteStep {
                    agent: "pricing".into(),
                    external_side_effects: false,
                    auto_approve_eligible: true,
                },
                RouteStep {
                    agent: "mailer".into(),
                    external_side_effects: true,
                    auto_approve_eligible: false,
                },
            ],
        }
    }

    #[test]
    fn test_template_uses_route() {
        let planner = TemplatePlanner::new(vec![quote_route()]);
        let task = Task::new("quote_and_send", json!({"sku": "A"}));
        let steps = planner.plan(&task, &agents()).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].agent, "mailer");
        assert!(steps[1].external_side_effects);
    }

    #[test]
    fn test_template_prefers_pipeline() {
        let planner = TemplatePlanner::new(vec![quote_route()]);
        let task = Task::new("pricing", json!({})).with_pipeline(Some("quote_and_send".into()));
        assert_eq!(planner.plan(&task, &agents()).unwrap().len(), 2);
    }

    #[test]
    fn test_template_falls_back_to_agent_named_by_intent() {
        let planner = TemplatePlanner::default();
        let task = Task::new("pricing", json!({"sku": "B"}));
        let steps = planner.plan(&task, &agents()).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].agent, "pricing");
        assert!(steps[0].auto_approve_eligible);
        assert_eq!(steps[0].payload["sku"], "B");
    }

    #[test]
    fn test_template_without_match_fails() {
        let planner = TemplatePlanner::default();
        let task = Task::new("launch_rocket", json!({}));
        assert!(matches!(
            planner.plan(&task, &agents()).unwrap_err(),
            SwitchyardError::Config(_)
        ));
    }

    #[tokio::test]
    async fn test_generated_plan_is_used() {
        let generator = Arc::new(ScriptedGenerator::always_json(
            json!({"steps": [{"agent": "pricing", "auto_approve_eligible": true}]}),
            1,
        ));
        let planner = Planner::new(
            Some(generator.clone() as Arc<dyn TextGenerator>),
            TemplatePlanner::default(),
        );
        let task = Task::new("price_quote", json!({"sku": "C"}));
        let draft = planner.plan(&task, &agents(), None).await.unwrap();

        assert_eq!(draft.source, PlanSource::Generated);
        assert!(draft.degraded.is_none());
        assert_eq!(draft.steps[0].payload["sku"], "C");
        assert_eq!(draft.steps[0].intent.as_deref(), Some("price_quote"));
        assert!(generator.prompts()[0].user.contains("- pricing: Pricing"));
    }

    #[tokio::test]
    async fn test_generated_flags_come_from_routes() {
        let generator = ScriptedGenerator::always_json(
            json!({"steps": [{
                "agent": "mailer",
                "external_side_effects": false,
                "auto_approve_eligible": true
            }]}),
            1,
        );
        let planner = Planner::new(
            Some(Arc::new(generator) as Arc<dyn TextGenerator>),
            TemplatePlanner::new(vec![quote_route()]),
        );
        let task = Task::new("quote_and_send", json!({}));
        let draft = planner.plan(&task, &agents(), None).await.unwrap();

        assert_eq!(draft.source, PlanSource::Generated);
        assert!(draft.steps[0].external_side_effects);
        assert!(!draft.steps[0].auto_approve_eligible);
    }

    #[test]
    fn test_route_flags_outside_own_route() {
        let planner = TemplatePlanner::new(vec![quote_route()]);
        let task = Task::new("notify", json!({}));

        let mut mailer = PlanStep::new("mailer", json!({})).eligible();
        planner.apply_route_flags(&task, &mut mailer);
        assert!(mailer.external_side_effects);
        assert!(!mailer.auto_approve_eligible);

        let mut unknown = PlanStep::new("archiver", json!({})).eligible();
        planner.apply_route_flags(&task, &mut unknown);
        assert!(unknown.external_side_effects);
        assert!(!unknown.auto_approve_eligible);

        let own_intent = Task::new("archiver", json!({}));
        let mut named = PlanStep::new("archiver", json!({})).with_side_effects();
        planner.apply_route_flags(&own_intent, &mut named);
        assert!(!named.external_side_effects);
        assert!(named.auto_approve_eligible);
    }

    #[tokio::test]
    async fn test_unavailable_generator_degrades_to_template() {
        let planner = Planner::new(
            Some(Arc::new(ScriptedGenerator::unavailable())),
            TemplatePlanner::default(),
        );
        let task = Task::new("pricing", json!({}));
        let draft = planner.plan(&task, &agents(), None).await.unwrap();
        assert_eq!(draft.source, PlanSource::Template);
        assert!(draft.degraded.unwrap().contains("exhausted"));
    }

    #[tokio::test]
    async fn test_malformed_plan_degrades_to_template() {
        let planner = Planner::new(
            Some(Arc::new(ScriptedGenerator::new(vec![Ok(Generated::Text(
                "route it to pricing".into(),
            ))]))),
            TemplatePlanner::default(),
        );
        let task = Task::new("pricing", json!({}));
        let draft = planner.plan(&task, &agents(), None).await.unwrap();
        assert_eq!(draft.source, PlanSource::Template);
        assert!(draft.degraded.is_some());
    }

    #[tokio::test]
    async fn test_feedback_reaches_step_payloads() {
        let planner = Planner::new(None, TemplatePlanner::default());
        let task = Task::new("pricing", json!({"sku": "D"}));
        let draft = planner
            .plan(&task, &agents(), Some("missing required field 'total'"))
            .await
            .unwrap();
        assert_eq!(draft.steps[0].payload["feedback"], "missing required field 'total'");
    }
}
