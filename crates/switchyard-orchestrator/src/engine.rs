use crate::config::GovernanceConfig;
use crate::dispatcher::DispatchRequest;
use crate::governance::output::{OutputPolicy, OutputVerdict};
use crate::governance::routing::{RoutingDecision, RoutingPolicy};
use crate::planner::{Planner, TemplatePlanner};
use crate::runtime::Runtime;
use crate::types::{ExecutionPlan, StepOutput, TaskOutcome};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use switchyard_core::{
    can_transition, replay, Actor, Event, EventKind, ReviewAction, ReviewItem, ReviewKind,
    RiskLevel, SwitchyardError, SwitchyardResult, Task, TaskLifecycle, TaskRequest, TaskState,
    Trigger,
};
use switchyard_llm::TextGenerator;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Actor id the orchestrator dispatches and escalates as.
pub const ORCHESTRATOR_ID: &str = "orchestrator";

/// The output that failed the schema check, kept until the retry decision.
#[derive(Debug, Clone)]
struct SchemaFailure {
    agent: String,
    output: serde_json::Value,
    violations: Vec<String>,
}

/// Working state of one drive of a task.
#[derive(Debug, Default)]
struct Drive {
    review_id: Option<Uuid>,
    results: Vec<StepOutput>,
    failure: Option<SchemaFailure>,
    feedback: Option<String>,
}

/// The orchestrating agent.
///
/// Owns no task state of its own: every step reads the task from the store,
/// applies one lifecycle trigger, and writes it back with a compare-and-set on
/// the state it read. Plans are cached in memory until the task reaches a
/// terminal state, and also travel inside routing review items, so a review can
/// be resolved by a fresh process.
pub struct Orchestrator {
    runtime: Arc<Runtime>,
    planner: Planner,
    routing: RoutingPolicy,
    output: OutputPolicy,
    plans: RwLock<HashMap<Uuid, ExecutionPlan>>,
}

impl Orchestrator {
    /// Wire an orchestrator over `runtime`. Without a `generator` every plan comes from the configured routes.
    pub fn new(
        runtime: Arc<Runtime>,
        governance: &GovernanceConfig,
        generator: Option<Arc<dyn TextGenerator>>,
    ) -> Self {
        Self {
            runtime,
            planner: Planner::new(generator, TemplatePlanner::new(governance.routes.clone())),
            routing: governance.routing_policy(),
            output: governance.output_policy(),
            plans: RwLock::new(HashMap::new()),
        }
    }

    /// The shared runtime.
    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Normalize a raw request and run it.
    pub async fn submit_value(&self, raw: serde_json::Value) -> SwitchyardResult<TaskOutcome> {
        self.submit(TaskRequest::from_value(raw)?).await
    }

    /// Create a task for the request and drive it until it finishes or parks on
    /// a human decision.
    pub async fn submit(&self, request: TaskRequest) -> SwitchyardResult<TaskOutcome> {
        let task = Task::new(request.intent.clone(), request.planning_payload())
            .with_pipeline(request.pipeline.clone());
        self.runtime.store().create_task(&task).await?;
        info!(
            task_id = %task.id,
            trace_id = %task.trace_id,
            intent = %task.intent,
            requested_by = ?request.requested_by,
            "Task submitted"
        );
        self.drive(task.id, Drive::default()).await
    }

    /// Record a human decision on a review item and resume the task it belongs to.
    ///
    /// Returns `None` for review items that belong to no task. The decision is
    /// checked against the task's lifecycle before it is recorded, so a rejected
    /// transition leaves the item unanswered.
    pub async fn resolve_review(
        &self,
        review_id: Uuid,
        action: ReviewAction,
        responder: &str,
        note: Option<String>,
    ) -> SwitchyardResult<Option<TaskOutcome>> {
        let desk = self.runtime.desk();
        let item = desk
            .get(review_id)
            .await?
            .ok_or_else(|| SwitchyardError::Review(format!("review {review_id} not found")))?;

        let Some(task_id) = item.task_id else {
            desk.respond(review_id, action, responder, note).await?;
            return Ok(None);
        };
        let task = self.load(task_id).await?;

        let trigger = if task.state.is_terminal() {
            None
        } else {
            trigger_for(action)
        };
        if let Some(trigger) = trigger {
            can_transition(task.state, trigger)?;
        }
        // Decode what the review carries before answering it, so a bad payload
        // leaves the item open.
        let mut drive = Drive::default();
        let mut restored = None;
        match (item.kind, trigger) {
            (ReviewKind::RoutingReview, Some(Trigger::Approve)) => {
                if !self.plans.read().await.contains_key(&task_id) {
                    let plan: ExecutionPlan = serde_json::from_value(item.payload["plan"].clone())?;
                    restored = Some(plan);
                }
            }
            (ReviewKind::DraftReview, Some(Trigger::Approve)) => {
                drive.results = serde_json::from_value(item.payload["results"].clone())?;
            }
            (ReviewKind::DraftReview, Some(Trigger::RequestModification)) => {
                drive.feedback = Some(note.clone().unwrap_or_else(|| "modification requested".into()));
            }
            _ => {}
        }
        desk.respond(review_id, action, responder, note).await?;

        let Some(trigger) = trigger else {
            return self.outcome(task_id, Drive::default()).await;
        };
        if let Some(plan) = restored {
            self.plans.write().await.insert(task_id, plan);
        }

        self.advance(&task, trigger, Actor::user(responder), Some(format!("review {review_id}: {action}")))
            .await?;
        self.drive(task_id, drive).await.map(Some)
    }

    /// The stored task, if any.
    pub async fn task(&self, id: Uuid) -> SwitchyardResult<Option<Task>> {
        self.runtime.store().get_task(id).await
    }

    /// The event trail of one trace, oldest first.
    pub async fn events(&self, trace_id: Uuid) -> SwitchyardResult<Vec<Event>> {
        self.runtime.store().list_events(trace_id).await
    }

    /// Rebuild a task's state from its trace's transition events.
    pub async fn replay_state(&self, trace_id: Uuid) -> SwitchyardResult<TaskState> {
        replay(&self.events(trace_id).await?)
    }

    /// The cached plan of a task that has not finished yet.
    pub async fn plan(&self, task_id: Uuid) -> Option<ExecutionPlan> {
        self.plans.read().await.get(&task_id).cloned()
    }

    /// Review items nobody has answered yet.
    pub async fn pending_reviews(&self) -> SwitchyardResult<Vec<ReviewItem>> {
        self.runtime.desk().pending().await
    }

    async fn load(&self, id: Uuid) -> SwitchyardResult<Task> {
        self.runtime
            .store()
            .get_task(id)
            .await?
            .ok_or_else(|| SwitchyardError::Store(format!("task {id} not found")))
    }

    async fn outcome(&self, task_id: Uuid, drive: Drive) -> SwitchyardResult<Option<TaskOutcome>> {
        let task = self.load(task_id).await?;
        Ok(Some(TaskOutcome {
            task_id,
            trace_id: task.trace_id,
            state: task.state,
            review_id: drive.review_id,
            results: drive.results,
            plan: None,
        }))
    }

    /// Apply one trigger: validate, compare-and-set, then record the event.
    async fn advance(
        &self,
        task: &Task,
        trigger: Trigger,
        actor: Actor,
        note: Option<String>,
    ) -> SwitchyardResult<Task> {
        let transition = TaskLifecycle::new(task.state).try_trigger(trigger)?;
        let store = self.runtime.store();
        let updated = store
            .update_task_state(task.id, transition.from, transition.to)
            .await?;

        let mut event = Event::transition(&updated, &transition, actor);
        if let Some(note) = note {
            event = event.with_note(note);
        }
        if let Err(e) = store.append_event(&event).await {
            // The state change has no event behind it, so put the old state back.
            if let Err(undo) = store
                .update_task_state(task.id, transition.to, transition.from)
                .await
            {
                error!(task_id = %task.id, error = %undo, "Failed to roll back transition");
            }
            return Err(e);
        }

        info!(
            task_id = %task.id,
            from = %transition.from,
            to = %transition.to,
            trigger = %trigger,
            "Task transition"
        );
        Ok(updated)
    }

    async fn drive(&self, task_id: Uuid, mut drive: Drive) -> SwitchyardResult<TaskOutcome> {
        loop {
            let task = self.load(task_id).await?;
            match task.state {
                TaskState::Submitted => {
                    self.advance(&task, Trigger::Start, Actor::System, None).await?;
                }
                TaskState::Reasoning => self.reason(&task, &mut drive).await?,
                TaskState::PlanGenerated => self.route(&task, &mut drive).await?,
                TaskState::Approved => {
                    self.advance(&task, Trigger::Dispatch, Actor::agent(ORCHESTRATOR_ID), None)
                        .await?;
                }
                TaskState::Dispatching => self.dispatch_plan(&task, &mut drive).await?,
                TaskState::Executing => self.govern_output(&task, &mut drive).await?,
                TaskState::SchemaFailRetry => self.after_schema_failure(&task, &mut drive).await?,
                TaskState::NeedsModification => {
                    let mut retries = task.retries;
                    retries.modification += 1;
                    let task = self
                        .runtime
                        .store()
                        .update_task(task.id, retries, task.risk_score)
                        .await?;
                    self.advance(
                        &task,
                        Trigger::Retry,
                        Actor::agent(ORCHESTRATOR_ID),
                        Some(format!("modification round {}", retries.modification)),
                    )
                    .await?;
                }
                TaskState::ApprovedOutput => {
                    self.advance(&task, Trigger::Complete, Actor::agent(ORCHESTRATOR_ID), None)
                        .await?;
                }
                TaskState::PendingReview
                | TaskState::OutputReview
                | TaskState::Completed
                | TaskState::Cancelled
                | TaskState::Rejected
                | TaskState::Escalated => {
                    info!(task_id = %task.id, state = %task.state, "Task parked");
                    let plan = if task.state.is_terminal() {
                        self.plans.write().await.remove(&task_id)
                    } else {
                        None
                    };
                    return Ok(TaskOutcome {
                        task_id,
                        trace_id: task.trace_id,
                        state: task.state,
                        review_id: drive.review_id,
                        results: drive.results,
                        plan,
                    });
                }
            }
        }
    }

    async fn reason(&self, task: &Task, drive: &mut Drive) -> SwitchyardResult<()> {
        let agents = self.runtime.registry().list_agents();
        let feedback = drive.feedback.take();
        let draft = match self.planner.plan(task, &agents, feedback.as_deref()).await {
            Ok(draft) => draft,
            Err(e) => {
                error!(task_id = %task.id, error = %e, "Planning failed");
                let item = ReviewItem::new(
                    ReviewKind::AgentEscalation,
                    format!("No plan for '{}'", task.intent),
                    ORCHESTRATOR_ID,
                )
                .with_context("planning")
                .with_reason(e.to_string())
                .with_payload(json!({"intent": task.intent, "payload": task.payload, "error": e.to_string()}))
                .with_risk(RiskLevel::High)
                .for_task(task.id);
                return self.escalate(task, item, drive).await;
            }
        };

        if let Some(reason) = &draft.degraded {
            self.runtime
                .store()
                .append_event(
                    &Event::new(EventKind::Degraded, Actor::agent(ORCHESTRATOR_ID))
                        .for_task(task)
                        .with_note(format!("planning fell back to templates: {reason}")),
                )
                .await?;
        }

        let risk = self.routing.score_plan(&draft.steps);
        let plan = ExecutionPlan::new(draft.steps, draft.source).with_risk(risk);
        let note = format!("plan {} ({}): {}", plan.id, plan.risk.score, plan.targets().join(" -> "));
        let task = self
            .runtime
            .store()
            .update_task(task.id, task.retries, Some(plan.risk.score))
            .await?;
        self.plans.write().await.insert(task.id, plan);
        self.advance(&task, Trigger::PlanReady, Actor::agent(ORCHESTRATOR_ID), Some(note))
            .await?;
        Ok(())
    }

    async fn current_plan(&self, task_id: Uuid) -> SwitchyardResult<ExecutionPlan> {
        self.plan(task_id)
            .await
            .ok_or_else(|| SwitchyardError::Store(format!("no plan in hand for task {task_id}")))
    }

    async fn route(&self, task: &Task, drive: &mut Drive) -> SwitchyardResult<()> {
        let plan = self.current_plan(task.id).await?;
        match self.routing.evaluate(&plan) {
            RoutingDecision::AutoApprove => {
                self.advance(
                    task,
                    Trigger::AutoApprove,
                    Actor::agent(ORCHESTRATOR_ID),
                    Some(format!("risk {} within {}", plan.risk.score, self.routing.threshold)),
                )
                .await?;
            }
            RoutingDecision::RequireReview { reasons } => {
                let reason = reasons.join("; ");
                let task = self
                    .advance(task, Trigger::RequestReview, Actor::agent(ORCHESTRATOR_ID), Some(reason.clone()))
                    .await?;
                let item = ReviewItem::new(
                    ReviewKind::RoutingReview,
                    format!("Approve plan for '{}'", task.intent),
                    ORCHESTRATOR_ID,
                )
                .with_context("routing")
                .with_reason(reason)
                .with_payload(json!({"plan": plan, "task_payload": task.payload}))
                .with_risk(RiskLevel::from_score(plan.risk.score))
                .for_task(task.id);
                drive.review_id = Some(self.runtime.desk().open(item).await?.id);
            }
        }
        Ok(())
    }

    async fn dispatch_plan(&self, task: &Task, drive: &mut Drive) -> SwitchyardResult<()> {
        let plan = self.current_plan(task.id).await?;
        let mut results = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let request = DispatchRequest::new(&step.agent, step.payload.clone(), ORCHESTRATOR_ID)
                .with_intent(step.intent.clone().or_else(|| Some(task.intent.clone())))
                .for_task(task);
            match self.runtime.dispatcher().dispatch(request).await {
                Ok((handoff, result)) => results.push(StepOutput {
                    agent: step.agent.clone(),
                    handoff_id: handoff.id,
                    result,
                }),
                Err(e @ (SwitchyardError::UnknownAgent(_) | SwitchyardError::Handler { .. })) => {
                    warn!(task_id = %task.id, agent = %step.agent, error = %e, "Dispatch failed, escalating");
                    let item = ReviewItem::new(
                        ReviewKind::AgentEscalation,
                        format!("Dispatch to '{}' failed", step.agent),
                        ORCHESTRATOR_ID,
                    )
                    .with_context("dispatch")
                    .with_reason(e.to_string())
                    .with_payload(json!({
                        "agent": step.agent,
                        "error": e.to_string(),
                        "step": step,
                        "completed": results,
                    }))
                    .with_risk(RiskLevel::High)
                    .for_task(task.id);
                    drive.results = results;
                    return self.escalate(task, item, drive).await;
                }
                Err(e) => return Err(e),
            }
        }

        drive.results = results;
        self.advance(
            task,
            Trigger::BeginExecution,
            Actor::agent(ORCHESTRATOR_ID),
            Some(format!("{} step(s) dispatched", drive.results.len())),
        )
        .await?;
        Ok(())
    }

    async fn govern_output(&self, task: &Task, drive: &mut Drive) -> SwitchyardResult<()> {
        if drive.results.is_empty() {
            return Err(SwitchyardError::Store(format!(
                "task {} is executing with no step results in hand",
                task.id
            )));
        }

        let store = self.runtime.store();
        let mut accepted_score = 0;
        for step in &drive.results {
            match self.output.evaluate(&step.agent, &step.result, task.retries.schema) {
                OutputVerdict::Accept { score } => accepted_score = accepted_score.max(score),
                OutputVerdict::SchemaFailure {
                    violations,
                    attempt,
                    retry,
                } => {
                    let mut retries = task.retries;
                    retries.schema = attempt;
                    let task = store.update_task(task.id, retries, task.risk_score).await?;
                    warn!(
                        task_id = %task.id,
                        agent = %step.agent,
                        attempt,
                        retry,
                        "Output failed schema check"
                    );
                    let note = format!(
                        "attempt {attempt}/{}: {}",
                        self.output.max_schema_attempts,
                        violations.join("; ")
                    );
                    drive.failure = Some(SchemaFailure {
                        agent: step.agent.clone(),
                        output: step.result.clone(),
                        violations,
                    });
                    self.advance(&task, Trigger::SchemaFail, Actor::agent(&step.agent), Some(note))
                        .await?;
                    return Ok(());
                }
                OutputVerdict::RiskExceeded { score, fired } => {
                    let task = store.update_task(task.id, task.retries, Some(score)).await?;
                    let fired_names: Vec<&str> = fired.iter().map(|r| r.name.as_str()).collect();
                    let reason = format!(
                        "risk {score} reaches threshold {}: {}",
                        self.output.threshold,
                        fired_names.join(", ")
                    );
                    let task = self
                        .advance(&task, Trigger::FlagOutput, Actor::agent(&step.agent), Some(reason.clone()))
                        .await?;
                    let item = ReviewItem::new(
                        ReviewKind::DraftReview,
                        format!("Review output of '{}'", step.agent),
                        ORCHESTRATOR_ID,
                    )
                    .with_context("output")
                    .with_reason(reason)
                    .with_payload(json!({
                        "agent": step.agent,
                        "output": step.result,
                        "fired": fired,
                        "results": drive.results,
                    }))
                    .with_risk(RiskLevel::from_score(score))
                    .for_task(task.id);
                    drive.review_id = Some(self.runtime.desk().open(item).await?.id);
                    return Ok(());
                }
            }
        }

        let task = store
            .update_task(task.id, task.retries, Some(accepted_score))
            .await?;
        self.advance(
            &task,
            Trigger::AcceptOutput,
            Actor::agent(ORCHESTRATOR_ID),
            Some(format!("risk {accepted_score}")),
        )
        .await?;
        Ok(())
    }

    async fn after_schema_failure(&self, task: &Task, drive: &mut Drive) -> SwitchyardResult<()> {
        let failure = drive.failure.take().unwrap_or_else(|| SchemaFailure {
            agent: String::from("unknown"),
            output: serde_json::Value::Null,
            violations: Vec::new(),
        });
        let max = self.output.max_schema_attempts;

        if task.retries.schema < max {
            drive.feedback = Some(failure.violations.join("; "));
            self.advance(
                task,
                Trigger::Retry,
                Actor::agent(ORCHESTRATOR_ID),
                Some(format!("schema attempt {} of {max} failed, re-planning", task.retries.schema)),
            )
            .await?;
            return Ok(());
        }

        let item = ReviewItem::new(
            ReviewKind::SchemaEscalation,
            format!(
                "'{}' output failed the schema check {} times",
                failure.agent, task.retries.schema
            ),
            ORCHESTRATOR_ID,
        )
        .with_context("output")
        .with_reason(failure.violations.join("; "))
        .with_payload(json!({
            "agent": failure.agent,
            "raw_output": failure.output,
            "violations": failure.violations,
            "attempts": task.retries.schema,
        }))
        .with_risk(RiskLevel::High)
        .for_task(task.id);
        self.escalate(task, item, drive).await
    }

    /// Move the task to `escalated` and open the review item explaining why.
    async fn escalate(&self, task: &Task, item: ReviewItem, drive: &mut Drive) -> SwitchyardResult<()> {
        let note = item.reason.clone();
        self.advance(task, Trigger::Escalate, Actor::agent(ORCHESTRATOR_ID), Some(note))
            .await?;
        self.runtime.monitor().record_escalation(ORCHESTRATOR_ID).await;
        drive.review_id = Some(self.runtime.desk().open(item).await?.id);
        Ok(())
    }
}

fn trigger_for(action: ReviewAction) -> Option<Trigger> {
    match action {
        ReviewAction::Approve => Some(Trigger::Approve),
        ReviewAction::Reject => Some(Trigger::Reject),
        ReviewAction::Cancel => Some(Trigger::Cancel),
        ReviewAction::RequestModification => Some(Trigger::RequestModification),
        ReviewAction::Acknowledge => None,
    }
}
