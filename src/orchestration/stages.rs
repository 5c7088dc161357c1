//! Background stage bodies. Each one runs with no store connection held, then commits
//! its result through a guarded transaction so a superseded run can never write.

use super::chat::{sanitize_agent_reply, NEUTRAL_REPLY};
use super::generator::{generate, GenerationJob};
use super::reconcile::{reconcile, ReconcileInput};
use super::runner::{StageKind, StageOutcome};
use super::workflow_engine::{clip, ChatPlan, GenerationPlan, ResearchPlan, WorkflowEngine};
use super::research::parse_research_output;
use crate::notify::{Notification, NotificationKind};
use crate::presentation::PresentationError;
use crate::provider::AgentRequest;
use crate::shared::ids::StepId;
use crate::store::{
    ActorKind, CommitOutcome, EventKind, FailurePayload, NewEvent, NewMessage, NewStep,
    ProviderKind, RunGuard, StepInput, StepOutput, StepStatus, StepType, Workflow,
    WorkflowStatus,
};
use serde_json::json;
use std::fs;

const REVIEW_INSTRUCTIONS: &str = "Review the research and approve or request refinements.";
const NOTIFY_PREVIEW_CHARS: usize = 280;

impl WorkflowEngine {
    pub(super) fn run_research_stage(&self, plan: ResearchPlan) -> StageOutcome {
        let request = AgentRequest {
            prompt: plan.prompt.clone(),
            session_id: plan.session.clone(),
            timeout: self.options.agent_call_timeout,
        };
        let guard = RunGuard::stage(
            plan.workflow_id,
            plan.epoch,
            plan.expected_status,
            plan.step_id,
        );
        let label = match plan.kind {
            StageKind::Refinement => "Refinement failed",
            _ => "Research failed",
        };
        let reply = match self.agent.call(&request) {
            Ok(reply) => reply,
            Err(err) => {
                return self.commit_failure(
                    &guard,
                    plan.step_id,
                    &plan.title,
                    &format!("{label}: {err}"),
                );
            }
        };

        let sections = parse_research_output(&reply.text);
        if sections.is_empty() {
            return self.commit_failure(
                &guard,
                plan.step_id,
                &plan.title,
                &format!("{label}: agent returned an empty reply"),
            );
        }
        let now = self.now();
        let committed = self.store.commit_guarded(&guard, |tx| {
            let workflow = tx.require_workflow(plan.workflow_id)?;
            let mut step = tx.require_step(plan.step_id)?;
            step.status = StepStatus::Completed;
            step.output = Some(StepOutput::Research(sections.clone()));
            tx.update_step(&step, now)?;

            let review = match tx
                .latest_step(workflow.id, StepType::HumanReview)?
                .filter(|review| review.status != StepStatus::Skipped)
            {
                Some(mut review) => {
                    review.status = StepStatus::AwaitingInput;
                    review.output = None;
                    tx.update_step(&review, now)?;
                    review
                }
                None => tx.insert_step(
                    &NewStep {
                        workflow_id: workflow.id,
                        step_type: StepType::HumanReview,
                        provider: ProviderKind::Human,
                        assignee_id: Some(workflow.owner_id),
                        status: StepStatus::AwaitingInput,
                        input: StepInput::Review {
                            instructions: REVIEW_INSTRUCTIONS.to_string(),
                        },
                    },
                    now,
                )?,
            };
            let updated = tx.set_workflow_status(workflow.id, WorkflowStatus::AwaitingReview, now)?;

            let message = match plan.kind {
                StageKind::Refinement => format!("Refinement round {} complete", plan.iteration),
                _ => "Research completed successfully".to_string(),
            };
            tx.insert_event(
                &NewEvent::new(workflow.id, EventKind::ResearchCompleted, ActorKind::Agent, message)
                    .step(step.id)
                    .metadata(json!({
                        "iteration": plan.iteration,
                        "summary_chars": sections.summary.chars().count(),
                        "outline_chars": sections.slide_outline.chars().count(),
                    })),
                now,
            )?;
            let reviewer = match review.assignee_id {
                Some(id) => tx.participant(id)?.map(|p| p.name),
                None => None,
            }
            .unwrap_or_else(|| "the requester".to_string());
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::ReviewRequested,
                    ActorKind::System,
                    format!("Review assigned to {reviewer}"),
                )
                .step(review.id),
                now,
            )?;
            Ok(updated)
        });

        match committed {
            Ok(CommitOutcome::Committed(workflow)) => {
                let mut body = if sections.summary.trim().is_empty() {
                    "Research is ready for review.".to_string()
                } else {
                    clip(sections.summary.trim(), NOTIFY_PREVIEW_CHARS)
                };
                if plan.kind == StageKind::Refinement {
                    body = format!("Refinement round {}: {body}", plan.iteration);
                }
                self.notify(&workflow, NotificationKind::ResearchComplete, body);
                StageOutcome::Committed
            }
            Ok(CommitOutcome::Discarded(reason)) => StageOutcome::Discarded(reason),
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    pub(super) fn run_generation_stage(&self, plan: GenerationPlan) -> StageOutcome {
        let guard = RunGuard::stage(
            plan.workflow_id,
            plan.epoch,
            WorkflowStatus::GeneratingPpt,
            plan.step_id,
        );
        let input = ReconcileInput {
            brief: &plan.topic,
            research: plan.research.as_ref(),
            feedback: &plan.feedback,
            chat_context: &plan.chat,
            options: plan.options.clone(),
        };
        let reconciled = reconcile(
            self.agent.as_ref(),
            &plan.session,
            self.options.reconcile_timeout,
            &input,
        );
        let spec = reconciled.spec;

        let now = self.now();
        let recorded = self.store.commit_guarded(&guard, |tx| {
            tx.insert_event(
                &NewEvent::new(
                    plan.workflow_id,
                    EventKind::GenerationReconciled,
                    ActorKind::Agent,
                    format!(
                        "Generation settings resolved: {} slides, {} tone, {} verbosity",
                        spec.slide_count, spec.tone, spec.verbosity
                    ),
                )
                .step(plan.step_id)
                .metadata(json!({
                    "source": spec.source.as_str(),
                    "slide_count": spec.slide_count,
                    "tone": spec.tone.as_str(),
                    "verbosity": spec.verbosity.as_str(),
                    "fallback_reason": reconciled.fallback_reason,
                })),
                now,
            )
        });
        match recorded {
            Ok(CommitOutcome::Committed(_)) => {}
            Ok(CommitOutcome::Discarded(reason)) => return StageOutcome::Discarded(reason),
            Err(err) => return StageOutcome::Failed(err.to_string()),
        }

        // The poll loop doubles as liveness: each heartbeat refreshes the workflow and
        // stops the loop once the run is superseded.
        let mut discarded = None;
        let mut heartbeat = || {
            match self
                .store
                .commit_guarded(&guard, |tx| tx.touch_workflow(plan.workflow_id, self.now()))
            {
                Ok(CommitOutcome::Committed(())) => true,
                Ok(CommitOutcome::Discarded(reason)) => {
                    discarded = Some(reason);
                    false
                }
                Err(err) => {
                    self.log.runtime(
                        "warn",
                        "generation.heartbeat_failed",
                        &format!("workflow_id={} error={err}", plan.workflow_id),
                    );
                    true
                }
            }
        };
        let job = GenerationJob {
            topic: &plan.topic,
            context: &plan.context,
            spec: &spec,
            now: self.now(),
        };
        let artifact = match generate(
            self.presentation.as_ref(),
            &self.options.generator,
            &job,
            &mut heartbeat,
        ) {
            Ok(artifact) => artifact,
            Err(PresentationError::Abandoned { .. }) => {
                return match discarded {
                    Some(reason) => StageOutcome::Discarded(reason),
                    None => StageOutcome::Failed("generation abandoned".to_string()),
                };
            }
            Err(err) => {
                return self.commit_failure(
                    &guard,
                    plan.step_id,
                    &plan.title,
                    &format!("Presentation generation failed: {err}"),
                );
            }
        };

        let now = self.now();
        let committed = self.store.commit_guarded(&guard, |tx| {
            let mut step = tx.require_step(plan.step_id)?;
            step.status = StepStatus::Completed;
            step.output = Some(StepOutput::Generation {
                artifact: artifact.clone(),
                spec: spec.clone(),
            });
            tx.update_step(&step, now)?;
            let updated = tx.set_workflow_status(plan.workflow_id, WorkflowStatus::Completed, now)?;
            tx.insert_event(
                &NewEvent::new(
                    plan.workflow_id,
                    EventKind::GenerationCompleted,
                    ActorKind::Agent,
                    format!("Presentation generated: {}", artifact.file_name),
                )
                .step(step.id)
                .metadata(json!({
                    "file_name": artifact.file_name,
                    "file_path": artifact.file_path.display().to_string(),
                    "file_size": artifact.file_size,
                    "sha256": artifact.sha256,
                    "task_id": artifact.task_id,
                })),
                now,
            )?;
            Ok(updated)
        });

        match committed {
            Ok(CommitOutcome::Committed(workflow)) => {
                self.notify(
                    &workflow,
                    NotificationKind::PresentationComplete,
                    format!(
                        "{} ({}) is ready.",
                        artifact.file_name, artifact.file_size_formatted
                    ),
                );
                StageOutcome::Committed
            }
            Ok(CommitOutcome::Discarded(reason)) => {
                let _ = fs::remove_file(&artifact.file_path);
                StageOutcome::Discarded(reason)
            }
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    pub(super) fn run_chat_stage(&self, plan: ChatPlan) -> StageOutcome {
        let request = AgentRequest {
            prompt: plan.prompt.clone(),
            session_id: plan.session.clone(),
            timeout: self.options.chat_timeout,
        };
        let body = match self.agent.call(&request) {
            Ok(reply) => sanitize_agent_reply(&reply.text),
            Err(err) => {
                self.log.runtime(
                    "error",
                    "chat.agent_failed",
                    &format!("workflow_id={} error={err}", plan.workflow_id),
                );
                NEUTRAL_REPLY.to_string()
            }
        };

        let now = self.now();
        let guard = RunGuard::presence(plan.workflow_id);
        let committed = self.store.commit_guarded(&guard, |tx| {
            let (message, event) = match &plan.agent {
                Some(agent) => (
                    NewMessage::from_participant(plan.workflow_id, agent, "web", body.clone()),
                    NewEvent::new(
                        plan.workflow_id,
                        EventKind::MessagePosted,
                        ActorKind::Agent,
                        format!("{} replied in chat", agent.name),
                    )
                    .by(agent),
                ),
                None => (
                    NewMessage {
                        workflow_id: plan.workflow_id,
                        sender_kind: ActorKind::Agent,
                        sender_id: None,
                        sender_name: Some("Agent".to_string()),
                        channel: "web".to_string(),
                        body: body.clone(),
                    },
                    NewEvent::new(
                        plan.workflow_id,
                        EventKind::MessagePosted,
                        ActorKind::Agent,
                        "Agent replied in chat",
                    ),
                ),
            };
            tx.insert_message(&message, now)?;
            tx.insert_event(&event.channel("web"), now)?;
            Ok(())
        });
        match committed {
            Ok(CommitOutcome::Committed(())) => StageOutcome::Committed,
            Ok(CommitOutcome::Discarded(reason)) => StageOutcome::Discarded(reason),
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    /// Records a stage failure on the guarded step and fails the workflow.
    fn commit_failure(
        &self,
        guard: &RunGuard,
        step_id: StepId,
        title: &str,
        message: &str,
    ) -> StageOutcome {
        let now = self.now();
        let committed = self.store.commit_guarded(guard, |tx| {
            let mut step = tx.require_step(step_id)?;
            let failure = FailurePayload::error(message).over(step.output.take());
            step.output = Some(StepOutput::Failure(failure));
            step.status = StepStatus::Failed;
            tx.update_step(&step, now)?;
            let updated = tx.set_workflow_status(guard.workflow_id, WorkflowStatus::Failed, now)?;
            tx.insert_event(
                &NewEvent::new(guard.workflow_id, EventKind::Failed, ActorKind::Agent, message)
                    .step(step.id),
                now,
            )?;
            Ok(updated)
        });
        match committed {
            Ok(CommitOutcome::Committed(workflow)) => {
                self.log.runtime(
                    "error",
                    "stage.run_failed",
                    &format!("workflow_id={} title={title:?} error={message}", workflow.id),
                );
                self.notify_failure(&workflow, message);
                StageOutcome::Committed
            }
            Ok(CommitOutcome::Discarded(reason)) => StageOutcome::Discarded(reason),
            Err(err) => StageOutcome::Failed(err.to_string()),
        }
    }

    pub(super) fn notify_failure(&self, workflow: &Workflow, message: &str) {
        self.notify(workflow, NotificationKind::RunFailed, message.to_string());
    }

    /// Hands the notification to the dispatcher; delivery never blocks the caller.
    fn notify(&self, workflow: &Workflow, kind: NotificationKind, body: String) {
        let title = match kind {
            NotificationKind::ResearchComplete => format!("Research ready: {}", workflow.title),
            NotificationKind::PresentationComplete => {
                format!("Presentation ready: {}", workflow.title)
            }
            NotificationKind::RunFailed => format!("Run failed: {}", workflow.title),
        };
        self.notifier.dispatch(Notification {
            workflow_id: workflow.id,
            kind,
            title,
            body,
        });
    }
}
