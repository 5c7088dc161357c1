use super::chat::{
    build_chat_context, build_generation_context, chat_reply_prompt, refinement_feedback,
    GenerationContext, GENERATION_CHAT_LINES, REFINEMENT_FEEDBACK_ITEMS,
};
use super::collaboration::{
    consensus_reached, infer_workflow_type, initial_step_type, wants_research,
    AGENT_KICKOFF_PROMPT,
};
use super::generator::GeneratorConfig;
use super::research::{refinement_prompt, research_prompt};
use super::runner::{spawn_stage, StageKind, StageOutcome, TaskHandle};
use super::stale::{force_fail, is_stale, ForceFail};
use super::OrchestratorError;
use crate::config::{ConfigError, Settings};
use crate::notify::NotificationDispatcher;
use crate::presentation::PresentationService;
use crate::provider::AgentGateway;
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::ids::{generate_session_id, ParticipantId, SessionId, StepId, WorkRequestId, WorkflowId};
use crate::shared::logging::EngineLog;
use crate::store::{
    ActorKind, ApprovalStatus, EventKind, GenerationOptions, NewEvent, NewMessage, NewStep,
    NewWorkflow, Participant, ProviderKind, ResearchSections, ReviewDecision, StepInput,
    StepOutput, StepStatus, StepType, StoreTx, WorkRequest, WorkRequestStatus, Workflow,
    WorkflowApproval, WorkflowEvent, WorkflowMessage, WorkflowStatus, WorkflowStep,
    WorkflowStore, WorkflowType,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const REFINED_EVENT_FEEDBACK_CHARS: usize = 200;
const REFINEMENT_EVENT_PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub agent_call_timeout: Duration,
    pub reconcile_timeout: Duration,
    pub chat_timeout: Duration,
    pub chat_context_messages: usize,
    pub stale_timeout_seconds: u64,
    pub generator: GeneratorConfig,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            agent_call_timeout: Duration::from_secs(settings.agent.call_timeout_seconds),
            reconcile_timeout: Duration::from_secs(settings.agent.reconcile_timeout_seconds),
            chat_timeout: Duration::from_secs(settings.agent.chat_timeout_seconds),
            chat_context_messages: settings.agent.chat_context_messages,
            stale_timeout_seconds: settings.effective_stale_timeout_seconds(),
            generator: GeneratorConfig {
                output_dir: settings.artifacts_dir()?,
                poll_interval: Duration::from_millis(settings.presentation.poll_interval_ms),
                poll_deadline: Duration::from_secs(settings.presentation.poll_deadline_seconds),
            },
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewAction {
    Approve { options: GenerationOptions },
    Refine { feedback: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionAction {
    MarkReady,
    Reopen,
}

/// Result of an operation that may have handed work to a background stage.
#[derive(Debug)]
pub struct Dispatch {
    pub workflow: Workflow,
    pub task: Option<TaskHandle>,
}

impl Dispatch {
    fn settled(workflow: Workflow) -> Self {
        Self {
            workflow,
            task: None,
        }
    }

    /// Blocks until the background stage (if any) has finished.
    pub fn wait(self) -> Option<StageOutcome> {
        self.task.map(TaskHandle::join)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowDetail {
    pub workflow: Workflow,
    pub participants: Vec<Participant>,
    pub steps: Vec<WorkflowStep>,
    pub events: Vec<WorkflowEvent>,
    pub messages: Vec<WorkflowMessage>,
    pub approvals: Vec<WorkflowApproval>,
}

/// Everything a research or refinement stage needs once the caller has returned.
#[derive(Debug, Clone)]
pub(super) struct ResearchPlan {
    pub(super) kind: StageKind,
    pub(super) workflow_id: WorkflowId,
    pub(super) title: String,
    pub(super) epoch: i64,
    pub(super) expected_status: WorkflowStatus,
    pub(super) step_id: StepId,
    pub(super) iteration: u32,
    pub(super) session: SessionId,
    pub(super) prompt: String,
}

#[derive(Debug, Clone)]
pub(super) struct GenerationPlan {
    pub(super) workflow_id: WorkflowId,
    pub(super) title: String,
    pub(super) epoch: i64,
    pub(super) step_id: StepId,
    pub(super) session: SessionId,
    pub(super) topic: String,
    pub(super) context: String,
    pub(super) research: Option<ResearchSections>,
    pub(super) feedback: Vec<String>,
    pub(super) chat: String,
    pub(super) options: GenerationOptions,
}

#[derive(Debug, Clone)]
pub(super) struct ChatPlan {
    pub(super) workflow_id: WorkflowId,
    pub(super) session: SessionId,
    pub(super) prompt: String,
    pub(super) agent: Option<Participant>,
}

enum Stage {
    Research(ResearchPlan),
    Generation(GenerationPlan),
    Chat(ChatPlan),
}

/// The workflow state machine. Every operation validates and records its transition in
/// one store transaction, then hands any slow work to a background stage.
#[derive(Clone)]
pub struct WorkflowEngine {
    pub(super) store: WorkflowStore,
    pub(super) agent: Arc<dyn AgentGateway>,
    pub(super) presentation: Arc<dyn PresentationService>,
    pub(super) notifier: NotificationDispatcher,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) log: EngineLog,
    pub(super) options: EngineOptions,
}

impl WorkflowEngine {
    pub fn new(
        store: WorkflowStore,
        agent: Arc<dyn AgentGateway>,
        presentation: Arc<dyn PresentationService>,
        notifier: NotificationDispatcher,
        log: EngineLog,
        options: EngineOptions,
    ) -> Self {
        Self {
            store,
            agent,
            presentation,
            notifier,
            clock: Arc::new(SystemClock),
            log,
            options,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &WorkflowStore {
        &self.store
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Blocks until notifications already handed off have been delivered or given up.
    /// Operations never wait on delivery; a process that is about to exit calls this.
    pub fn flush_notifications(&self) {
        self.notifier.flush();
    }

    pub(super) fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn register_participant(
        &self,
        name: &str,
        is_agent: bool,
        slack_user_id: Option<&str>,
    ) -> Result<Participant, OrchestratorError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(OrchestratorError::MissingField("name"));
        }
        let now = self.now();
        self.store.write(|tx| {
            Ok(tx.insert_participant(name, is_agent, slack_user_id, now)?)
        })
    }

    pub fn participants(&self) -> Result<Vec<Participant>, OrchestratorError> {
        self.store.read(|tx| Ok(tx.participants()?))
    }

    pub fn submit_work_request(
        &self,
        requester_id: ParticipantId,
        title: &str,
        description: &str,
        capability_tags: &[String],
        parent_workflow_id: Option<WorkflowId>,
    ) -> Result<WorkRequest, OrchestratorError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(OrchestratorError::MissingField("title"));
        }
        let now = self.now();
        self.store.write(|tx| {
            find_participant(tx, requester_id)?;
            if let Some(parent) = parent_workflow_id {
                find_workflow(tx, parent)?;
            }
            Ok(tx.insert_work_request(
                requester_id,
                parent_workflow_id,
                title,
                description.trim(),
                capability_tags,
                now,
            )?)
        })
    }

    /// Creates a presentation workflow for `topic` and starts research right away.
    pub fn create_research_workflow(
        &self,
        owner_id: ParticipantId,
        topic: &str,
    ) -> Result<Dispatch, OrchestratorError> {
        let topic = topic.trim().to_string();
        if topic.is_empty() {
            return Err(OrchestratorError::MissingField("topic"));
        }
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let owner = find_participant(tx, owner_id)?;
            let workflow = tx.insert_workflow(
                &NewWorkflow {
                    owner_id,
                    workflow_type: WorkflowType::PptGeneration,
                    title: topic.clone(),
                    description: String::new(),
                    status: WorkflowStatus::Pending,
                    parent_workflow_id: None,
                    work_request_id: None,
                },
                now,
            )?;
            let session = ensure_session(tx, &workflow)?;
            let step = tx.insert_step(
                &NewStep {
                    workflow_id: workflow.id,
                    step_type: StepType::AgentResearch,
                    provider: ProviderKind::Agent,
                    assignee_id: None,
                    status: StepStatus::Pending,
                    input: StepInput::Research {
                        topic: topic.clone(),
                        description: String::new(),
                        retry: false,
                    },
                },
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::Created,
                    ActorKind::Human,
                    format!("Workflow created: {topic}"),
                )
                .by(&owner)
                .channel("web"),
                now,
            )?;
            let plan = begin_research(tx, &workflow, step, session, &topic, "", now)?;
            Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, plan))
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=create_research_workflow epoch={}", workflow.run_epoch),
        );
        self.launch(workflow, Some(Stage::Research(stage)))
    }

    /// Marketplace handshake: turns an open work request into a collaboration workflow
    /// between the requester and `collaborator_id`.
    pub fn create_collaboration(
        &self,
        request_id: WorkRequestId,
        collaborator_id: ParticipantId,
    ) -> Result<Dispatch, OrchestratorError> {
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let request = tx
                .work_request(request_id)?
                .ok_or(OrchestratorError::NotFound {
                    entity: "work request",
                    id: request_id.get(),
                })?;
            if request.status != WorkRequestStatus::Open {
                return Err(OrchestratorError::RequestNotOpen {
                    request_id,
                    status: request.status,
                });
            }
            let requester = find_participant(tx, request.requester_id)?;
            let collaborator = find_participant(tx, collaborator_id)?;
            if collaborator.id == requester.id {
                return Err(OrchestratorError::InvalidField {
                    field: "collaborator",
                    reason: "the requester cannot collaborate on their own request".to_string(),
                });
            }

            tx.set_work_request_status(request_id, WorkRequestStatus::Assigned, now)?;
            let workflow_type =
                infer_workflow_type(&request.title, &request.description, &request.capability_tags);
            let requires_research =
                collaborator.is_agent && wants_research(&request.capability_tags);
            let workflow = tx.insert_workflow(
                &NewWorkflow {
                    owner_id: requester.id,
                    workflow_type,
                    title: request.title.clone(),
                    description: request.description.clone(),
                    status: WorkflowStatus::Pending,
                    parent_workflow_id: request.parent_workflow_id,
                    work_request_id: Some(request_id),
                },
                now,
            )?;
            let session = ensure_session(tx, &workflow)?;
            let topic = if request.description.trim().is_empty() {
                request.title.clone()
            } else {
                request.description.trim().to_string()
            };
            let step = tx.insert_step(
                &NewStep {
                    workflow_id: workflow.id,
                    step_type: initial_step_type(&collaborator, workflow_type),
                    provider: if collaborator.is_agent {
                        ProviderKind::Agent
                    } else {
                        ProviderKind::Human
                    },
                    assignee_id: Some(collaborator.id),
                    status: StepStatus::Pending,
                    input: StepInput::Collaboration {
                        topic,
                        title: request.title.clone(),
                        description: request.description.clone(),
                        workflow_type,
                        request_id: Some(request_id),
                        requires_research,
                    },
                },
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::Created,
                    ActorKind::Human,
                    format!(
                        "Handshake complete! {} is starting work on: {}",
                        collaborator.name, request.title
                    ),
                )
                .by(&requester)
                .channel("web"),
                now,
            )?;

            tx.set_step_status(step.id, StepStatus::InProgress, now)?;
            tx.set_workflow_status(workflow.id, WorkflowStatus::Collaborating, now)?;
            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    format!(
                        "{} and {} are now connected. Use this chat to collaborate, refine, and \
                         confirm completion.",
                        requester.name, collaborator.name
                    ),
                ),
                now,
            )?;

            let mut stage = None;
            if requires_research {
                tx.insert_message(
                    &NewMessage::system(
                        workflow.id,
                        "Research has not started yet. Let the agent propose a first-step plan \
                         in chat, then the requester uses 'Start Agent Research' when ready.",
                    ),
                    now,
                )?;
                let transcript = build_chat_context(
                    &tx.recent_messages(workflow.id, self.options.chat_context_messages)?,
                    self.options.chat_context_messages,
                );
                stage = Some(Stage::Chat(ChatPlan {
                    workflow_id: workflow.id,
                    session,
                    prompt: chat_reply_prompt(&request.description, &transcript, AGENT_KICKOFF_PROMPT),
                    agent: Some(collaborator.clone()),
                }));
            }
            if !collaborator.is_agent {
                tx.upsert_approval(workflow.id, requester.id, ApprovalStatus::Pending, now)?;
                tx.upsert_approval(workflow.id, collaborator.id, ApprovalStatus::Pending, now)?;
            }
            Ok((tx.require_workflow(workflow.id)?, stage))
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!(
                "op=create_collaboration request_id={request_id} collaborator_id={collaborator_id} type={}",
                workflow.workflow_type
            ),
        );
        self.launch(workflow, stage)
    }

    /// Owner-initiated research from a collaboration chat.
    pub fn start_research(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
    ) -> Result<Dispatch, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            require_owner(&workflow, &actor, "Only the requester can start research")?;
            let steps = tx.steps(workflow.id)?;
            if !has_agent_participant(tx, &steps)? {
                return Err(OrchestratorError::NoAgentParticipant(workflow.id));
            }
            if steps.iter().any(|step| {
                step.step_type == StepType::AgentResearch
                    && (step.status.is_active() || step.status == StepStatus::Completed)
            }) {
                return Err(OrchestratorError::ResearchAlreadyStarted(workflow.id));
            }
            require_status(&workflow, "start research", &[WorkflowStatus::Collaborating])?;
            if let Some(active) = tx.active_step(workflow.id)? {
                tx.set_step_status(active.id, StepStatus::Completed, now)?;
            }

            let (focus, context) = self.research_context(tx, &workflow, &steps)?;
            let session = ensure_session(tx, &workflow)?;
            let step = tx.insert_step(
                &NewStep {
                    workflow_id: workflow.id,
                    step_type: StepType::AgentResearch,
                    provider: ProviderKind::Agent,
                    assignee_id: None,
                    status: StepStatus::Pending,
                    input: StepInput::Research {
                        topic: focus.clone(),
                        description: context.clone(),
                        retry: false,
                    },
                },
                now,
            )?;
            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    "Requester approved the plan. Agent research is starting now.",
                ),
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::ResearchStarted,
                    ActorKind::Human,
                    "Requester approved and started agent research from collaboration chat",
                )
                .by(&actor)
                .channel("web")
                .step(step.id),
                now,
            )?;
            let plan = begin_research(tx, &workflow, step, session, &focus, &context, now)?;
            Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, plan))
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=start_research epoch={}", workflow.run_epoch),
        );
        self.launch(workflow, Some(Stage::Research(stage)))
    }

    pub fn submit_review(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
        action: ReviewAction,
    ) -> Result<Dispatch, OrchestratorError> {
        if let ReviewAction::Refine { feedback } = &action {
            if feedback.trim().is_empty() {
                return Err(OrchestratorError::MissingField("feedback"));
            }
        }
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            match &action {
                ReviewAction::Approve { .. } => {
                    require_status(&workflow, "approve", &[WorkflowStatus::AwaitingReview])?
                }
                ReviewAction::Refine { .. } => require_status(
                    &workflow,
                    "refine",
                    &[WorkflowStatus::AwaitingReview, WorkflowStatus::Completed],
                )?,
            }
            let research_step = latest_research_with_output(tx, workflow.id)?
                .ok_or(OrchestratorError::MissingResearch(workflow.id))?;
            let review_step = tx.latest_step(workflow.id, StepType::HumanReview)?;
            if let Some(assignee) = review_step.as_ref().and_then(|step| step.assignee_id) {
                if assignee != actor.id {
                    return Err(OrchestratorError::Forbidden(
                        "Only the assigned reviewer can submit this review".to_string(),
                    ));
                }
            }

            match action {
                ReviewAction::Approve { options } => {
                    if let Some(mut review) = review_step {
                        review.status = StepStatus::Completed;
                        review.output = Some(StepOutput::Review {
                            decision: ReviewDecision::Approve,
                            feedback: None,
                        });
                        tx.update_step(&review, now)?;
                    }
                    tx.insert_event(
                        &NewEvent::new(
                            workflow.id,
                            EventKind::Approved,
                            ActorKind::Human,
                            format!("Research approved by {}", actor.name),
                        )
                        .by(&actor)
                        .channel("web"),
                        now,
                    )?;
                    let plan =
                        self.begin_generation(tx, &workflow, Some(&research_step), options, None, now)?;
                    Ok::<_, OrchestratorError>((
                        tx.require_workflow(workflow.id)?,
                        Stage::Generation(plan),
                    ))
                }
                ReviewAction::Refine { feedback } => {
                    let feedback = feedback.trim().to_string();
                    let was_completed = workflow.status == WorkflowStatus::Completed;
                    if was_completed {
                        if let Some(generation) =
                            tx.latest_step(workflow.id, StepType::AgentGeneration)?
                        {
                            if generation.status == StepStatus::Completed {
                                tx.set_step_status(generation.id, StepStatus::Pending, now)?;
                            }
                        }
                        reassign_linked_request(tx, &workflow, now)?;
                    }
                    if let Some(mut review) = review_step {
                        review.status = StepStatus::Completed;
                        review.feedback = Some(feedback.clone());
                        review.output = Some(StepOutput::Review {
                            decision: ReviewDecision::Refine,
                            feedback: Some(feedback.clone()),
                        });
                        tx.update_step(&review, now)?;
                    }
                    tx.insert_event(
                        &NewEvent::new(
                            workflow.id,
                            EventKind::Refined,
                            ActorKind::Human,
                            format!(
                                "Refinement requested by {}: {}",
                                actor.name,
                                clip(&feedback, REFINED_EVENT_FEEDBACK_CHARS)
                            ),
                        )
                        .by(&actor)
                        .channel("web")
                        .metadata(json!({ "feedback": feedback })),
                        now,
                    )?;
                    if was_completed {
                        tx.insert_event(
                            &NewEvent::new(
                                workflow.id,
                                EventKind::Reopened,
                                ActorKind::Human,
                                format!(
                                    "{} reopened the workflow for further refinement",
                                    actor.name
                                ),
                            )
                            .by(&actor)
                            .channel("web"),
                            now,
                        )?;
                    }
                    let plan = begin_refinement(tx, &workflow, research_step, &feedback, now)?;
                    Ok((tx.require_workflow(workflow.id)?, Stage::Research(plan)))
                }
            }
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!(
                "op=submit_review status={} epoch={}",
                workflow.status, workflow.run_epoch
            ),
        );
        self.launch(workflow, Some(stage))
    }

    /// Records a chat line. Human messages may trigger an agent reply in the background.
    pub fn post_message(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
        text: &str,
        ask_agent: Option<bool>,
    ) -> Result<Dispatch, OrchestratorError> {
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(OrchestratorError::MissingField("message"));
        }
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            tx.insert_message(
                &NewMessage::from_participant(workflow.id, &actor, "web", text.clone()),
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::MessagePosted,
                    actor.actor_kind(),
                    format!("{} posted a message", actor.name),
                )
                .by(&actor)
                .channel("web"),
                now,
            )?;

            let steps = tx.steps(workflow.id)?;
            let has_agent = has_agent_participant(tx, &steps)?;
            let mut stage = None;
            if ask_agent.unwrap_or(has_agent) && has_agent && !actor.is_agent {
                let session = ensure_session(tx, &workflow)?;
                let transcript = build_chat_context(
                    &tx.recent_messages(workflow.id, self.options.chat_context_messages)?,
                    self.options.chat_context_messages,
                );
                let description = request_description(&workflow, &steps);
                stage = Some(Stage::Chat(ChatPlan {
                    workflow_id: workflow.id,
                    session,
                    prompt: chat_reply_prompt(&description, &transcript, &text),
                    agent: agent_participant(tx, &steps)?,
                }));
            }
            Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, stage))
        })?;
        self.launch(workflow, stage)
    }

    /// Readiness flags for collaboration workflows; completes on human consensus.
    pub fn mark_completion(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
        action: CompletionAction,
    ) -> Result<Workflow, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let (workflow, completed) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            if actor.is_agent {
                return Err(OrchestratorError::Forbidden(
                    "Agents cannot mark human workflow completion".to_string(),
                ));
            }
            if tx.approvals(workflow.id)?.is_empty()
                && !workflow.workflow_type.uses_collaborative_completion()
            {
                return Err(OrchestratorError::NotCollaborative(workflow.id));
            }
            require_status(
                &workflow,
                "mark completion",
                &[WorkflowStatus::Collaborating, WorkflowStatus::Completed],
            )?;

            let (status, kind, message) = match action {
                CompletionAction::MarkReady => (
                    ApprovalStatus::Ready,
                    EventKind::CompletionMarked,
                    format!("{} marked this collaboration as ready", actor.name),
                ),
                CompletionAction::Reopen => (
                    ApprovalStatus::Pending,
                    EventKind::Reopened,
                    format!("{} reopened the collaboration", actor.name),
                ),
            };
            tx.upsert_approval(workflow.id, actor.id, status, now)?;
            tx.insert_event(
                &NewEvent::new(workflow.id, kind, ActorKind::Human, message)
                    .by(&actor)
                    .channel("web"),
                now,
            )?;

            let participants = tx.workflow_participants(workflow.id)?;
            let approvals = tx.approvals(workflow.id)?;
            if consensus_reached(&participants, &approvals) {
                if let Some(request_id) = workflow.work_request_id {
                    tx.set_work_request_status(request_id, WorkRequestStatus::Completed, now)?;
                }
                tx.set_workflow_status(workflow.id, WorkflowStatus::Completed, now)?;
                if let Some(active) = tx.active_step(workflow.id)? {
                    tx.set_step_status(active.id, StepStatus::Completed, now)?;
                }
                tx.insert_message(
                    &NewMessage::system(
                        workflow.id,
                        "All human participants marked ready. Workflow marked as completed.",
                    ),
                    now,
                )?;
                tx.insert_event(
                    &NewEvent::new(
                        workflow.id,
                        EventKind::Approved,
                        ActorKind::System,
                        "Collaboration approved by all human participants",
                    )
                    .channel("web"),
                    now,
                )?;
                Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, true))
            } else {
                reassign_linked_request(tx, &workflow, now)?;
                let workflow =
                    tx.set_workflow_status(workflow.id, WorkflowStatus::Collaborating, now)?;
                Ok((workflow, false))
            }
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=mark_completion actor_id={actor_id} consensus={completed}"),
        );
        Ok(workflow)
    }

    /// Owner-initiated generation from the chat, any research and explicit instructions.
    pub fn generate_from_chat(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
        instructions: Option<&str>,
    ) -> Result<Dispatch, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let instructions = instructions
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let (workflow, stage) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            require_owner(&workflow, &actor, "Only the requester can start generation")?;
            if workflow.status == WorkflowStatus::GeneratingPpt {
                return Err(OrchestratorError::AlreadyGenerating(workflow.id));
            }
            if !workflow.status.can_transition_to(WorkflowStatus::GeneratingPpt) {
                return Err(OrchestratorError::InvalidStatus {
                    workflow_id: workflow.id,
                    action: "generate",
                    status: workflow.status,
                });
            }
            let steps = tx.steps(workflow.id)?;
            if !has_agent_participant(tx, &steps)? {
                return Err(OrchestratorError::NoAgentParticipant(workflow.id));
            }

            let research_step = latest_research_with_output(tx, workflow.id)?;
            let focus = primary_focus(&workflow, &steps);
            let chat = build_chat_context(
                &tx.recent_messages(workflow.id, self.options.chat_context_messages)?,
                self.options.chat_context_messages,
            );
            let research_context = match research_step.as_ref() {
                Some(step) => build_generation_context(&GenerationContext {
                    research: step.output.as_ref().and_then(StepOutput::research_sections),
                    feedback: &refinement_feedback(&tx.events(workflow.id)?, REFINEMENT_FEEDBACK_ITEMS),
                    chat: "",
                    primary_focus: &focus,
                }),
                None => String::new(),
            };
            let mut parts = Vec::new();
            if !research_context.is_empty() {
                parts.push(research_context);
            }
            if !focus.is_empty() {
                parts.push(format!("Requester brief:\n{focus}"));
            }
            if let Some(extra) = &instructions {
                parts.push(format!("Additional generation instructions:\n{extra}"));
            }
            if !chat.is_empty() {
                parts.push(format!("Chat context:\n{chat}"));
            }
            let context = if parts.is_empty() {
                workflow.title.clone()
            } else {
                parts.join("\n\n")
            };

            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    format!(
                        "{} requested presentation generation from workflow chat context.",
                        actor.name
                    ),
                ),
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::GenerationRequested,
                    ActorKind::Human,
                    format!("{} requested presentation generation from collaboration chat", actor.name),
                )
                .by(&actor)
                .channel("web"),
                now,
            )?;
            let options = GenerationOptions {
                instructions,
                ..GenerationOptions::default()
            };
            let plan = self.begin_generation(
                tx,
                &workflow,
                research_step.as_ref(),
                options,
                Some(context),
                now,
            )?;
            Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, plan))
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=generate_from_chat epoch={}", workflow.run_epoch),
        );
        self.launch(workflow, Some(Stage::Generation(stage)))
    }

    /// Cooperative cancellation: the in-flight stage keeps running but can no longer commit.
    pub fn cancel_run(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
        reason: Option<&str>,
    ) -> Result<Workflow, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let workflow = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            require_owner(&workflow, &actor, "Only the requester can cancel an active run")?;
            if !workflow.status.is_running() {
                return Err(OrchestratorError::InvalidStatus {
                    workflow_id: workflow.id,
                    action: "cancel",
                    status: workflow.status,
                });
            }
            Ok::<_, OrchestratorError>(force_fail(
                tx,
                &workflow,
                ForceFail::Cancelled { by: &actor, reason },
                now,
            )?)
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=cancel_run epoch={}", workflow.run_epoch),
        );
        Ok(workflow)
    }

    /// Restarts a failed run on a fresh step: generation if that is what failed, research otherwise.
    pub fn retry_run(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
    ) -> Result<Dispatch, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        let (workflow, stage) = self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_participant_of(tx, &workflow, &actor)?;
            require_owner(&workflow, &actor, "Only the requester can retry a failed run")?;
            require_status(&workflow, "retry", &[WorkflowStatus::Failed])?;
            let steps = tx.steps(workflow.id)?;
            if !has_agent_participant(tx, &steps)? {
                return Err(OrchestratorError::NoAgentParticipant(workflow.id));
            }

            let failed_generation = tx
                .latest_step(workflow.id, StepType::AgentGeneration)?
                .filter(|step| step.status == StepStatus::Failed);
            if let Some(failed) = failed_generation {
                let research_step = latest_research_with_output(tx, workflow.id)?
                    .ok_or(OrchestratorError::MissingResearch(workflow.id))?;
                let options = match &failed.input {
                    StepInput::Generation { options, .. } => options.clone(),
                    _ => GenerationOptions::default(),
                };
                tx.insert_message(
                    &NewMessage::system(
                        workflow.id,
                        format!(
                            "{} retried presentation generation after a failed/stalled run.",
                            actor.name
                        ),
                    ),
                    now,
                )?;
                tx.insert_event(
                    &NewEvent::new(
                        workflow.id,
                        EventKind::GenerationRequested,
                        ActorKind::Human,
                        format!("{} retried presentation generation", actor.name),
                    )
                    .by(&actor)
                    .channel("web"),
                    now,
                )?;
                let plan =
                    self.begin_generation(tx, &workflow, Some(&research_step), options, None, now)?;
                return Ok((tx.require_workflow(workflow.id)?, Stage::Generation(plan)));
            }

            let (focus, context) = self.research_context(tx, &workflow, &steps)?;
            let session = ensure_session(tx, &workflow)?;
            let step = tx.insert_step(
                &NewStep {
                    workflow_id: workflow.id,
                    step_type: StepType::AgentResearch,
                    provider: ProviderKind::Agent,
                    assignee_id: None,
                    status: StepStatus::Pending,
                    input: StepInput::Research {
                        topic: focus.clone(),
                        description: context.clone(),
                        retry: true,
                    },
                },
                now,
            )?;
            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    format!(
                        "{} retried agent research after a failed/stalled run.",
                        actor.name
                    ),
                ),
                now,
            )?;
            tx.insert_event(
                &NewEvent::new(
                    workflow.id,
                    EventKind::ResearchStarted,
                    ActorKind::Human,
                    format!("{} retried agent research", actor.name),
                )
                .by(&actor)
                .channel("web")
                .step(step.id),
                now,
            )?;
            let plan = begin_research(tx, &workflow, step, session, &focus, &context, now)?;
            Ok::<_, OrchestratorError>((tx.require_workflow(workflow.id)?, Stage::Research(plan)))
        })?;
        self.log.record(
            now,
            workflow.id,
            &format!("op=retry_run epoch={}", workflow.run_epoch),
        );
        self.launch(workflow, Some(stage))
    }

    pub fn workflow(&self, workflow_id: WorkflowId) -> Result<Workflow, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        self.store.read(|tx| find_workflow(tx, workflow_id))
    }

    pub fn workflow_detail(
        &self,
        workflow_id: WorkflowId,
        viewer_id: ParticipantId,
    ) -> Result<WorkflowDetail, OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        self.store.read(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let viewer = find_participant(tx, viewer_id)?;
            require_participant_of(tx, &workflow, &viewer)?;
            Ok(WorkflowDetail {
                participants: tx.workflow_participants(workflow.id)?,
                steps: tx.steps(workflow.id)?,
                events: tx.events(workflow.id)?,
                messages: tx.messages(workflow.id)?,
                approvals: tx.approvals(workflow.id)?,
                workflow,
            })
        })
    }

    pub fn list_workflows(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Workflow>, OrchestratorError> {
        self.sweep_stale_runs()?;
        self.store.read(|tx| {
            find_participant(tx, participant_id)?;
            Ok(tx.workflows_for_participant(participant_id)?)
        })
    }

    pub fn delete_workflow(
        &self,
        workflow_id: WorkflowId,
        actor_id: ParticipantId,
    ) -> Result<(), OrchestratorError> {
        self.sweep_workflow(workflow_id)?;
        let now = self.now();
        self.store.write(|tx| {
            let workflow = find_workflow(tx, workflow_id)?;
            let actor = find_participant(tx, actor_id)?;
            require_owner(&workflow, &actor, "Only the workflow owner can delete this workflow")?;
            if workflow.status.is_running() {
                return Err(OrchestratorError::InvalidStatus {
                    workflow_id: workflow.id,
                    action: "delete",
                    status: workflow.status,
                });
            }
            tx.delete_workflow(workflow.id)?;
            Ok(())
        })?;
        self.log.record(now, workflow_id, "op=delete_workflow");
        Ok(())
    }

    /// Force-fails every running workflow that has been idle past the stale timeout.
    pub fn sweep_stale_runs(&self) -> Result<Vec<Workflow>, OrchestratorError> {
        let running = self.store.read(|tx| Ok::<_, OrchestratorError>(tx.running_workflows()?))?;
        let mut failed = Vec::new();
        for workflow in running {
            if let Some(updated) = self.sweep_workflow(workflow.id)? {
                failed.push(updated);
            }
        }
        Ok(failed)
    }

    /// Stale-run check for one workflow; returns the workflow when it was force-failed.
    pub(super) fn sweep_workflow(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Option<Workflow>, OrchestratorError> {
        let now = self.now();
        let timeout = self.options.stale_timeout_seconds;
        let failed = self.store.write(|tx| {
            let Some(workflow) = tx.workflow(workflow_id)? else {
                return Ok::<_, OrchestratorError>(None);
            };
            if !is_stale(&workflow, now, timeout) {
                return Ok(None);
            }
            let previous = (workflow.status, now - workflow.updated_at);
            let updated = force_fail(
                tx,
                &workflow,
                ForceFail::TimedOut {
                    timeout_seconds: timeout,
                },
                now,
            )?;
            Ok(Some((previous, updated)))
        })?;
        let Some(((previous, idle_secs), updated)) = failed else {
            return Ok(None);
        };
        self.log.record(
            now,
            workflow_id,
            &format!(
                "op=stale_fail status={previous} idle_secs={idle_secs} timeout_seconds={timeout} epoch={}",
                updated.run_epoch
            ),
        );
        self.notify_failure(&updated, &super::stale::stale_message(previous, timeout));
        Ok(Some(updated))
    }

    fn research_context(
        &self,
        tx: &StoreTx<'_>,
        workflow: &Workflow,
        steps: &[WorkflowStep],
    ) -> Result<(String, String), OrchestratorError> {
        let description = request_description(workflow, steps);
        let chat = build_chat_context(
            &tx.recent_messages(workflow.id, self.options.chat_context_messages)?,
            self.options.chat_context_messages,
        );
        let mut parts = Vec::new();
        if !description.is_empty() {
            parts.push(description.clone());
        }
        if !chat.is_empty() {
            parts.push(format!("Collaboration context:\n{chat}"));
        }
        let focus = if description.is_empty() {
            workflow.title.trim().to_string()
        } else {
            description
        };
        Ok((focus, parts.join("\n\n")))
    }

    /// Moves the workflow into `generating_ppt` and prepares the generation step. A
    /// reopened (pending) generation step is reused; failed steps never are.
    fn begin_generation(
        &self,
        tx: &StoreTx<'_>,
        workflow: &Workflow,
        research_step: Option<&WorkflowStep>,
        options: GenerationOptions,
        context: Option<String>,
        now: i64,
    ) -> Result<GenerationPlan, OrchestratorError> {
        let steps = tx.steps(workflow.id)?;
        let focus = primary_focus(workflow, &steps);
        let research = research_step
            .and_then(|step| step.output.as_ref())
            .and_then(StepOutput::research_sections)
            .cloned();
        let feedback = refinement_feedback(&tx.events(workflow.id)?, REFINEMENT_FEEDBACK_ITEMS);
        let chat = build_chat_context(
            &tx.recent_messages(workflow.id, GENERATION_CHAT_LINES)?,
            GENERATION_CHAT_LINES,
        );
        let context = context.unwrap_or_else(|| {
            build_generation_context(&GenerationContext {
                research: research.as_ref(),
                feedback: &feedback,
                chat: &chat,
                primary_focus: &focus,
            })
        });
        let session = ensure_session(tx, workflow)?;

        tx.set_workflow_status(workflow.id, WorkflowStatus::GeneratingPpt, now)?;
        let epoch = tx.advance_epoch(workflow.id, now)?;
        let input = StepInput::Generation {
            topic: focus.clone(),
            context: context.clone(),
            options: options.clone(),
            research_step_id: research_step.map(|step| step.id),
        };
        let reopened = tx
            .latest_step(workflow.id, StepType::AgentGeneration)?
            .filter(|step| step.status == StepStatus::Pending);
        let step = match reopened {
            Some(mut step) => {
                step.input = input;
                step.status = StepStatus::InProgress;
                step.output = None;
                tx.update_step(&step, now)?;
                step
            }
            None => tx.insert_step(
                &NewStep {
                    workflow_id: workflow.id,
                    step_type: StepType::AgentGeneration,
                    provider: ProviderKind::Agent,
                    assignee_id: None,
                    status: StepStatus::InProgress,
                    input,
                },
                now,
            )?,
        };
        tx.insert_event(
            &NewEvent::new(
                workflow.id,
                EventKind::GenerationStarted,
                ActorKind::Agent,
                "Presentation generation started",
            )
            .step(step.id),
            now,
        )?;
        Ok(GenerationPlan {
            workflow_id: workflow.id,
            title: workflow.title.clone(),
            epoch,
            step_id: step.id,
            session,
            topic: if focus.is_empty() {
                workflow.title.clone()
            } else {
                focus
            },
            context,
            research,
            feedback,
            chat,
            options,
        })
    }

    fn launch(&self, workflow: Workflow, stage: Option<Stage>) -> Result<Dispatch, OrchestratorError> {
        let Some(stage) = stage else {
            return Ok(Dispatch::settled(workflow));
        };
        let engine = self.clone();
        let clock = Arc::clone(&self.clock);
        let (kind, work): (StageKind, Box<dyn FnOnce() -> StageOutcome + Send>) = match stage {
            Stage::Research(plan) => (plan.kind, Box::new(move || engine.run_research_stage(plan))),
            Stage::Generation(plan) => (
                StageKind::Generation,
                Box::new(move || engine.run_generation_stage(plan)),
            ),
            Stage::Chat(plan) => (
                StageKind::ChatReply,
                Box::new(move || engine.run_chat_stage(plan)),
            ),
        };
        match spawn_stage(kind, workflow.id, self.log.clone(), move || clock.now(), work) {
            Ok(task) => Ok(Dispatch {
                workflow,
                task: Some(task),
            }),
            Err(err) => {
                self.log.runtime(
                    "error",
                    "stage.spawn_failed",
                    &format!("workflow_id={} error={err}", workflow.id),
                );
                Err(err)
            }
        }
    }
}

/// Moves a prepared research step into flight.
fn begin_research(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
    mut step: WorkflowStep,
    session: SessionId,
    focus: &str,
    context: &str,
    now: i64,
) -> Result<ResearchPlan, OrchestratorError> {
    tx.set_workflow_status(workflow.id, WorkflowStatus::Researching, now)?;
    let epoch = tx.advance_epoch(workflow.id, now)?;
    step.status = StepStatus::InProgress;
    tx.update_step(&step, now)?;
    tx.insert_event(
        &NewEvent::new(
            workflow.id,
            EventKind::ResearchStarted,
            ActorKind::Agent,
            format!("Agent started researching: {focus}"),
        )
        .step(step.id),
        now,
    )?;
    Ok(ResearchPlan {
        kind: StageKind::Research,
        workflow_id: workflow.id,
        title: workflow.title.clone(),
        epoch,
        expected_status: WorkflowStatus::Researching,
        step_id: step.id,
        iteration: step.iteration_count,
        session,
        prompt: research_prompt(focus, context),
    })
}

/// Refinement continues the latest research step in the same agent session.
fn begin_refinement(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
    mut research_step: WorkflowStep,
    feedback: &str,
    now: i64,
) -> Result<ResearchPlan, OrchestratorError> {
    let session = ensure_session(tx, workflow)?;
    tx.set_workflow_status(workflow.id, WorkflowStatus::Refining, now)?;
    let epoch = tx.advance_epoch(workflow.id, now)?;
    research_step.iteration_count += 1;
    research_step.status = StepStatus::InProgress;
    research_step.feedback = Some(feedback.to_string());
    tx.update_step(&research_step, now)?;
    tx.insert_event(
        &NewEvent::new(
            workflow.id,
            EventKind::ResearchStarted,
            ActorKind::Agent,
            format!(
                "Refinement round {}: {}",
                research_step.iteration_count,
                clip(feedback, REFINEMENT_EVENT_PREVIEW_CHARS)
            ),
        )
        .step(research_step.id),
        now,
    )?;
    Ok(ResearchPlan {
        kind: StageKind::Refinement,
        workflow_id: workflow.id,
        title: workflow.title.clone(),
        epoch,
        expected_status: WorkflowStatus::Refining,
        step_id: research_step.id,
        iteration: research_step.iteration_count,
        session,
        prompt: refinement_prompt(feedback),
    })
}

fn ensure_session(tx: &StoreTx<'_>, workflow: &Workflow) -> Result<SessionId, OrchestratorError> {
    if let Some(session) = &workflow.session_id {
        return Ok(session.clone());
    }
    let fresh = generate_session_id().map_err(OrchestratorError::SessionAllocation)?;
    Ok(tx.assign_session_id(workflow.id, &fresh)?)
}

pub(super) fn find_workflow(
    tx: &StoreTx<'_>,
    id: WorkflowId,
) -> Result<Workflow, OrchestratorError> {
    tx.workflow(id)?.ok_or(OrchestratorError::NotFound {
        entity: "workflow",
        id: id.get(),
    })
}

fn find_participant(
    tx: &StoreTx<'_>,
    id: ParticipantId,
) -> Result<Participant, OrchestratorError> {
    tx.participant(id)?.ok_or(OrchestratorError::NotFound {
        entity: "participant",
        id: id.get(),
    })
}

fn require_participant_of(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
    actor: &Participant,
) -> Result<(), OrchestratorError> {
    if tx
        .workflow_participants(workflow.id)?
        .iter()
        .any(|p| p.id == actor.id)
    {
        Ok(())
    } else {
        Err(OrchestratorError::Forbidden(format!(
            "{} is not a participant in workflow {}",
            actor.name, workflow.id
        )))
    }
}

fn require_owner(
    workflow: &Workflow,
    actor: &Participant,
    message: &str,
) -> Result<(), OrchestratorError> {
    if workflow.owner_id == actor.id {
        Ok(())
    } else {
        Err(OrchestratorError::Forbidden(message.to_string()))
    }
}

fn require_status(
    workflow: &Workflow,
    action: &'static str,
    allowed: &[WorkflowStatus],
) -> Result<(), OrchestratorError> {
    if allowed.contains(&workflow.status) {
        Ok(())
    } else {
        Err(OrchestratorError::InvalidStatus {
            workflow_id: workflow.id,
            action,
            status: workflow.status,
        })
    }
}

/// A workflow has an agent when any step is agent-provided or assigned to an agent.
fn has_agent_participant(
    tx: &StoreTx<'_>,
    steps: &[WorkflowStep],
) -> Result<bool, OrchestratorError> {
    if steps.iter().any(|step| step.provider == ProviderKind::Agent) {
        return Ok(true);
    }
    Ok(agent_participant(tx, steps)?.is_some())
}

fn agent_participant(
    tx: &StoreTx<'_>,
    steps: &[WorkflowStep],
) -> Result<Option<Participant>, OrchestratorError> {
    for assignee in steps.iter().filter_map(|step| step.assignee_id) {
        if let Some(participant) = tx.participant(assignee)? {
            if participant.is_agent {
                return Ok(Some(participant));
            }
        }
    }
    Ok(None)
}

/// Latest research step whose output (directly or under a failure) carries sections.
fn latest_research_with_output(
    tx: &StoreTx<'_>,
    workflow_id: WorkflowId,
) -> Result<Option<WorkflowStep>, OrchestratorError> {
    Ok(tx
        .steps_of_type(workflow_id, StepType::AgentResearch)?
        .into_iter()
        .rev()
        .find(|step| {
            step.output
                .as_ref()
                .and_then(StepOutput::research_sections)
                .is_some_and(|sections| !sections.is_empty())
        }))
}

/// The requester's own description: the workflow's, else the first step input carrying one.
fn request_description(workflow: &Workflow, steps: &[WorkflowStep]) -> String {
    if !workflow.description.trim().is_empty() {
        return workflow.description.trim().to_string();
    }
    steps
        .iter()
        .find_map(|step| match &step.input {
            StepInput::Research { description, .. }
            | StepInput::Collaboration { description, .. }
                if !description.trim().is_empty() =>
            {
                Some(description.trim().to_string())
            }
            _ => None,
        })
        .unwrap_or_default()
}

fn primary_focus(workflow: &Workflow, steps: &[WorkflowStep]) -> String {
    let description = request_description(workflow, steps);
    if description.is_empty() {
        workflow.title.trim().to_string()
    } else {
        description
    }
}

fn reassign_linked_request(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
    now: i64,
) -> Result<(), OrchestratorError> {
    if let Some(request_id) = workflow.work_request_id {
        if let Some(request) = tx.work_request(request_id)? {
            if request.status == WorkRequestStatus::Completed {
                tx.set_work_request_status(request_id, WorkRequestStatus::Assigned, now)?;
            }
        }
    }
    Ok(())
}

pub(super) fn clip(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
