use super::payloads::{StepInput, StepOutput};
use crate::shared::ids::{ParticipantId, SessionId, StepId, WorkRequestId, WorkflowId};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::Value;

macro_rules! record_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Result<Self, String> {
                match raw.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!("unknown {} `{}`", $kind, other)),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                Self::parse(value.as_str()?).map_err(|err| FromSqlError::Other(err.into()))
            }
        }
    };
}

record_enum!(WorkflowStatus, "workflow status", {
    Pending => "pending",
    Collaborating => "collaborating",
    Researching => "researching",
    AwaitingReview => "awaiting_review",
    Refining => "refining",
    GeneratingPpt => "generating_ppt",
    Completed => "completed",
    Failed => "failed",
});

impl WorkflowStatus {
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Collaborating)
                | (Self::Pending, Self::Researching)
                | (Self::Pending, Self::Failed)
                | (Self::Collaborating, Self::Researching)
                | (Self::Collaborating, Self::GeneratingPpt)
                | (Self::Collaborating, Self::Completed)
                | (Self::Collaborating, Self::Failed)
                | (Self::Researching, Self::AwaitingReview)
                | (Self::Researching, Self::Failed)
                | (Self::Refining, Self::AwaitingReview)
                | (Self::Refining, Self::Collaborating)
                | (Self::Refining, Self::Failed)
                | (Self::AwaitingReview, Self::Refining)
                | (Self::AwaitingReview, Self::GeneratingPpt)
                | (Self::AwaitingReview, Self::Failed)
                | (Self::GeneratingPpt, Self::Completed)
                | (Self::GeneratingPpt, Self::Failed)
                | (Self::Completed, Self::Refining)
                | (Self::Completed, Self::Collaborating)
                | (Self::Completed, Self::GeneratingPpt)
                | (Self::Failed, Self::Researching)
                | (Self::Failed, Self::GeneratingPpt)
        )
    }

    /// Statuses owned by an in-flight background stage.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            Self::Researching | Self::Refining | Self::GeneratingPpt
        )
    }

    pub fn title(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Collaborating => "Collaborating",
            Self::Researching => "Researching",
            Self::AwaitingReview => "Awaiting Review",
            Self::Refining => "Refining",
            Self::GeneratingPpt => "Generating Ppt",
            Self::Completed => "Completed",
            Self::Failed => "Failed",
        }
    }
}

record_enum!(StepStatus, "step status", {
    Pending => "pending",
    InProgress => "in_progress",
    AwaitingInput => "awaiting_input",
    Completed => "completed",
    Skipped => "skipped",
    Failed => "failed",
});

impl StepStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress | Self::AwaitingInput)
    }
}

record_enum!(StepType, "step type", {
    AgentResearch => "agent_research",
    HumanReview => "human_review",
    AgentGeneration => "agent_generation",
    AgentCollaboration => "agent_collaboration",
    SpecialistReview => "specialist_review",
    HumanResearch => "human_research",
});

record_enum!(ProviderKind, "provider kind", {
    Agent => "agent",
    Human => "human",
});

record_enum!(WorkflowType, "workflow type", {
    PptGeneration => "ppt_generation",
    ComplianceReview => "compliance_review",
    DesignAlignment => "design_alignment",
    GeneralCollaboration => "general_collaboration",
});

impl WorkflowType {
    pub fn uses_collaborative_completion(self) -> bool {
        !matches!(self, Self::PptGeneration)
    }
}

record_enum!(EventKind, "event kind", {
    Created => "created",
    ResearchStarted => "research_started",
    ResearchCompleted => "research_completed",
    ReviewRequested => "review_requested",
    Approved => "approved",
    Refined => "refined",
    Reopened => "reopened",
    GenerationRequested => "generation_requested",
    GenerationStarted => "generation_started",
    GenerationReconciled => "generation_reconciled",
    GenerationCompleted => "generation_completed",
    MessagePosted => "message_posted",
    CompletionMarked => "completion_marked",
    Failed => "failed",
});

record_enum!(ActorKind, "actor kind", {
    Human => "human",
    Agent => "agent",
    System => "system",
});

record_enum!(ApprovalStatus, "approval status", {
    Pending => "pending",
    Ready => "ready",
});

record_enum!(WorkRequestStatus, "work request status", {
    Open => "open",
    Assigned => "assigned",
    Completed => "completed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    pub is_agent: bool,
    pub slack_user_id: Option<String>,
    pub created_at: i64,
}

impl Participant {
    pub fn actor_kind(&self) -> ActorKind {
        if self.is_agent {
            ActorKind::Agent
        } else {
            ActorKind::Human
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkRequest {
    pub id: WorkRequestId,
    pub requester_id: ParticipantId,
    pub parent_workflow_id: Option<WorkflowId>,
    pub title: String,
    pub description: String,
    pub capability_tags: Vec<String>,
    pub status: WorkRequestStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub owner_id: ParticipantId,
    pub workflow_type: WorkflowType,
    pub title: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub session_id: Option<SessionId>,
    pub parent_workflow_id: Option<WorkflowId>,
    pub work_request_id: Option<WorkRequestId>,
    pub run_epoch: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewWorkflow {
    pub owner_id: ParticipantId,
    pub workflow_type: WorkflowType,
    pub title: String,
    pub description: String,
    pub status: WorkflowStatus,
    pub parent_workflow_id: Option<WorkflowId>,
    pub work_request_id: Option<WorkRequestId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStep {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub order_index: i64,
    pub step_type: StepType,
    pub provider: ProviderKind,
    pub assignee_id: Option<ParticipantId>,
    pub status: StepStatus,
    pub input: StepInput,
    pub output: Option<StepOutput>,
    pub feedback: Option<String>,
    pub iteration_count: u32,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewStep {
    pub workflow_id: WorkflowId,
    pub step_type: StepType,
    pub provider: ProviderKind,
    pub assignee_id: Option<ParticipantId>,
    pub status: StepStatus,
    pub input: StepInput,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowEvent {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub step_id: Option<StepId>,
    pub kind: EventKind,
    pub actor_kind: ActorKind,
    pub actor_id: Option<ParticipantId>,
    pub channel: Option<String>,
    pub message: String,
    pub metadata: Value,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewEvent {
    pub workflow_id: WorkflowId,
    pub step_id: Option<StepId>,
    pub kind: EventKind,
    pub actor_kind: ActorKind,
    pub actor_id: Option<ParticipantId>,
    pub channel: Option<String>,
    pub message: String,
    pub metadata: Value,
}

impl NewEvent {
    pub fn new(
        workflow_id: WorkflowId,
        kind: EventKind,
        actor_kind: ActorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            step_id: None,
            kind,
            actor_kind,
            actor_id: None,
            channel: None,
            message: message.into(),
            metadata: Value::Null,
        }
    }

    pub fn by(mut self, actor: &Participant) -> Self {
        self.actor_kind = actor.actor_kind();
        self.actor_id = Some(actor.id);
        self
    }

    pub fn step(mut self, step_id: StepId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn channel(mut self, channel: &str) -> Self {
        self.channel = Some(channel.to_string());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowMessage {
    pub id: i64,
    pub workflow_id: WorkflowId,
    pub sender_kind: ActorKind,
    pub sender_id: Option<ParticipantId>,
    pub sender_name: Option<String>,
    pub channel: String,
    pub body: String,
    pub created_at: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub workflow_id: WorkflowId,
    pub sender_kind: ActorKind,
    pub sender_id: Option<ParticipantId>,
    pub sender_name: Option<String>,
    pub channel: String,
    pub body: String,
}

impl NewMessage {
    pub fn system(workflow_id: WorkflowId, body: impl Into<String>) -> Self {
        Self {
            workflow_id,
            sender_kind: ActorKind::System,
            sender_id: None,
            sender_name: None,
            channel: "system".to_string(),
            body: body.into(),
        }
    }

    pub fn from_participant(
        workflow_id: WorkflowId,
        sender: &Participant,
        channel: &str,
        body: impl Into<String>,
    ) -> Self {
        Self {
            workflow_id,
            sender_kind: sender.actor_kind(),
            sender_id: Some(sender.id),
            sender_name: Some(sender.name.clone()),
            channel: channel.to_string(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkflowApproval {
    pub workflow_id: WorkflowId,
    pub participant_id: ParticipantId,
    pub status: ApprovalStatus,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_vocabulary_round_trips_through_text() {
        for status in [
            WorkflowStatus::Pending,
            WorkflowStatus::Collaborating,
            WorkflowStatus::Researching,
            WorkflowStatus::AwaitingReview,
            WorkflowStatus::Refining,
            WorkflowStatus::GeneratingPpt,
            WorkflowStatus::Completed,
            WorkflowStatus::Failed,
        ] {
            assert_eq!(WorkflowStatus::parse(status.as_str()), Ok(status));
        }
        assert_eq!(
            serde_json::to_value(WorkflowStatus::GeneratingPpt).expect("encode"),
            "generating_ppt"
        );
        assert!(WorkflowStatus::parse("archived").is_err());
        assert_eq!(StepStatus::parse("IN_PROGRESS"), Ok(StepStatus::InProgress));
    }

    #[test]
    fn transitions_follow_the_lifecycle() {
        use WorkflowStatus::*;
        assert!(Collaborating.can_transition_to(Researching));
        assert!(Researching.can_transition_to(AwaitingReview));
        assert!(AwaitingReview.can_transition_to(GeneratingPpt));
        assert!(Completed.can_transition_to(Refining));
        assert!(Refining.can_transition_to(Collaborating));
        assert!(Failed.can_transition_to(Researching));

        assert!(!Researching.can_transition_to(GeneratingPpt));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!GeneratingPpt.can_transition_to(Researching));
    }

    #[test]
    fn failed_is_reachable_from_every_running_status() {
        for status in [
            WorkflowStatus::Researching,
            WorkflowStatus::Refining,
            WorkflowStatus::GeneratingPpt,
        ] {
            assert!(status.is_running());
            assert!(status.can_transition_to(WorkflowStatus::Failed));
        }
        assert!(!WorkflowStatus::AwaitingReview.is_running());
    }

    #[test]
    fn active_step_statuses() {
        assert!(StepStatus::Pending.is_active());
        assert!(StepStatus::AwaitingInput.is_active());
        assert!(!StepStatus::Completed.is_active());
        assert!(!StepStatus::Skipped.is_active());
        assert!(!StepStatus::Failed.is_active());
    }
}
