use crate::shared::ids::{WorkRequestId, WorkflowId};
use crate::store::{StoreError, WorkRequestStatus, WorkflowStatus};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("{0}")]
    Forbidden(String),
    #[error("{action} is not allowed while workflow `{workflow_id}` is `{status}`")]
    InvalidStatus {
        workflow_id: WorkflowId,
        action: &'static str,
        status: WorkflowStatus,
    },
    #[error("`{0}` is required")]
    MissingField(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("research has already started for workflow `{0}`")]
    ResearchAlreadyStarted(WorkflowId),
    #[error("no agent collaborator is assigned to workflow `{0}`")]
    NoAgentParticipant(WorkflowId),
    #[error("presentation generation is already in progress for workflow `{0}`")]
    AlreadyGenerating(WorkflowId),
    #[error("no completed research output found for workflow `{0}`")]
    MissingResearch(WorkflowId),
    #[error("work request `{request_id}` is `{status}`, expected `open`")]
    RequestNotOpen {
        request_id: WorkRequestId,
        status: WorkRequestStatus,
    },
    #[error("failed to allocate agent session: {0}")]
    SessionAllocation(String),
    #[error("workflow `{0}` does not use collaborative completion")]
    NotCollaborative(WorkflowId),
    #[error("failed to spawn background stage `{stage}`: {source}")]
    Spawn {
        stage: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrchestratorError {
    /// Validation errors are rejected before any write happens. Agent and presentation
    /// failures never surface here; stages record them on the failed step.
    pub fn is_validation(&self) -> bool {
        !matches!(
            self,
            Self::Spawn { .. } | Self::SessionAllocation(_) | Self::Store(_)
        )
    }
}
