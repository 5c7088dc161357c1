use super::records::{StepStatus, WorkflowStatus};
use crate::shared::ids::{StepId, WorkflowId};

/// Snapshot taken when a background stage is handed off. A stage result may only be
/// committed while the persisted workflow still matches it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunGuard {
    pub workflow_id: WorkflowId,
    pub epoch: Option<i64>,
    pub expected_status: Option<WorkflowStatus>,
    pub step_id: Option<StepId>,
}

impl RunGuard {
    pub fn stage(
        workflow_id: WorkflowId,
        epoch: i64,
        expected_status: WorkflowStatus,
        step_id: StepId,
    ) -> Self {
        Self {
            workflow_id,
            epoch: Some(epoch),
            expected_status: Some(expected_status),
            step_id: Some(step_id),
        }
    }

    /// Only requires the workflow to still exist. Used for chat replies, which never
    /// own the workflow status.
    pub fn presence(workflow_id: WorkflowId) -> Self {
        Self {
            workflow_id,
            epoch: None,
            expected_status: None,
            step_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscardReason {
    WorkflowMissing,
    EpochAdvanced {
        expected: i64,
        actual: i64,
    },
    StatusChanged {
        expected: WorkflowStatus,
        actual: WorkflowStatus,
    },
    StepMissing {
        step_id: StepId,
    },
    StepInactive {
        step_id: StepId,
        status: StepStatus,
    },
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::WorkflowMissing => write!(f, "reason=workflow_missing"),
            Self::EpochAdvanced { expected, actual } => {
                write!(f, "reason=epoch expected={expected} actual={actual}")
            }
            Self::StatusChanged { expected, actual } => {
                write!(f, "reason=status expected={expected} actual={actual}")
            }
            Self::StepMissing { step_id } => write!(f, "reason=step_missing step_id={step_id}"),
            Self::StepInactive { step_id, status } => {
                write!(f, "reason=step_inactive step_id={step_id} step_status={status}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome<T> {
    Committed(T),
    Discarded(DiscardReason),
}

impl<T> CommitOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed(_))
    }
}
