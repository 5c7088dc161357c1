//! Forced failure of a running workflow, shared by explicit cancellation and the
//! stale-run detector.

use crate::store::{
    ActorKind, EventKind, FailurePayload, NewEvent, NewMessage, Participant, StepOutput,
    StepStatus, StepType, StoreError, StoreTx, Workflow, WorkflowStatus, WorkflowStep,
};
use serde_json::json;

const CANCEL_REASON_MAX_CHARS: usize = 180;

#[derive(Debug, Clone)]
pub enum ForceFail<'a> {
    TimedOut { timeout_seconds: u64 },
    Cancelled {
        by: &'a Participant,
        reason: Option<&'a str>,
    },
}

pub fn is_stale(workflow: &Workflow, now: i64, timeout_seconds: u64) -> bool {
    let timeout = i64::try_from(timeout_seconds).unwrap_or(i64::MAX);
    workflow.status.is_running() && now.saturating_sub(workflow.updated_at) >= timeout
}

/// The step a running status is working on: the latest research step while researching
/// or refining, the latest generation step while generating.
pub fn operation_step(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
) -> Result<Option<WorkflowStep>, StoreError> {
    let step_type = match workflow.status {
        WorkflowStatus::Researching | WorkflowStatus::Refining => StepType::AgentResearch,
        WorkflowStatus::GeneratingPpt => StepType::AgentGeneration,
        _ => return Ok(None),
    };
    tx.latest_step(workflow.id, step_type)
}

pub fn stale_message(status: WorkflowStatus, timeout_seconds: u64) -> String {
    format!(
        "{} timed out after {} minutes with no progress.",
        status.title(),
        (timeout_seconds / 60).max(1)
    )
}

pub fn cancel_message(by: &Participant, reason: Option<&str>) -> String {
    let mut message = format!("Run cancelled by {}", by.name);
    if let Some(reason) = reason.map(str::trim).filter(|r| !r.is_empty()) {
        message.push_str(": ");
        message.extend(reason.chars().take(CANCEL_REASON_MAX_CHARS));
    }
    message
}

/// Fails the workflow and its active operation step, invalidating any in-flight stage.
pub fn force_fail(
    tx: &StoreTx<'_>,
    workflow: &Workflow,
    kind: ForceFail<'_>,
    now: i64,
) -> Result<Workflow, StoreError> {
    let op_step = operation_step(tx, workflow)?;
    let (message, mut failure) = match &kind {
        ForceFail::TimedOut { timeout_seconds } => {
            let message = stale_message(workflow.status, *timeout_seconds);
            let mut failure = FailurePayload::error(&message);
            failure.timed_out = true;
            failure.timeout_seconds = Some(*timeout_seconds);
            (message, failure)
        }
        ForceFail::Cancelled { by, reason } => {
            let message = cancel_message(by, *reason);
            let mut failure = FailurePayload::error(&message);
            failure.cancelled = true;
            (message, failure)
        }
    };

    if let Some(step) = op_step.as_ref().filter(|step| step.status.is_active()) {
        let mut failed = step.clone();
        failure = failure.over(failed.output.take());
        failed.output = Some(StepOutput::Failure(failure));
        failed.status = StepStatus::Failed;
        tx.update_step(&failed, now)?;
    }

    tx.advance_epoch(workflow.id, now)?;
    let updated = tx.set_workflow_status(workflow.id, WorkflowStatus::Failed, now)?;

    let mut event = match &kind {
        ForceFail::TimedOut { timeout_seconds } => {
            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    format!("{message} Marked as failed automatically. You can retry the run."),
                ),
                now,
            )?;
            NewEvent::new(workflow.id, EventKind::Failed, ActorKind::System, &message)
                .channel("system")
                .metadata(json!({ "timed_out": true, "timeout_seconds": timeout_seconds }))
        }
        ForceFail::Cancelled { by, .. } => {
            tx.insert_message(
                &NewMessage::system(
                    workflow.id,
                    format!("{message}. You can retry from the workflow page."),
                ),
                now,
            )?;
            NewEvent::new(workflow.id, EventKind::Failed, ActorKind::Human, &message)
                .by(by)
                .channel("web")
                .metadata(json!({ "cancelled": true }))
        }
    };
    if let Some(step) = &op_step {
        event = event.step(step.id);
    }
    tx.insert_event(&event, now)?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::ids::{ParticipantId, WorkflowId};
    use crate::store::WorkflowType;

    fn workflow(status: WorkflowStatus, updated_at: i64) -> Workflow {
        Workflow {
            id: WorkflowId::new(1),
            owner_id: ParticipantId::new(1),
            workflow_type: WorkflowType::PptGeneration,
            title: "t".to_string(),
            description: String::new(),
            status,
            session_id: None,
            parent_workflow_id: None,
            work_request_id: None,
            run_epoch: 0,
            created_at: 0,
            updated_at,
        }
    }

    #[test]
    fn only_running_statuses_go_stale_at_threshold() {
        assert!(!is_stale(&workflow(WorkflowStatus::Researching, 1_000), 1_329, 330));
        assert!(is_stale(&workflow(WorkflowStatus::Researching, 1_000), 1_330, 330));
        assert!(is_stale(&workflow(WorkflowStatus::GeneratingPpt, 0), 10_000, 330));
        assert!(!is_stale(&workflow(WorkflowStatus::AwaitingReview, 0), 10_000, 330));
    }

    #[test]
    fn messages_follow_fixed_wording() {
        assert_eq!(
            stale_message(WorkflowStatus::GeneratingPpt, 330),
            "Generating Ppt timed out after 5 minutes with no progress."
        );
        assert_eq!(
            stale_message(WorkflowStatus::Researching, 30),
            "Researching timed out after 1 minutes with no progress."
        );
        let ana = Participant {
            id: ParticipantId::new(1),
            name: "Ana".to_string(),
            is_agent: false,
            slack_user_id: None,
            created_at: 0,
        };
        assert_eq!(cancel_message(&ana, Some("  ")), "Run cancelled by Ana");
        let long = "x".repeat(500);
        assert_eq!(
            cancel_message(&ana, Some(&long)).len(),
            "Run cancelled by Ana: ".len() + 180
        );
    }
}
