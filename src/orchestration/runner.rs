use super::OrchestratorError;
use crate::shared::ids::WorkflowId;
use crate::shared::logging::EngineLog;
use crate::store::DiscardReason;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    Research,
    Refinement,
    Generation,
    ChatReply,
}

impl StageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Refinement => "refinement",
            Self::Generation => "generation",
            Self::ChatReply => "chat_reply",
        }
    }
}

/// What happened to a background stage's result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The result (success or recorded failure) was written.
    Committed,
    /// The run was no longer current when the result arrived; nothing was written.
    Discarded(DiscardReason),
    /// The stage could not record anything, e.g. the store was unreachable.
    Failed(String),
}

impl StageOutcome {
    fn log_fields(&self) -> String {
        match self {
            Self::Committed => "outcome=committed".to_string(),
            Self::Discarded(reason) => format!("outcome=discarded {reason}"),
            Self::Failed(error) => format!("outcome=failed error={error:?}"),
        }
    }
}

/// Handle to a detached stage. Dropping it leaves the stage running.
#[derive(Debug)]
pub struct TaskHandle {
    kind: StageKind,
    handle: JoinHandle<StageOutcome>,
}

impl TaskHandle {
    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn join(self) -> StageOutcome {
        self.handle
            .join()
            .unwrap_or_else(|_| StageOutcome::Failed("background stage panicked".to_string()))
    }
}

pub(crate) fn spawn_stage<F>(
    kind: StageKind,
    workflow_id: WorkflowId,
    log: EngineLog,
    clock_now: impl Fn() -> i64 + Send + 'static,
    work: F,
) -> Result<TaskHandle, OrchestratorError>
where
    F: FnOnce() -> StageOutcome + Send + 'static,
{
    let handle = thread::Builder::new()
        .name(format!("{}-{workflow_id}", kind.as_str()))
        .spawn(move || {
            let outcome = match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let detail = panic_detail(payload.as_ref());
                    log.record(
                        clock_now(),
                        workflow_id,
                        &format!("stage={} outcome=panicked", kind.as_str()),
                    );
                    log.runtime(
                        "error",
                        "stage.panicked",
                        &format!("workflow_id={workflow_id} stage={} panic={detail}", kind.as_str()),
                    );
                    return StageOutcome::Failed(format!("background stage panicked: {detail}"));
                }
            };
            log.record(
                clock_now(),
                workflow_id,
                &format!("stage={} {}", kind.as_str(), outcome.log_fields()),
            );
            if let StageOutcome::Failed(error) = &outcome {
                log.runtime(
                    "error",
                    "stage.failed",
                    &format!("workflow_id={workflow_id} stage={} error={error}", kind.as_str()),
                );
            }
            outcome
        })
        .map_err(|source| OrchestratorError::Spawn {
            stage: kind.as_str(),
            source,
        })?;
    Ok(TaskHandle { kind, handle })
}

fn panic_detail(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}
