use super::guard::{DiscardReason, RunGuard};
use super::records::{
    ApprovalStatus, NewEvent, NewMessage, NewStep, NewWorkflow, Participant, StepStatus,
    StepType, WorkRequest, WorkRequestStatus, Workflow, WorkflowApproval, WorkflowEvent,
    WorkflowMessage, WorkflowStatus, WorkflowStep,
};
use super::StoreError;
use crate::shared::ids::{ParticipantId, SessionId, StepId, WorkRequestId, WorkflowId};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

const PARTICIPANT_COLUMNS: &str = "id, name, is_agent, slack_user_id, created_at";
const WORK_REQUEST_COLUMNS: &str = "id, requester_id, parent_workflow_id, title, description, \
     capability_tags, status, created_at, updated_at";
const WORKFLOW_COLUMNS: &str = "id, owner_id, workflow_type, title, description, status, \
     session_id, parent_workflow_id, work_request_id, run_epoch, created_at, updated_at";
const STEP_COLUMNS: &str = "id, workflow_id, order_index, step_type, provider, assignee_id, \
     status, input, output, feedback, iteration_count, created_at, updated_at";
const EVENT_COLUMNS: &str = "id, workflow_id, step_id, kind, actor_kind, actor_id, channel, \
     message, metadata, created_at";
const MESSAGE_COLUMNS: &str =
    "id, workflow_id, sender_kind, sender_id, sender_name, channel, body, created_at";

/// One open transaction against the record store. Every engine read-compare-write
/// sequence runs inside a single `StoreTx`.
pub struct StoreTx<'conn> {
    pub(super) tx: Transaction<'conn>,
}

impl StoreTx<'_> {
    pub fn insert_participant(
        &self,
        name: &str,
        is_agent: bool,
        slack_user_id: Option<&str>,
        now: i64,
    ) -> Result<Participant, StoreError> {
        self.tx.execute(
            "INSERT INTO participants (name, is_agent, slack_user_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![name, is_agent, slack_user_id, now],
        )?;
        let id = ParticipantId::new(self.tx.last_insert_rowid());
        self.require_participant(id)
    }

    pub fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, StoreError> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![id], map_participant)
            .optional()?)
    }

    pub fn require_participant(&self, id: ParticipantId) -> Result<Participant, StoreError> {
        self.participant(id)?.ok_or(StoreError::NotFound {
            entity: "participant",
            id: id.get(),
        })
    }

    pub fn participants(&self) -> Result<Vec<Participant>, StoreError> {
        let sql = format!("SELECT {PARTICIPANT_COLUMNS} FROM participants ORDER BY id");
        self.collect(&sql, [], map_participant)
    }

    /// Owner plus every step assignee, without duplicates.
    pub fn workflow_participants(
        &self,
        workflow_id: WorkflowId,
    ) -> Result<Vec<Participant>, StoreError> {
        let sql = format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM participants
             WHERE id IN (
                 SELECT owner_id FROM workflows WHERE id = ?1
                 UNION
                 SELECT assignee_id FROM workflow_steps
                 WHERE workflow_id = ?1 AND assignee_id IS NOT NULL
             )
             ORDER BY id"
        );
        self.collect(&sql, params![workflow_id], map_participant)
    }

    pub fn insert_work_request(
        &self,
        requester_id: ParticipantId,
        parent_workflow_id: Option<WorkflowId>,
        title: &str,
        description: &str,
        capability_tags: &[String],
        now: i64,
    ) -> Result<WorkRequest, StoreError> {
        self.tx.execute(
            "INSERT INTO work_requests (
                 requester_id, parent_workflow_id, title, description, capability_tags,
                 status, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                requester_id,
                parent_workflow_id,
                title,
                description,
                encode_json("work request capability tags", &capability_tags)?,
                WorkRequestStatus::Open,
                now
            ],
        )?;
        let id = WorkRequestId::new(self.tx.last_insert_rowid());
        self.require_work_request(id)
    }

    pub fn work_request(&self, id: WorkRequestId) -> Result<Option<WorkRequest>, StoreError> {
        let sql = format!("SELECT {WORK_REQUEST_COLUMNS} FROM work_requests WHERE id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![id], map_work_request)
            .optional()?)
    }

    pub fn require_work_request(&self, id: WorkRequestId) -> Result<WorkRequest, StoreError> {
        self.work_request(id)?.ok_or(StoreError::NotFound {
            entity: "work request",
            id: id.get(),
        })
    }

    pub fn set_work_request_status(
        &self,
        id: WorkRequestId,
        status: WorkRequestStatus,
        now: i64,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE work_requests SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, now],
        )?;
        Ok(())
    }

    pub fn insert_workflow(&self, new: &NewWorkflow, now: i64) -> Result<Workflow, StoreError> {
        self.tx.execute(
            "INSERT INTO workflows (
                 owner_id, workflow_type, title, description, status, session_id,
                 parent_workflow_id, work_request_id, run_epoch, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6, ?7, 0, ?8, ?8)",
            params![
                new.owner_id,
                new.workflow_type,
                new.title,
                new.description,
                new.status,
                new.parent_workflow_id,
                new.work_request_id,
                now
            ],
        )?;
        let id = WorkflowId::new(self.tx.last_insert_rowid());
        self.require_workflow(id)
    }

    pub fn workflow(&self, id: WorkflowId) -> Result<Option<Workflow>, StoreError> {
        let sql = format!("SELECT {WORKFLOW_COLUMNS} FROM workflows WHERE id = ?1");
        Ok(self
            .tx
            .query_row(&sql, params![id], map_workflow)
            .optional()?)
    }

    pub fn require_workflow(&self, id: WorkflowId) -> Result<Workflow, StoreError> {
        self.workflow(id)?.ok_or(StoreError::NotFound {
            entity: "workflow",
            id: id.get(),
        })
    }

    pub fn workflows_for_participant(
        &self,
        participant_id: ParticipantId,
    ) -> Result<Vec<Workflow>, StoreError> {
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows
             WHERE owner_id = ?1
                OR id IN (SELECT workflow_id FROM workflow_steps WHERE assignee_id = ?1)
             ORDER BY updated_at DESC, id DESC"
        );
        self.collect(&sql, params![participant_id], map_workflow)
    }

    pub fn running_workflows(&self) -> Result<Vec<Workflow>, StoreError> {
        let sql = format!(
            "SELECT {WORKFLOW_COLUMNS} FROM workflows
             WHERE status IN (?1, ?2, ?3)
             ORDER BY updated_at ASC, id ASC"
        );
        self.collect(
            &sql,
            params![
                WorkflowStatus::Researching,
                WorkflowStatus::Refining,
                WorkflowStatus::GeneratingPpt
            ],
            map_workflow,
        )
    }

    pub fn set_workflow_status(
        &self,
        id: WorkflowId,
        next: WorkflowStatus,
        now: i64,
    ) -> Result<Workflow, StoreError> {
        let workflow = self.require_workflow(id)?;
        if workflow.status != next && !workflow.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                workflow_id: id,
                from: workflow.status,
                to: next,
            });
        }
        self.tx.execute(
            "UPDATE workflows SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, next, now],
        )?;
        self.require_workflow(id)
    }

    /// Invalidates every outstanding `RunGuard` for the workflow.
    pub fn advance_epoch(&self, id: WorkflowId, now: i64) -> Result<i64, StoreError> {
        let changed = self.tx.execute(
            "UPDATE workflows SET run_epoch = run_epoch + 1, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "workflow",
                id: id.get(),
            });
        }
        Ok(self.require_workflow(id)?.run_epoch)
    }

    pub fn touch_workflow(&self, id: WorkflowId, now: i64) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE workflows SET updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }

    /// Assigns `session` only when the workflow has none yet; returns the session that
    /// ends up owned by the workflow.
    pub fn assign_session_id(
        &self,
        id: WorkflowId,
        session: &SessionId,
    ) -> Result<SessionId, StoreError> {
        self.tx.execute(
            "UPDATE workflows SET session_id = ?2 WHERE id = ?1 AND session_id IS NULL",
            params![id, session],
        )?;
        self.require_workflow(id)?
            .session_id
            .ok_or(StoreError::SessionUnassigned { workflow_id: id })
    }

    pub fn delete_workflow(&self, id: WorkflowId) -> Result<(), StoreError> {
        for sql in [
            "DELETE FROM workflow_approvals WHERE workflow_id = ?1",
            "DELETE FROM workflow_messages WHERE workflow_id = ?1",
            "DELETE FROM workflow_events WHERE workflow_id = ?1",
            "DELETE FROM workflow_steps WHERE workflow_id = ?1",
            "UPDATE workflows SET parent_workflow_id = NULL WHERE parent_workflow_id = ?1",
            "UPDATE work_requests SET parent_workflow_id = NULL WHERE parent_workflow_id = ?1",
            "DELETE FROM workflows WHERE id = ?1",
        ] {
            self.tx.execute(sql, params![id])?;
        }
        Ok(())
    }

    pub fn insert_step(&self, new: &NewStep, now: i64) -> Result<WorkflowStep, StoreError> {
        let next_order: i64 = self.tx.query_row(
            "SELECT COALESCE(MAX(order_index), 0) + 1 FROM workflow_steps WHERE workflow_id = ?1",
            params![new.workflow_id],
            |row| row.get(0),
        )?;
        self.tx.execute(
            "INSERT INTO workflow_steps (
                 workflow_id, order_index, step_type, provider, assignee_id, status,
                 input, output, feedback, iteration_count, created_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, NULL, 0, ?8, ?8)",
            params![
                new.workflow_id,
                next_order,
                new.step_type,
                new.provider,
                new.assignee_id,
                new.status,
                encode_json("step input", &new.input)?,
                now
            ],
        )?;
        let id = StepId::new(self.tx.last_insert_rowid());
        self.require_step(id)
    }

    pub fn step(&self, id: StepId) -> Result<Option<WorkflowStep>, StoreError> {
        let sql = format!("SELECT {STEP_COLUMNS} FROM workflow_steps WHERE id = ?1");
        Ok(self.tx.query_row(&sql, params![id], map_step).optional()?)
    }

    pub fn require_step(&self, id: StepId) -> Result<WorkflowStep, StoreError> {
        self.step(id)?.ok_or(StoreError::NotFound {
            entity: "workflow step",
            id: id.get(),
        })
    }

    pub fn steps(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowStep>, StoreError> {
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps
             WHERE workflow_id = ?1
             ORDER BY order_index ASC, id ASC"
        );
        self.collect(&sql, params![workflow_id], map_step)
    }

    pub fn steps_of_type(
        &self,
        workflow_id: WorkflowId,
        step_type: StepType,
    ) -> Result<Vec<WorkflowStep>, StoreError> {
        let sql = format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps
             WHERE workflow_id = ?1 AND step_type = ?2
             ORDER BY order_index ASC, id ASC"
        );
        self.collect(&sql, params![workflow_id, step_type], map_step)
    }

    pub fn latest_step(
        &self,
        workflow_id: WorkflowId,
        step_type: StepType,
    ) -> Result<Option<WorkflowStep>, StoreError> {
        Ok(self.steps_of_type(workflow_id, step_type)?.pop())
    }

    /// Most recent step that is still pending, in progress or awaiting input.
    pub fn active_step(&self, workflow_id: WorkflowId) -> Result<Option<WorkflowStep>, StoreError> {
        Ok(self
            .steps(workflow_id)?
            .into_iter()
            .rev()
            .find(|step| step.status.is_active()))
    }

    pub fn update_step(&self, step: &WorkflowStep, now: i64) -> Result<(), StoreError> {
        let output = step
            .output
            .as_ref()
            .map(|output| encode_json("step output", output))
            .transpose()?;
        let changed = self.tx.execute(
            "UPDATE workflow_steps
             SET assignee_id = ?2, status = ?3, input = ?4, output = ?5, feedback = ?6,
                 iteration_count = ?7, updated_at = ?8
             WHERE id = ?1",
            params![
                step.id,
                step.assignee_id,
                step.status,
                encode_json("step input", &step.input)?,
                output,
                step.feedback,
                step.iteration_count,
                now
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound {
                entity: "workflow step",
                id: step.id.get(),
            });
        }
        Ok(())
    }

    pub fn set_step_status(
        &self,
        id: StepId,
        status: StepStatus,
        now: i64,
    ) -> Result<WorkflowStep, StoreError> {
        let mut step = self.require_step(id)?;
        step.status = status;
        self.update_step(&step, now)?;
        Ok(step)
    }

    pub fn insert_event(&self, event: &NewEvent, now: i64) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO workflow_events (
                 workflow_id, step_id, kind, actor_kind, actor_id, channel, message,
                 metadata, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.workflow_id,
                event.step_id,
                event.kind,
                event.actor_kind,
                event.actor_id,
                event.channel,
                event.message,
                encode_json("event metadata", &event.metadata)?,
                now
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn events(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowEvent>, StoreError> {
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM workflow_events
             WHERE workflow_id = ?1
             ORDER BY created_at ASC, id ASC"
        );
        self.collect(&sql, params![workflow_id], map_event)
    }

    pub fn insert_message(&self, message: &NewMessage, now: i64) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO workflow_messages (
                 workflow_id, sender_kind, sender_id, sender_name, channel, body, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                message.workflow_id,
                message.sender_kind,
                message.sender_id,
                message.sender_name,
                message.channel,
                message.body,
                now
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    pub fn messages(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowMessage>, StoreError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM workflow_messages
             WHERE workflow_id = ?1
             ORDER BY created_at ASC, id ASC"
        );
        self.collect(&sql, params![workflow_id], map_message)
    }

    /// The last `limit` messages, oldest first.
    pub fn recent_messages(
        &self,
        workflow_id: WorkflowId,
        limit: usize,
    ) -> Result<Vec<WorkflowMessage>, StoreError> {
        let mut messages = self.messages(workflow_id)?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    pub fn upsert_approval(
        &self,
        workflow_id: WorkflowId,
        participant_id: ParticipantId,
        status: ApprovalStatus,
        now: i64,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO workflow_approvals (workflow_id, participant_id, status, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(workflow_id, participant_id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
            params![workflow_id, participant_id, status, now],
        )?;
        Ok(())
    }

    pub fn approvals(&self, workflow_id: WorkflowId) -> Result<Vec<WorkflowApproval>, StoreError> {
        self.collect(
            "SELECT workflow_id, participant_id, status, updated_at FROM workflow_approvals
             WHERE workflow_id = ?1
             ORDER BY participant_id",
            params![workflow_id],
            |row| {
                Ok(WorkflowApproval {
                    workflow_id: row.get("workflow_id")?,
                    participant_id: row.get("participant_id")?,
                    status: row.get("status")?,
                    updated_at: row.get("updated_at")?,
                })
            },
        )
    }

    /// Re-reads the rows a background stage depends on. `None` means the stage may commit.
    pub fn check_guard(&self, guard: &RunGuard) -> Result<Option<DiscardReason>, StoreError> {
        let Some(workflow) = self.workflow(guard.workflow_id)? else {
            return Ok(Some(DiscardReason::WorkflowMissing));
        };
        if let Some(expected) = guard.epoch {
            if workflow.run_epoch != expected {
                return Ok(Some(DiscardReason::EpochAdvanced {
                    expected,
                    actual: workflow.run_epoch,
                }));
            }
        }
        if let Some(expected) = guard.expected_status {
            if workflow.status != expected {
                return Ok(Some(DiscardReason::StatusChanged {
                    expected,
                    actual: workflow.status,
                }));
            }
        }
        if let Some(step_id) = guard.step_id {
            match self.step(step_id)? {
                None => return Ok(Some(DiscardReason::StepMissing { step_id })),
                Some(step) if step.status != StepStatus::InProgress => {
                    return Ok(Some(DiscardReason::StepInactive {
                        step_id,
                        status: step.status,
                    }))
                }
                Some(_) => {}
            }
        }
        Ok(None)
    }

    fn collect<T, P, F>(&self, sql: &str, params: P, map: F) -> Result<Vec<T>, StoreError>
    where
        P: rusqlite::Params,
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut statement = self.tx.prepare(sql)?;
        let rows = statement.query_map(params, map)?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }
}

fn encode_json<T: Serialize + ?Sized>(what: &'static str, value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Encode { what, source })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    decode_json_column(row, column, &raw)
}

fn optional_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
) -> rusqlite::Result<Option<T>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|raw| decode_json_column(row, column, &raw))
        .transpose()
}

fn decode_json_column<T: DeserializeOwned>(
    row: &Row<'_>,
    column: &str,
    raw: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(raw).map_err(|err| {
        let index = row.as_ref().column_index(column).unwrap_or_default();
        rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
    })
}

fn map_participant(row: &Row<'_>) -> rusqlite::Result<Participant> {
    Ok(Participant {
        id: row.get("id")?,
        name: row.get("name")?,
        is_agent: row.get("is_agent")?,
        slack_user_id: row.get("slack_user_id")?,
        created_at: row.get("created_at")?,
    })
}

fn map_work_request(row: &Row<'_>) -> rusqlite::Result<WorkRequest> {
    Ok(WorkRequest {
        id: row.get("id")?,
        requester_id: row.get("requester_id")?,
        parent_workflow_id: row.get("parent_workflow_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        capability_tags: json_column(row, "capability_tags")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_workflow(row: &Row<'_>) -> rusqlite::Result<Workflow> {
    Ok(Workflow {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        workflow_type: row.get("workflow_type")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: row.get("status")?,
        session_id: row.get("session_id")?,
        parent_workflow_id: row.get("parent_workflow_id")?,
        work_request_id: row.get("work_request_id")?,
        run_epoch: row.get("run_epoch")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_step(row: &Row<'_>) -> rusqlite::Result<WorkflowStep> {
    Ok(WorkflowStep {
        id: row.get("id")?,
        workflow_id: row.get("workflow_id")?,
        order_index: row.get("order_index")?,
        step_type: row.get("step_type")?,
        provider: row.get("provider")?,
        assignee_id: row.get("assignee_id")?,
        status: row.get("status")?,
        input: json_column(row, "input")?,
        output: optional_json_column(row, "output")?,
        feedback: row.get("feedback")?,
        iteration_count: row.get("iteration_count")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn map_event(row: &Row<'_>) -> rusqlite::Result<WorkflowEvent> {
    Ok(WorkflowEvent {
        id: row.get("id")?,
        workflow_id: row.get("workflow_id")?,
        step_id: row.get("step_id")?,
        kind: row.get("kind")?,
        actor_kind: row.get("actor_kind")?,
        actor_id: row.get("actor_id")?,
        channel: row.get("channel")?,
        message: row.get("message")?,
        metadata: json_column(row, "metadata")?,
        created_at: row.get("created_at")?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<WorkflowMessage> {
    Ok(WorkflowMessage {
        id: row.get("id")?,
        workflow_id: row.get("workflow_id")?,
        sender_kind: row.get("sender_kind")?,
        sender_id: row.get("sender_id")?,
        sender_name: row.get("sender_name")?,
        channel: row.get("channel")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
    })
}
