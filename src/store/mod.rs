pub mod guard;
pub mod payloads;
pub mod records;
pub mod tx;

pub use guard::{CommitOutcome, DiscardReason, RunGuard};
pub use payloads::{
    ArtifactMetadata, FailurePayload, GenerationOptions, GenerationSpec, Provenance,
    ResearchSections, ReviewDecision, StepInput, StepOutput, Tone, Verbosity,
};
pub use records::{
    ActorKind, ApprovalStatus, EventKind, NewEvent, NewMessage, NewStep, NewWorkflow,
    Participant, ProviderKind, StepStatus, StepType, WorkRequest, WorkRequestStatus, Workflow,
    WorkflowApproval, WorkflowEvent, WorkflowMessage, WorkflowStatus, WorkflowStep, WorkflowType,
};
pub use tx::StoreTx;

use crate::shared::ids::WorkflowId;
use rusqlite::{Connection, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("failed to encode {what}: {source}")]
    Encode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("{entity} `{id}` not found")]
    NotFound { entity: &'static str, id: i64 },
    #[error("workflow `{workflow_id}` status transition `{from}` -> `{to}` is invalid")]
    InvalidTransition {
        workflow_id: WorkflowId,
        from: WorkflowStatus,
        to: WorkflowStatus,
    },
    #[error("workflow `{workflow_id}` has no session id after assignment")]
    SessionUnassigned { workflow_id: WorkflowId },
}

/// SQLite-backed record store. Each call opens its own connection so background
/// stages never share a handle with the caller.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    db_path: PathBuf,
}

impl WorkflowStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let store = Self {
            db_path: db_path.to_path_buf(),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `f` inside an immediate transaction and commits when it returns `Ok`.
    pub fn write<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut connection = self.connect()?;
        let tx = connection
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let scoped = StoreTx { tx };
        let value = f(&scoped)?;
        scoped.tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn read<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut connection = self.connect()?;
        let tx = connection.transaction().map_err(StoreError::from)?;
        let scoped = StoreTx { tx };
        f(&scoped)
    }

    /// Commits `f` only if the persisted workflow still matches `guard`; otherwise
    /// nothing is written.
    pub fn commit_guarded<T, F>(
        &self,
        guard: &RunGuard,
        f: F,
    ) -> Result<CommitOutcome<T>, StoreError>
    where
        F: FnOnce(&StoreTx<'_>) -> Result<T, StoreError>,
    {
        self.write(|tx| {
            if let Some(reason) = tx.check_guard(guard)? {
                return Ok(CommitOutcome::Discarded(reason));
            }
            f(tx).map(CommitOutcome::Committed)
        })
    }

    fn ensure_schema(&self) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS participants (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                is_agent INTEGER NOT NULL,
                slack_user_id TEXT,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL REFERENCES participants(id),
                workflow_type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                session_id TEXT UNIQUE,
                parent_workflow_id INTEGER REFERENCES workflows(id),
                work_request_id INTEGER REFERENCES work_requests(id),
                run_epoch INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS work_requests (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requester_id INTEGER NOT NULL REFERENCES participants(id),
                parent_workflow_id INTEGER REFERENCES workflows(id),
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                capability_tags TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_steps (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                order_index INTEGER NOT NULL,
                step_type TEXT NOT NULL,
                provider TEXT NOT NULL,
                assignee_id INTEGER REFERENCES participants(id),
                status TEXT NOT NULL,
                input TEXT NOT NULL,
                output TEXT,
                feedback TEXT,
                iteration_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                step_id INTEGER REFERENCES workflow_steps(id),
                kind TEXT NOT NULL,
                actor_kind TEXT NOT NULL,
                actor_id INTEGER REFERENCES participants(id),
                channel TEXT,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                sender_kind TEXT NOT NULL,
                sender_id INTEGER REFERENCES participants(id),
                sender_name TEXT,
                channel TEXT NOT NULL,
                body TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS workflow_approvals (
                workflow_id INTEGER NOT NULL REFERENCES workflows(id),
                participant_id INTEGER NOT NULL REFERENCES participants(id),
                status TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (workflow_id, participant_id)
            );

            CREATE INDEX IF NOT EXISTS idx_workflow_steps_workflow
                ON workflow_steps(workflow_id, step_type, order_index);
            CREATE INDEX IF NOT EXISTS idx_workflow_events_workflow
                ON workflow_events(workflow_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_workflow_messages_workflow
                ON workflow_messages(workflow_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_workflows_status
                ON workflows(status, updated_at);
            ",
        )?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path).map_err(|source| StoreError::Open {
            path: self.db_path.display().to_string(),
            source,
        })?;
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        Ok(connection)
    }
}
