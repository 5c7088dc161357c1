pub mod chat;
pub mod collaboration;
pub mod error;
pub mod generator;
pub mod reconcile;
pub mod research;
pub mod runner;
pub mod stale;
pub mod workflow_engine;

mod stages;

pub use error::OrchestratorError;
pub use generator::GeneratorConfig;
pub use runner::{StageKind, StageOutcome, TaskHandle};
pub use workflow_engine::{
    CompletionAction, Dispatch, EngineOptions, ReviewAction, WorkflowDetail, WorkflowEngine,
};
