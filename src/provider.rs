use crate::shared::ids::SessionId;
use std::path::Path;
use std::time::Duration;

pub mod output_parse;
pub mod runner;

pub use output_parse::parse_agent_output;
pub use runner::CliAgentGateway;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent binary missing: {binary}")]
    MissingBinary { binary: String },
    #[error("agent process failed with exit code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },
    #[error("agent call timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
    #[error("agent reported status `{status}`: {message}")]
    Rejected { status: String, message: String },
    #[error("agent output parse failure: {reason}")]
    ParseFailure { reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentRequest {
    pub prompt: String,
    pub session_id: SessionId,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentReply {
    pub text: String,
}

/// Blocking request/response call to the external reasoning agent. Calls may take minutes.
pub trait AgentGateway: Send + Sync {
    fn call(&self, request: &AgentRequest) -> Result<AgentReply, AgentError>;
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.display().to_string(),
        source,
    }
}
