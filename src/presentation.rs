use crate::store::{Tone, Verbosity};
use std::io::Write;

pub mod http;

pub use http::HttpPresentationService;

#[derive(Debug, thiserror::Error)]
pub enum PresentationError {
    #[error("presentation api request failed: {0}")]
    Request(String),
    #[error("presentation api returned an unusable response: {0}")]
    Response(String),
    #[error("presentation api response is missing `{0}`")]
    MissingIdentifier(&'static str),
    #[error("presentation task `{task_id}` failed: {reason}")]
    JobFailed { task_id: String, reason: String },
    #[error("presentation task `{task_id}` did not finish within {waited_secs}s")]
    Timeout { task_id: String, waited_secs: u64 },
    #[error("presentation task `{task_id}` was abandoned because the run is no longer current")]
    Abandoned { task_id: String },
    #[error("downloaded presentation from {url} was empty")]
    EmptyArtifact { url: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitRequest {
    pub plain_text: String,
    pub slide_count: u32,
    pub tone: Tone,
    pub verbosity: Verbosity,
    pub custom_instructions: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReceipt {
    pub task_id: String,
    pub request_id: Option<String>,
    /// Set when the service finished synchronously and no polling is needed.
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollStatus {
    Pending,
    Success { request_id: Option<String> },
    Failure { reason: String },
}

/// The three-call generation protocol plus the artifact transfer.
pub trait PresentationService: Send + Sync {
    fn submit(&self, request: &SubmitRequest) -> Result<SubmitReceipt, PresentationError>;
    fn poll(&self, task_id: &str) -> Result<PollStatus, PresentationError>;
    fn resolve_download(&self, request_id: &str) -> Result<String, PresentationError>;
    /// Streams the artifact at `url` into `sink`, returning the number of bytes written.
    fn download(&self, url: &str, sink: &mut dyn Write) -> Result<u64, PresentationError>;
}
