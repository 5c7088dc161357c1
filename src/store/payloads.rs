//! Typed step payloads. Stored as JSON with a `kind` tag so rows stay readable.

use super::records::WorkflowType;
use crate::shared::ids::{StepId, WorkRequestId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verbosity {
    #[serde(rename = "concise")]
    Concise,
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "text-heavy")]
    TextHeavy,
}

impl Verbosity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Concise => "concise",
            Self::Standard => "standard",
            Self::TextHeavy => "text-heavy",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "concise" => Ok(Self::Concise),
            "standard" => Ok(Self::Standard),
            "text-heavy" => Ok(Self::TextHeavy),
            other => Err(format!(
                "verbosity must be one of: concise, standard, text-heavy (got `{other}`)"
            )),
        }
    }
}

impl std::fmt::Display for Verbosity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tone {
    Default,
    Casual,
    Professional,
    Funny,
    Educational,
    SalesPitch,
}

impl Tone {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Casual => "casual",
            Self::Professional => "professional",
            Self::Funny => "funny",
            Self::Educational => "educational",
            Self::SalesPitch => "sales_pitch",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, String> {
        match raw
            .trim()
            .to_ascii_lowercase()
            .replace([' ', '-'], "_")
            .as_str()
        {
            "default" => Ok(Self::Default),
            "casual" => Ok(Self::Casual),
            "professional" => Ok(Self::Professional),
            "funny" => Ok(Self::Funny),
            "educational" => Ok(Self::Educational),
            "sales_pitch" => Ok(Self::SalesPitch),
            other => Err(format!("unknown tone `{other}`")),
        }
    }
}

impl std::fmt::Display for Tone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    AgentReconciled,
    Fallback,
}

impl Provenance {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AgentReconciled => "agent_reconciled",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewDecision {
    Approve,
    Refine,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchSections {
    pub summary: String,
    pub slide_outline: String,
    pub raw_research: String,
    /// The agent's reply exactly as received, kept even when no section header matched.
    #[serde(default)]
    pub raw_text: String,
}

impl ResearchSections {
    pub fn is_empty(&self) -> bool {
        self.summary.trim().is_empty()
            && self.slide_outline.trim().is_empty()
            && self.raw_research.trim().is_empty()
            && self.raw_text.trim().is_empty()
    }
}

/// Explicit generation choices from a human; each set field overrides reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slide_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbosity: Option<Verbosity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationSpec {
    pub slide_count: u32,
    pub tone: Tone,
    pub verbosity: Verbosity,
    pub instructions: String,
    pub must_include: Vec<String>,
    pub must_avoid: Vec<String>,
    pub source: Provenance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub file_name: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub file_size_formatted: String,
    pub sha256: String,
    pub task_id: String,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepInput {
    Research {
        topic: String,
        #[serde(default)]
        description: String,
        #[serde(default)]
        retry: bool,
    },
    Review {
        instructions: String,
    },
    Generation {
        topic: String,
        context: String,
        #[serde(default)]
        options: GenerationOptions,
        #[serde(default)]
        research_step_id: Option<StepId>,
    },
    Collaboration {
        topic: String,
        title: String,
        description: String,
        workflow_type: WorkflowType,
        #[serde(default)]
        request_id: Option<WorkRequestId>,
        #[serde(default)]
        requires_research: bool,
    },
}

impl StepInput {
    pub fn linked_request_id(&self) -> Option<WorkRequestId> {
        match self {
            Self::Collaboration { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailurePayload {
    pub error: String,
    #[serde(default)]
    pub cancelled: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Box<StepOutput>>,
}

impl FailurePayload {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            cancelled: false,
            timed_out: false,
            timeout_seconds: None,
            previous: None,
        }
    }

    /// Keeps whatever the step had produced so far underneath the failure.
    pub fn over(mut self, previous: Option<StepOutput>) -> Self {
        self.previous = previous.and_then(|output| match output {
            StepOutput::Failure(failure) => failure.previous,
            other => Some(Box::new(other)),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepOutput {
    Research(ResearchSections),
    Review {
        decision: ReviewDecision,
        #[serde(default)]
        feedback: Option<String>,
    },
    Generation {
        artifact: ArtifactMetadata,
        spec: GenerationSpec,
    },
    Failure(FailurePayload),
}

impl StepOutput {
    pub fn research_sections(&self) -> Option<&ResearchSections> {
        match self {
            Self::Research(sections) => Some(sections),
            Self::Failure(failure) => failure
                .previous
                .as_deref()
                .and_then(StepOutput::research_sections),
            _ => None,
        }
    }

    pub fn artifact(&self) -> Option<&ArtifactMetadata> {
        match self {
            Self::Generation { artifact, .. } => Some(artifact),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailurePayload> {
        match self {
            Self::Failure(failure) => Some(failure),
            _ => None,
        }
    }
}
