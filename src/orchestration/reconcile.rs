//! Merges the brief, research and accumulated feedback into one generation spec.
//! The agent is asked first; anything unusable falls back to fixed defaults.

use super::research::{outline_slide_count, DEFAULT_OUTLINE_SLIDES};
use crate::provider::{AgentGateway, AgentRequest};
use crate::shared::ids::SessionId;
use crate::store::{
    GenerationOptions, GenerationSpec, Provenance, ResearchSections, Tone, Verbosity,
};
use serde::Deserialize;
use std::time::Duration;

pub const MIN_SLIDES: u32 = 4;
pub const MAX_SLIDES: u32 = 20;
pub const MAX_LIST_ITEMS: usize = 8;
pub const MAX_LIST_ITEM_CHARS: usize = 160;
pub const MAX_INSTRUCTION_CHARS: usize = 1500;
const PROMPT_SECTION_CHARS: usize = 6000;

#[derive(Debug, Clone, Default)]
pub struct ReconcileInput<'a> {
    pub brief: &'a str,
    pub research: Option<&'a ResearchSections>,
    pub feedback: &'a [String],
    pub chat_context: &'a str,
    pub options: GenerationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub spec: GenerationSpec,
    /// Why the agent's answer was not used, when the spec is a fallback.
    pub fallback_reason: Option<String>,
}

/// One extra agent call in a side session. Never fails: any error yields the fallback spec.
pub fn reconcile(
    agent: &dyn AgentGateway,
    session: &SessionId,
    timeout: Duration,
    input: &ReconcileInput<'_>,
) -> Reconciled {
    let request = AgentRequest {
        prompt: reconcile_prompt(input),
        session_id: session.derived("reconcile"),
        timeout,
    };
    match agent.call(&request) {
        Ok(reply) => match parse_reconciled(&reply.text, input) {
            Some(spec) => Reconciled {
                spec,
                fallback_reason: None,
            },
            None => Reconciled {
                spec: fallback_spec(input),
                fallback_reason: Some("unparseable reconciliation reply".to_string()),
            },
        },
        Err(err) => Reconciled {
            spec: fallback_spec(input),
            fallback_reason: Some(err.to_string()),
        },
    }
}

pub fn reconcile_prompt(input: &ReconcileInput<'_>) -> String {
    let research = input.research.cloned().unwrap_or_default();
    let feedback = if input.feedback.is_empty() {
        "(none)".to_string()
    } else {
        input
            .feedback
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    format!(
        "You are preparing the final instructions for an automated slide generator.\n\
         Merge the sources below into ONE consistent specification. Later refinement feedback \
         overrides earlier material when they conflict.\n\n\
         REQUESTER BRIEF:\n{brief}\n\n\
         EXECUTIVE SUMMARY:\n{summary}\n\n\
         SLIDE OUTLINE:\n{outline}\n\n\
         RAW RESEARCH:\n{raw}\n\n\
         REFINEMENT FEEDBACK (oldest first):\n{feedback}\n\n\
         CHAT CONTEXT:\n{chat}\n\n\
         Respond with ONLY a JSON object, no prose and no code fences, with these keys:\n\
         {{\"slide_count\": integer {MIN_SLIDES}-{MAX_SLIDES}, \
         \"tone\": one of default|casual|professional|funny|educational|sales_pitch, \
         \"verbosity\": one of concise|standard|text-heavy, \
         \"instructions\": string, \
         \"must_include\": [string], \
         \"must_avoid\": [string]}}",
        brief = or_none(input.brief),
        summary = or_none(&clip(&research.summary, PROMPT_SECTION_CHARS)),
        outline = or_none(&clip(&research.slide_outline, PROMPT_SECTION_CHARS)),
        raw = or_none(&clip(&research.raw_research, PROMPT_SECTION_CHARS)),
        chat = or_none(input.chat_context),
    )
}

#[derive(Debug, Deserialize)]
struct RawSpec {
    #[serde(default)]
    slide_count: Option<serde_json::Value>,
    #[serde(default)]
    tone: Option<String>,
    #[serde(default)]
    verbosity: Option<String>,
    #[serde(default)]
    instructions: Option<String>,
    #[serde(default)]
    must_include: Vec<serde_json::Value>,
    #[serde(default)]
    must_avoid: Vec<serde_json::Value>,
}

/// Parses the agent's answer. `None` means the answer was not a usable object.
pub fn parse_reconciled(reply: &str, input: &ReconcileInput<'_>) -> Option<GenerationSpec> {
    let body = strip_code_fence(reply);
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end < start {
        return None;
    }
    let raw: RawSpec = serde_json::from_str(&body[start..=end]).ok()?;

    let slide_count = raw
        .slide_count
        .as_ref()
        .and_then(|value| match value {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .filter(|n| n.is_finite())
        .map(|n| clamp_slides(n.round().max(0.0) as u32))
        .unwrap_or_else(|| default_slide_count(input.research));

    let spec = GenerationSpec {
        slide_count,
        tone: raw
            .tone
            .as_deref()
            .and_then(|t| Tone::parse(t).ok())
            .unwrap_or(Tone::Professional),
        verbosity: raw
            .verbosity
            .as_deref()
            .and_then(|v| Verbosity::parse(v).ok())
            .unwrap_or(Verbosity::TextHeavy),
        instructions: clip(raw.instructions.as_deref().unwrap_or_default().trim(), MAX_INSTRUCTION_CHARS),
        must_include: normalize_list(raw.must_include.iter().filter_map(value_text)),
        must_avoid: normalize_list(raw.must_avoid.iter().filter_map(value_text)),
        source: Provenance::AgentReconciled,
    };
    Some(apply_overrides(spec, &input.options))
}

pub fn fallback_spec(input: &ReconcileInput<'_>) -> GenerationSpec {
    let spec = GenerationSpec {
        slide_count: default_slide_count(input.research),
        tone: Tone::Professional,
        verbosity: Verbosity::TextHeavy,
        instructions: String::new(),
        must_include: normalize_list(input.feedback.iter().cloned()),
        must_avoid: Vec::new(),
        source: Provenance::Fallback,
    };
    apply_overrides(spec, &input.options)
}

/// Explicit human choices always win over whatever was reconciled.
fn apply_overrides(mut spec: GenerationSpec, options: &GenerationOptions) -> GenerationSpec {
    if let Some(count) = options.slide_count {
        spec.slide_count = clamp_slides(count);
    }
    if let Some(tone) = options.tone {
        spec.tone = tone;
    }
    if let Some(verbosity) = options.verbosity {
        spec.verbosity = verbosity;
    }
    if let Some(extra) = options
        .instructions
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        let merged = if spec.instructions.is_empty() {
            extra.to_string()
        } else {
            format!("{}\n{extra}", spec.instructions)
        };
        spec.instructions = clip(&merged, MAX_INSTRUCTION_CHARS);
    }
    spec
}

fn default_slide_count(research: Option<&ResearchSections>) -> u32 {
    research
        .and_then(|r| outline_slide_count(&r.slide_outline))
        .map(clamp_slides)
        .unwrap_or(DEFAULT_OUTLINE_SLIDES)
}

pub fn clamp_slides(count: u32) -> u32 {
    count.clamp(MIN_SLIDES, MAX_SLIDES)
}

fn value_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn normalize_list(items: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let item = clip(item.trim(), MAX_LIST_ITEM_CHARS);
        if item.is_empty() || out.iter().any(|seen| seen.eq_ignore_ascii_case(&item)) {
            continue;
        }
        out.push(item);
        if out.len() == MAX_LIST_ITEMS {
            break;
        }
    }
    out
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.split_once('\n').map(|(_, body)| body).unwrap_or(rest);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

fn clip(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => text[..cut].trim_end().to_string(),
        None => text.to_string(),
    }
}

fn or_none(text: &str) -> &str {
    if text.trim().is_empty() {
        "(none)"
    } else {
        text.trim()
    }
}
