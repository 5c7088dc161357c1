//! Chat transcript rendering, generation context assembly and the agent chat-reply
//! prompt with its output filter.

use crate::store::{ActorKind, EventKind, ResearchSections, WorkflowEvent, WorkflowMessage};

pub const GENERATION_CHAT_LINES: usize = 14;
pub const REFINEMENT_FEEDBACK_ITEMS: usize = 6;

pub const NEUTRAL_REPLY: &str = "I ran into an internal problem while preparing that answer. \
    Your request is saved in this chat. When you are happy with the plan, use \
    \"Approve & Generate\" to produce the presentation.";

/// Phrases that only show up when the agent leaks its own tooling into a reply.
const LEAK_MARKERS: &[&str] = &[
    "tool call",
    "tool_call",
    "traceback",
    "permission denied",
    "sandbox",
    "exit code",
    "stderr",
    "stack trace",
    "command not found",
    "no such file or directory",
    "scripts/",
    "node_modules",
    "econnrefused",
];

pub fn speaker_label(message: &WorkflowMessage) -> &str {
    match (message.sender_kind, message.sender_name.as_deref()) {
        (ActorKind::System, _) => "System",
        (_, Some(name)) if !name.trim().is_empty() => name,
        (ActorKind::Agent, _) => "Agent",
        _ => "Human",
    }
}

/// The last `limit` messages as `Speaker: text` lines, oldest first.
pub fn build_chat_context(messages: &[WorkflowMessage], limit: usize) -> String {
    let skip = messages.len().saturating_sub(limit);
    messages[skip..]
        .iter()
        .map(|message| format!("{}: {}", speaker_label(message), message.body))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Refinement feedback in the order it was given, keeping the most recent `limit`.
pub fn refinement_feedback(events: &[WorkflowEvent], limit: usize) -> Vec<String> {
    let items = events
        .iter()
        .filter(|event| event.kind == EventKind::Refined)
        .filter_map(|event| {
            let text = event
                .metadata
                .get("feedback")
                .and_then(|value| value.as_str())
                .map(str::to_string)
                .or_else(|| {
                    event
                        .message
                        .split_once(':')
                        .map(|(_, rest)| rest.to_string())
                })?;
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        })
        .collect::<Vec<_>>();
    let skip = items.len().saturating_sub(limit);
    items[skip..].to_vec()
}

pub struct GenerationContext<'a> {
    pub research: Option<&'a ResearchSections>,
    pub feedback: &'a [String],
    pub chat: &'a str,
    pub primary_focus: &'a str,
}

pub fn build_generation_context(input: &GenerationContext<'_>) -> String {
    let mut sections = Vec::new();
    if let Some(research) = input.research {
        for (label, body) in [
            ("EXECUTIVE SUMMARY", research.summary.trim()),
            ("SLIDE OUTLINE (TARGET STRUCTURE)", research.slide_outline.trim()),
            ("RAW RESEARCH DETAILS", research.raw_research.trim()),
        ] {
            if !body.is_empty() {
                sections.push(format!("{label}:\n{body}"));
            }
        }
    }
    if !input.feedback.is_empty() {
        let items = input
            .feedback
            .iter()
            .map(|item| format!("- {item}"))
            .collect::<Vec<_>>()
            .join("\n");
        sections.push(format!("REFINEMENT REQUIREMENTS (MUST BE SATISFIED):\n{items}"));
    }
    if !input.chat.trim().is_empty() {
        sections.push(format!("COLLABORATION CHAT CONTEXT:\n{}", input.chat.trim()));
    }
    if sections.is_empty() {
        return input.primary_focus.trim().to_string();
    }
    sections.join("\n\n")
}

pub fn chat_reply_prompt(description: &str, transcript: &str, latest: &str) -> String {
    let mut prompt = String::from(
        "You are the agent collaborator in a shared workflow chat. Reply to the latest \
         message in a concise, friendly way. Do not run tools or describe internal steps. \
         If the requester seems ready, remind them they can use \"Approve & Generate\" or \
         \"Start Agent Research\".\n",
    );
    if !description.trim().is_empty() {
        prompt.push_str(&format!("\nREQUESTER DESCRIPTION:\n{}\n", description.trim()));
    }
    if !transcript.trim().is_empty() {
        prompt.push_str(&format!("\nRECENT CHAT:\n{}\n", transcript.trim()));
    }
    prompt.push_str(&format!("\nLATEST MESSAGE:\n{}\n", latest.trim()));
    prompt
}

pub fn sanitize_agent_reply(reply: &str) -> String {
    let trimmed = reply.trim();
    let lower = trimmed.to_ascii_lowercase();
    if trimmed.is_empty() || LEAK_MARKERS.iter().any(|marker| lower.contains(marker)) {
        return NEUTRAL_REPLY.to_string();
    }
    trimmed.to_string()
}
