//! Research and refinement prompts plus the tolerant parser for the agent's
//! sectioned answer.

use crate::store::ResearchSections;

pub const DEFAULT_OUTLINE_SLIDES: u32 = 8;
const HEADER_MAX_CHARS: usize = 60;
const FALLBACK_SUMMARY_CHARS: usize = 500;

const SUMMARY_MARKER: &str = "=== EXECUTIVE SUMMARY ===";
const OUTLINE_MARKER: &str = "=== SLIDE OUTLINE ===";
const RAW_MARKER: &str = "=== RAW RESEARCH ===";

pub fn research_prompt(focus: &str, context: &str) -> String {
    let mut prompt = format!(
        "You are a research assistant preparing material for a presentation.\n\n\
         TASK: Research the following topic thoroughly using web search: \"{}\"\n",
        focus.trim()
    );
    let context = context.trim();
    if !context.is_empty() && context != focus.trim() {
        prompt.push_str(&format!("\nREQUESTER CONTEXT:\n{context}\n"));
    }
    prompt.push_str(&format!(
        "\nAfter completing your research, return your findings in this EXACT format \
         (use the section headers exactly as shown):\n\n\
         {SUMMARY_MARKER}\n\
         Write a 2-3 paragraph executive summary of your findings. Include the most important \
         facts, trends, and implications.\n\n\
         {OUTLINE_MARKER}\n\
         Create a {slides}-slide presentation outline. For each slide, provide:\n\
         Slide 1: [Title]\n- [Key point 1]\n- [Key point 2]\n- [Key point 3]\n\n\
         (Continue for all {slides} slides)\n\n\
         {RAW_MARKER}\n\
         Include your complete research findings with all data points, statistics, sources, and \
         detailed information gathered from your web search.\n\n\
         IMPORTANT: Execute the web search now, then organize and return your findings in the \
         format above.",
        slides = DEFAULT_OUTLINE_SLIDES
    ));
    prompt
}

pub fn refinement_prompt(feedback: &str) -> String {
    format!(
        "The human reviewer has provided feedback on your previous research.\n\
         Please refine and improve your research based on their instructions.\n\n\
         REVIEWER FEEDBACK:\n{}\n\n\
         INSTRUCTIONS:\n\
         1. Do NOT start over. Build upon your previous research.\n\
         2. Address the specific feedback points above.\n\
         3. If the reviewer asks for more depth on a topic, use web search to gather additional \
         information.\n\
         4. Return your UPDATED findings in the same format:\n\n\
         {SUMMARY_MARKER}\n[Updated summary incorporating the feedback]\n\n\
         {OUTLINE_MARKER}\n[Updated slide outline incorporating the feedback]\n\n\
         {RAW_MARKER}\n[Updated research with any new findings added to the previous research]\n\n\
         Incorporate the reviewer's feedback while preserving the valuable parts of your \
         original research.",
        feedback.trim()
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Summary,
    Outline,
    Raw,
}

impl Section {
    fn slot(self) -> usize {
        match self {
            Self::Summary => 0,
            Self::Outline => 1,
            Self::Raw => 2,
        }
    }
}

/// Recognizes a section header regardless of heading level, emphasis, casing or a
/// trailing colon. Long lines are never headers.
fn classify_header(line: &str) -> Option<Section> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.chars().count() > HEADER_MAX_CHARS {
        return None;
    }
    let stripped = trimmed
        .trim_matches(|c: char| matches!(c, '#' | '=' | '*' | '_') || c.is_whitespace())
        .trim_end_matches(':')
        .trim_end_matches(|c: char| matches!(c, '*' | '_') || c.is_whitespace())
        .trim_start_matches(|c: char| c.is_ascii_digit() || matches!(c, '.' | ')') || c.is_whitespace());
    let key = stripped
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect::<String>();
    match key.as_str() {
        "executivesummary" | "summary" => Some(Section::Summary),
        "slideoutline" | "outline" | "presentationoutline" | "slides" => Some(Section::Outline),
        "rawresearch" | "researchdetails" | "rawresearchdetails" | "detailedresearch"
        | "researchfindings" | "fullresearch" => Some(Section::Raw),
        _ => None,
    }
}

pub fn parse_research_output(raw_text: &str) -> ResearchSections {
    let mut found: [Option<String>; 3] = [None, None, None];
    let mut current: Option<(Section, Vec<&str>)> = None;

    fn finish(found: &mut [Option<String>; 3], current: Option<(Section, Vec<&str>)>) {
        if let Some((section, body)) = current {
            let slot = &mut found[section.slot()];
            if slot.is_none() {
                *slot = Some(body.join("\n").trim().to_string());
            }
        }
    }

    for line in raw_text.lines() {
        if let Some(section) = classify_header(line) {
            // A repeated header right under its own marker is a restatement, not a new section.
            if let Some((open, body)) = &current {
                if *open == section && body.iter().all(|l| l.trim().is_empty()) {
                    continue;
                }
            }
            finish(&mut found, current.take());
            if found[section.slot()].is_none() {
                current = Some((section, Vec::new()));
            }
            continue;
        }
        if line.trim_start().starts_with("===") {
            finish(&mut found, current.take());
            continue;
        }
        if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }
    finish(&mut found, current.take());

    let [summary, slide_outline, raw_research] = found;
    let mut sections = ResearchSections {
        summary: summary.unwrap_or_default(),
        slide_outline: slide_outline.unwrap_or_default(),
        raw_research: raw_research.unwrap_or_default(),
        raw_text: raw_text.to_string(),
    };

    if sections.summary.is_empty() && sections.slide_outline.is_empty() {
        let text = raw_text.trim();
        let paragraphs = text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>();
        sections.summary = if paragraphs.len() >= 2 {
            paragraphs[..2].join("\n\n")
        } else {
            truncate_chars(text, FALLBACK_SUMMARY_CHARS)
        };
        sections.raw_research = text.to_string();
    }
    sections
}

fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Highest `Slide N` number mentioned in an outline.
pub fn outline_slide_count(outline: &str) -> Option<u32> {
    outline
        .lines()
        .filter_map(|line| {
            let trimmed = line
                .trim()
                .trim_start_matches(|c: char| matches!(c, '#' | '*' | '_' | '-') || c.is_whitespace());
            let lower = trimmed.to_ascii_lowercase();
            let rest = lower.strip_prefix("slide")?;
            let digits = rest
                .trim_start()
                .chars()
                .take_while(char::is_ascii_digit)
                .collect::<String>();
            digits.parse::<u32>().ok()
        })
        .max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_markers_split_into_three_sections() {
        let text = "=== EXECUTIVE SUMMARY ===\nMicrogrids are growing.\n\n\
                    === SLIDE OUTLINE ===\nSlide 1: Intro\n- point\n\n\
                    === RAW RESEARCH ===\nCapacity rose 20%.";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "Microgrids are growing.");
        assert_eq!(parsed.slide_outline, "Slide 1: Intro\n- point");
        assert_eq!(parsed.raw_research, "Capacity rose 20%.");
        assert_eq!(parsed.raw_text, text);
    }

    #[test]
    fn unrecognized_headers_keep_the_verbatim_reply() {
        let text = "=== EXECUTIVE SUMMARY ===
Short take.

=== KEY NUMBERS ===
42 clinics";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "Short take.");
        assert!(parsed.raw_research.is_empty());
        assert_eq!(parsed.raw_text, text);
        assert!(!parsed.is_empty());
    }

    #[test]
    fn blank_reply_parses_to_empty_sections() {
        assert!(parse_research_output("  \n\n  ").is_empty());
    }

    #[test]
    fn header_variants_are_recognized() {
        let text = "## Executive summary:\nA\n\n**Slide Outline**\nB\n\n### 3. Research Findings\nC";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "A");
        assert_eq!(parsed.slide_outline, "B");
        assert_eq!(parsed.raw_research, "C");
    }

    #[test]
    fn restated_header_under_marker_is_skipped() {
        let text = "=== EXECUTIVE SUMMARY ===\n# Executive Summary\nBody text\n=== SLIDE OUTLINE ===\nS";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "Body text");
        assert_eq!(parsed.slide_outline, "S");
    }

    #[test]
    fn nested_header_truncates_and_first_occurrence_wins() {
        let text = "=== EXECUTIVE SUMMARY ===\nFirst\n## Summary\nshadow\n=== SLIDE OUTLINE ===\nO";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "First");
        assert_eq!(parsed.slide_outline, "O");
    }

    #[test]
    fn unmarked_text_uses_first_two_paragraphs() {
        let text = "Para one.\n\nPara two.\n\nPara three.";
        let parsed = parse_research_output(text);
        assert_eq!(parsed.summary, "Para one.\n\nPara two.");
        assert_eq!(parsed.raw_research, text);
        assert!(parsed.slide_outline.is_empty());
    }

    #[test]
    fn single_paragraph_is_truncated_on_char_boundary() {
        let text = "é".repeat(600);
        let parsed = parse_research_output(&text);
        assert_eq!(parsed.summary.chars().count(), 503);
        assert!(parsed.summary.ends_with("..."));
        assert_eq!(parsed.raw_research, text);
    }

    #[test]
    fn long_lines_are_never_headers() {
        assert_eq!(classify_header("Summary"), Some(Section::Summary));
        assert_eq!(
            classify_header(&format!("Summary of {}", "x".repeat(80))),
            None
        );
        assert_eq!(classify_header("Outline the following points now"), None);
    }

    #[test]
    fn outline_slide_count_takes_highest_number() {
        let outline = "Slide 1: Intro\n- a\n**Slide 2: Cost**\nslide 11 - Wrap up";
        assert_eq!(outline_slide_count(outline), Some(11));
        assert_eq!(outline_slide_count("no slides here"), None);
    }

    #[test]
    fn research_prompt_embeds_context_and_markers() {
        let prompt = research_prompt("Solar microgrids", "Audience: utilities");
        assert!(prompt.contains("\"Solar microgrids\""));
        assert!(prompt.contains("REQUESTER CONTEXT:\nAudience: utilities"));
        assert!(prompt.contains(SUMMARY_MARKER));
        assert!(prompt.contains(OUTLINE_MARKER));
        assert!(prompt.contains(RAW_MARKER));
        assert!(refinement_prompt("add cost breakdown").contains("add cost breakdown"));
    }
}
