//! Tolerant parsing of model output and citation resolution.
//!
//! Backends are asked for a strict JSON object, but models drift. Output is
//! interpreted in order of preference:
//!
//! 1. **JSON**: the first `{ ... }` span (code fences allowed) with a
//!    non-empty `answer` field.
//! 2. **Markdown**: `## ANSWER`, `## KEY POINTS`, `## NEXT STEPS`, and
//!    `## CITED PASSAGES` sections.
//! 3. **Plain text**: the whole output is the answer; no key points.
//!
//! Parsing never fails. Passage labels found in the schema field, in the
//! cited-passages section, or inline (`[P3]`) are resolved against the
//! passages actually placed in the prompt; unknown labels are ignored.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

use crate::models::{OutputFormat, RetrievedPassage};

/// Number of passages cited when the model references none.
pub const FALLBACK_CITATIONS: usize = 3;

/// Model output after interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedOutput {
    pub answer: String,
    pub key_points: Vec<String>,
    pub next_steps: Vec<String>,
    /// Passage labels referenced by the model, in first-seen order.
    pub cited_labels: Vec<String>,
    pub format: OutputFormat,
}

#[derive(Deserialize)]
struct SchemaOutput {
    #[serde(default)]
    answer: String,
    #[serde(default)]
    key_points: Vec<String>,
    #[serde(default)]
    next_steps: Vec<String>,
    #[serde(default)]
    cited_passages: Vec<String>,
}

fn label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bP(\d+)\b").expect("label pattern is valid"))
}

fn inline_label_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\s*P(\d+)\s*\]").expect("label pattern is valid"))
}

/// Interpret raw model output.
pub fn parse_model_output(raw: &str) -> ParsedOutput {
    let mut parsed = parse_json(raw)
        .or_else(|| parse_markdown(raw))
        .unwrap_or_else(|| ParsedOutput {
            answer: raw.trim().to_string(),
            key_points: Vec::new(),
            next_steps: Vec::new(),
            cited_labels: Vec::new(),
            format: OutputFormat::PlainText,
        });

    let inline: Vec<String> = inline_label_regex()
        .captures_iter(&parsed.answer)
        .map(|cap| format!("P{}", &cap[1]))
        .collect();
    for label in inline {
        push_unique(&mut parsed.cited_labels, label);
    }
    parsed
}

/// Strip an optional code fence and return the outermost `{ ... }` span.
pub fn json_span(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn parse_json(raw: &str) -> Option<ParsedOutput> {
    let span = json_span(raw)?;
    let schema: SchemaOutput = serde_json::from_str(span).ok()?;
    if schema.answer.trim().is_empty() {
        return None;
    }
    let mut cited_labels = Vec::new();
    for entry in &schema.cited_passages {
        for cap in label_regex().captures_iter(entry) {
            push_unique(&mut cited_labels, format!("P{}", &cap[1]));
        }
    }
    Some(ParsedOutput {
        answer: schema.answer.trim().to_string(),
        key_points: clean_items(schema.key_points),
        next_steps: clean_items(schema.next_steps),
        cited_labels,
        format: OutputFormat::Json,
    })
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    None,
    Answer,
    KeyPoints,
    NextSteps,
    Cited,
    Other,
}

fn section_for(heading: &str) -> Section {
    let h = heading.trim_start_matches('#').trim().to_uppercase();
    if h.starts_with("ANSWER") {
        Section::Answer
    } else if h.starts_with("KEY POINTS") {
        Section::KeyPoints
    } else if h.starts_with("NEXT STEPS") {
        Section::NextSteps
    } else if h.starts_with("CITED PASSAGES") || h.starts_with("CITATIONS") {
        Section::Cited
    } else {
        Section::Other
    }
}

fn bullet_text(line: &str) -> Option<&str> {
    let t = line.trim();
    if let Some(rest) = t.strip_prefix("- ").or_else(|| t.strip_prefix("* ")) {
        return Some(rest.trim());
    }
    let digits = t.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &t[digits..];
        if let Some(rest) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(rest.trim());
        }
    }
    None
}

fn parse_markdown(raw: &str) -> Option<ParsedOutput> {
    let mut section = Section::None;
    let mut saw_answer = false;
    let mut answer_lines: Vec<&str> = Vec::new();
    let mut key_points = Vec::new();
    let mut next_steps = Vec::new();
    let mut cited_labels = Vec::new();

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            section = section_for(trimmed);
            saw_answer |= section == Section::Answer;
            continue;
        }
        match section {
            Section::Answer => answer_lines.push(line),
            Section::KeyPoints => {
                if let Some(b) = bullet_text(trimmed).filter(|b| !b.is_empty()) {
                    key_points.push(b.to_string());
                }
            }
            Section::NextSteps => {
                if let Some(b) = bullet_text(trimmed).filter(|b| !b.is_empty()) {
                    next_steps.push(b.to_string());
                }
            }
            Section::Cited => {
                if let Some(m) = label_regex().captures(trimmed) {
                    push_unique(&mut cited_labels, format!("P{}", &m[1]));
                }
            }
            Section::None | Section::Other => {}
        }
    }

    let answer = answer_lines.join("\n").trim().to_string();
    if !saw_answer || answer.is_empty() {
        return None;
    }
    Some(ParsedOutput {
        answer,
        key_points,
        next_steps,
        cited_labels,
        format: OutputFormat::Markdown,
    })
}

fn clean_items(items: Vec<String>) -> Vec<String> {
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn push_unique(labels: &mut Vec<String>, label: String) {
    if !labels.contains(&label) {
        labels.push(label);
    }
}

/// Map cited labels onto prompt passages.
///
/// Only passages present in `included` can be cited. When none of the
/// labels resolve, the top [`FALLBACK_CITATIONS`] included passages are
/// cited instead.
pub fn resolve_citations(labels: &[String], included: &[RetrievedPassage]) -> Vec<RetrievedPassage> {
    let cited: Vec<RetrievedPassage> = labels
        .iter()
        .filter_map(|l| included.iter().find(|p| &p.label == l))
        .cloned()
        .collect();
    if cited.is_empty() {
        included.iter().take(FALLBACK_CITATIONS).cloned().collect()
    } else {
        cited
    }
}
