//! Prompt construction under a size budget.
//!
//! A [`PromptPlan`] pairs the instruction text (task, question, and the
//! strict JSON output schema) with the passages that fit the budget.
//! Passages are admitted in rank order; once one does not fit, it and every
//! lower-ranked passage are dropped. A passage is never cut mid-text. The
//! top-ranked passage is always admitted so a non-empty retrieval never
//! produces a context-free prompt.

use serde::Deserialize;

use crate::models::RetrievedPassage;

const PASSAGES_HEADER: &str = "\n\nPASSAGES:\n";

/// Limits applied when building a prompt.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PromptBudget {
    /// Maximum characters of the rendered prompt.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_max_passages")]
    pub max_passages: usize,
}

fn default_max_chars() -> usize {
    12_000
}
fn default_max_passages() -> usize {
    10
}

impl Default for PromptBudget {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            max_passages: default_max_passages(),
        }
    }
}

/// A passage as handed to a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPassage {
    pub label: String,
    pub source: String,
    pub text: String,
}

impl PromptPassage {
    pub fn render(&self) -> String {
        format!(
            "[{}] (source: {})\n{}\n\n",
            self.label,
            self.source,
            self.text.trim()
        )
    }
}

impl From<&RetrievedPassage> for PromptPassage {
    fn from(p: &RetrievedPassage) -> Self {
        Self {
            label: p.label.clone(),
            source: p.chunk.metadata.source.clone(),
            text: p.chunk.text.clone(),
        }
    }
}

/// The instruction text plus the passages admitted under the budget.
#[derive(Debug, Clone)]
pub struct PromptPlan {
    pub instructions: String,
    pub passages: Vec<PromptPassage>,
    /// Retrieved passages that made it into the prompt, in rank order.
    pub included: Vec<RetrievedPassage>,
    /// Number of retrieved passages left out.
    pub dropped: usize,
}

impl PromptPlan {
    pub fn build(query: &str, passages: &[RetrievedPassage], budget: &PromptBudget) -> Self {
        let instructions = answer_instructions(query);
        let mut used = instructions.chars().count() + PASSAGES_HEADER.chars().count();
        let mut included = Vec::new();
        let mut rendered = Vec::new();

        for p in passages.iter().take(budget.max_passages.max(1)) {
            let pp = PromptPassage::from(p);
            let cost = pp.render().chars().count();
            if !included.is_empty() && used + cost > budget.max_chars {
                break;
            }
            used += cost;
            rendered.push(pp);
            included.push(p.clone());
        }

        let dropped = passages.len() - included.len();
        if dropped > 0 {
            tracing::debug!(
                included = included.len(),
                dropped,
                "prompt budget excluded lower-ranked passages"
            );
        }

        Self {
            instructions,
            passages: rendered,
            included,
            dropped,
        }
    }

    /// Render instructions and passages as a single prompt string.
    pub fn render(&self) -> String {
        render_prompt(&self.instructions, &self.passages)
    }
}

/// Lay out instructions followed by the passage blocks.
pub fn render_prompt(instructions: &str, passages: &[PromptPassage]) -> String {
    let mut out = String::with_capacity(instructions.len() + 1024);
    out.push_str(instructions);
    if !passages.is_empty() {
        out.push_str(PASSAGES_HEADER);
        for p in passages {
            out.push_str(&p.render());
        }
    }
    out
}

/// Instruction text requesting a strict JSON answer.
pub fn answer_instructions(query: &str) -> String {
    format!(
        "You are a helpful finance-focused assistant.\n\
         Answer the user's question using ONLY the information in the provided passages.\n\
         If the passages do not contain enough information, say so explicitly.\n\
         Cite passages inline with their labels, e.g. [P1].\n\n\
         USER QUESTION:\n{query}\n\n\
         Respond with a single JSON object and nothing else, using exactly these fields:\n\
         {{\n  \"answer\": \"main answer text\",\n  \"key_points\": [\"point\", \"...\"],\n  \
         \"next_steps\": [\"suggested follow-up\", \"...\"],\n  \
         \"cited_passages\": [\"P1\", \"...\"]\n}}",
        query = query.trim()
    )
}

/// Instruction text for summarizing a single document.
pub fn analysis_instructions(filename: &str) -> String {
    format!(
        "Analyze the finance-related document \"{filename}\" provided below.\n\
         Respond with a single JSON object and nothing else, using exactly these fields:\n\
         {{\n  \"summary\": \"2-3 sentence summary\",\n  \"key_topics\": [\"topic\", \"...\"],\n  \
         \"document_type\": \"report | invoice | statement | contract | policy | other\",\n  \
         \"confidence\": 0.0,\n  \"keywords\": [\"keyword\", \"...\"]\n}}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkMetadata};

    fn passage(rank: usize, text: &str) -> RetrievedPassage {
        RetrievedPassage::new(
            Chunk {
                id: format!("d:{rank}"),
                document_id: "d".into(),
                chunk_index: rank as i64,
                text: text.into(),
                hash: String::new(),
                embedding: Vec::new(),
                metadata: ChunkMetadata {
                    source: "statement.txt".into(),
                    char_start: 0,
                    char_end: text.len(),
                    uploaded_at: chrono::Utc::now(),
                },
            },
            0.9,
            rank,
        )
    }

    #[test]
    fn test_all_passages_fit() {
        let ps: Vec<_> = (1..=3).map(|i| passage(i, "short text")).collect();
        let plan = PromptPlan::build("What is APR?", &ps, &PromptBudget::default());
        assert_eq!(plan.included.len(), 3);
        assert_eq!(plan.dropped, 0);
        let rendered = plan.render();
        assert!(rendered.contains("[P1] (source: statement.txt)"));
        assert!(rendered.contains("[P3]"));
        assert!(rendered.contains("What is APR?"));
        assert!(rendered.contains("\"cited_passages\""));
    }

    #[test]
    fn test_budget_drops_lowest_ranked_whole_passages() {
        let body = "x".repeat(400);
        let ps: Vec<_> = (1..=5).map(|i| passage(i, &body)).collect();
        let base = answer_instructions("q").chars().count() + PASSAGES_HEADER.chars().count();
        let one = PromptPassage::from(&ps[0]).render().chars().count();
        let budget = PromptBudget {
            max_chars: base + 2 * one + one / 2,
            max_passages: 10,
        };
        let plan = PromptPlan::build("q", &ps, &budget);
        let labels: Vec<&str> = plan.included.iter().map(|p| p.label.as_str()).collect();
        assert_eq!(labels, ["P1", "P2"]);
        assert_eq!(plan.dropped, 3);
        assert!(plan.render().chars().count() <= budget.max_chars);
        for p in &plan.passages {
            assert_eq!(p.text, body);
        }
    }

    #[test]
    fn test_max_passages_cap() {
        let ps: Vec<_> = (1..=12).map(|i| passage(i, "t")).collect();
        let budget = PromptBudget {
            max_chars: 1_000_000,
            max_passages: 10,
        };
        let plan = PromptPlan::build("q", &ps, &budget);
        assert_eq!(plan.included.len(), 10);
        assert_eq!(plan.dropped, 2);
    }

    #[test]
    fn test_top_passage_always_included() {
        let ps = vec![passage(1, &"y".repeat(5000))];
        let budget = PromptBudget {
            max_chars: 100,
            max_passages: 10,
        };
        let plan = PromptPlan::build("q", &ps, &budget);
        assert_eq!(plan.included.len(), 1);
        assert_eq!(plan.passages[0].text.len(), 5000);
    }

    #[test]
    fn test_no_passages_renders_instructions_only() {
        let plan = PromptPlan::build("q", &[], &PromptBudget::default());
        assert!(plan.passages.is_empty());
        assert!(!plan.render().contains("PASSAGES:"));
    }
}
