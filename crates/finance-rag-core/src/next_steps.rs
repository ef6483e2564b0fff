//! Heuristic follow-up suggestions.
//!
//! Used when a backend returns no next steps of its own, and for
//! responses where no backend was called.

/// Upper bound on suggestions returned.
pub const MAX_SUGGESTIONS: usize = 5;

const LONG_ANSWER_CHARS: usize = 700;
const MANY_KEY_POINTS: usize = 4;
const PLANNING_TERMS: [&str; 3] = ["requirement", "plan", "steps"];

/// Suggest next steps from the shape of the question and answer.
pub fn suggest_next_steps(question: &str, answer: &str, key_points: &[String]) -> Vec<String> {
    let mut steps = vec!["Provide a follow-up question".to_string()];

    if answer.chars().count() > LONG_ANSWER_CHARS || key_points.len() > MANY_KEY_POINTS {
        steps.push("Request a shorter summary".to_string());
    }
    if !key_points.is_empty() {
        steps.push("Deep dive into one key point".to_string());
    }
    let q = question.to_lowercase();
    if PLANNING_TERMS.iter().any(|t| q.contains(t)) {
        steps.push("Create an action plan".to_string());
    }

    steps.truncate(MAX_SUGGESTIONS);
    steps
}

/// Suggestions for a question with no supporting documents.
pub fn no_context_next_steps() -> Vec<String> {
    vec![
        "Upload documents related to this question".to_string(),
        "Rephrase the question with more specific terms".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_always_offers_follow_up() {
        let steps = suggest_next_steps("What is APR?", "APR is 5%.", &[]);
        assert_eq!(steps, vec!["Provide a follow-up question"]);
    }

    #[test]
    fn test_long_answer_and_key_points() {
        let points: Vec<String> = (0..5).map(|i| format!("point {i}")).collect();
        let steps = suggest_next_steps("Explain fees", "short", &points);
        assert!(steps.contains(&"Request a shorter summary".to_string()));
        assert!(steps.contains(&"Deep dive into one key point".to_string()));

        let long = "x".repeat(701);
        let steps = suggest_next_steps("Explain fees", &long, &[]);
        assert!(steps.contains(&"Request a shorter summary".to_string()));
    }

    #[test]
    fn test_planning_question() {
        let steps = suggest_next_steps("What are the steps to refinance?", "a", &["k".into()]);
        assert_eq!(steps.last().map(String::as_str), Some("Create an action plan"));
        assert!(steps.len() <= MAX_SUGGESTIONS);
    }
}
