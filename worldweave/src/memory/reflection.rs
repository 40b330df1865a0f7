//! Reflection synthesis configuration and prompt plumbing.

use serde::{Deserialize, Serialize};

/// When and how reflections are synthesized.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ReflectionConfig {
    pub enabled: bool,
    /// Importance accumulator level that triggers a synthesis pass.
    pub threshold: f64,
    /// Questions generated per pass.
    pub questions_per_pass: usize,
    /// Memories retrieved per question for synthesis.
    pub memories_per_question: usize,
    /// Importance assigned to every reflection (constant by design decision).
    pub reflection_importance: f64,
}

impl Default for ReflectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 10.0,
            questions_per_pass: 3,
            memories_per_question: 5,
            reflection_importance: 9.0,
        }
    }
}

pub(crate) const QUESTION_PROMPT: &str = "Given the following observations, generate {n} \
high-level questions that could be answered by analyzing them. Focus on insights, patterns, \
and beliefs.\n\nRecent observations:\n{observations}\n\nGenerate {n} questions, one per line.";

pub(crate) const SYNTHESIS_PROMPT: &str = "Based on the following memories, answer the question \
with an insightful reflection. Synthesize the information into a general insight or belief.\n\n\
Question: {question}\n\nRelevant memories:\n{memories}\n\nProvide a concise insight \
(1-2 sentences) that answers this question based on the memories.";

/// Fills the question-generation prompt.
pub(crate) fn question_prompt(observations: &[String], n: usize) -> String {
    let listed: String = observations
        .iter()
        .map(|content| format!("- {}\n", content))
        .collect();
    QUESTION_PROMPT
        .replace("{n}", &n.to_string())
        .replace("{observations}", listed.trim_end())
}

/// Fills the synthesis prompt.
pub(crate) fn synthesis_prompt(question: &str, memories: &[String]) -> String {
    let listed: String = memories
        .iter()
        .map(|content| format!("- {}\n", content))
        .collect();
    SYNTHESIS_PROMPT
        .replace("{question}", question)
        .replace("{memories}", listed.trim_end())
}

/// Splits an LLM reply into at most `n` non-empty question lines.
pub(crate) fn parse_questions(reply: &str, n: usize) -> Vec<String> {
    reply
        .lines()
        .map(|line| line.trim().trim_start_matches(['-', '*', ' ']).to_string())
        .filter(|line| !line.is_empty())
        .take(n)
        .collect()
}
