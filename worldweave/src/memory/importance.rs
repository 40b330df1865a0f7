//! Importance scoring for new observations.
//!
//! LLM-rated when enabled and a gateway is wired; otherwise (or on any LLM
//! failure) a keyword-weighted heuristic. Scores land in [1, 10].

use std::sync::Arc;

use crate::llm::{CompletionRequest, LlmGateway};

const RATING_PROMPT: &str = "On a scale of 1 to 10, where 1 is purely mundane \
(brushing teeth, small talk) and 10 is extremely significant (a major loss, a \
life-changing decision), rate the likely importance of the following memory. \
Respond with a single number.\n\nMemory: ";

/// Rates observation importance.
pub struct ImportanceRater {
    gateway: Option<Arc<LlmGateway>>,
    use_llm: bool,
}

impl ImportanceRater {
    pub fn new(gateway: Option<Arc<LlmGateway>>, use_llm: bool) -> Self {
        Self { gateway, use_llm }
    }

    pub async fn rate(&self, content: &str) -> f64 {
        if self.use_llm {
            if let Some(gateway) = &self.gateway {
                let request = CompletionRequest::new(format!("{}{}", RATING_PROMPT, content))
                    .with_temperature(0.0);
                match gateway.complete(request).await {
                    Ok(completion) => {
                        if let Some(score) = parse_rating(&completion.content) {
                            return score;
                        }
                        tracing::debug!(
                            reply = %completion.content,
                            "unparseable importance rating, using heuristic"
                        );
                    }
                    Err(error) => {
                        tracing::debug!(%error, "importance rating failed, using heuristic");
                    }
                }
            }
        }
        heuristic_importance(content)
    }
}

fn parse_rating(reply: &str) -> Option<f64> {
    let number: String = reply
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    number.parse::<f64>().ok().map(|v| v.clamp(1.0, 10.0))
}

/// Keyword-weighted fallback. Neutral text scores 3; signal words push the
/// score up, filler words pull it down.
pub fn heuristic_importance(content: &str) -> f64 {
    const STRONG: [&str; 12] = [
        "urgent", "critical", "emergency", "important", "deadline", "failed", "error", "money",
        "paid", "received", "decision", "danger",
    ];
    const MILD: [&str; 8] = [
        "request", "sent", "new", "change", "agreed", "refused", "won", "lost",
    ];
    const MUNDANE: [&str; 6] = ["hello", "hi", "thanks", "ok", "okay", "weather"];

    let lower = content.to_lowercase();
    let mut score: f64 = 3.0;
    for word in STRONG {
        if lower.contains(word) {
            score += 1.5;
        }
    }
    for word in MILD {
        if lower.contains(word) {
            score += 0.5;
        }
    }
    for word in MUNDANE {
        if lower.contains(word) {
            score -= 0.5;
        }
    }
    if lower.contains('$') || lower.chars().any(|c| c.is_ascii_digit()) {
        score += 0.5;
    }
    score.clamp(1.0, 10.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: heuristic separates urgent money matters from small talk.
    #[test]
    fn heuristic_orders_content() {
        let urgent = heuristic_importance("URGENT: payment of $500 failed");
        let mundane = heuristic_importance("hi, nice weather today");
        assert!(urgent > mundane);
        assert!((1.0..=10.0).contains(&urgent));
        assert!((1.0..=10.0).contains(&mundane));
    }

    /// **Scenario**: LLM replies parse when numeric, clamp into range.
    #[test]
    fn rating_parse() {
        assert_eq!(parse_rating("7"), Some(7.0));
        assert_eq!(parse_rating(" 8.5 because..."), Some(8.5));
        assert_eq!(parse_rating("15"), Some(10.0));
        assert_eq!(parse_rating("no idea"), None);
    }

    /// **Scenario**: without a gateway the rater falls back to the heuristic.
    #[tokio::test]
    async fn rater_without_gateway_uses_heuristic() {
        let rater = ImportanceRater::new(None, true);
        let score = rater.rate("critical deadline tomorrow").await;
        assert!(score > 3.0);
    }
}
