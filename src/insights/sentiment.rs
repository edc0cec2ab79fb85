use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::warn;

use crate::llm::{ChatRequest, LanguageModel};

const SYSTEM_PROMPT: &str = "You are a sentiment analyzer. Respond with only a number between -1 and 1 \
representing the sentiment of the text. -1 is very negative, 0 is neutral, 1 is very positive.";

/// Scores one utterance in `[-1, 1]`. Implementations never fail: anything
/// that goes wrong is reported as neutral (`0.0`).
#[async_trait]
pub trait SentimentScorer: Send + Sync {
    async fn score(&self, text: &str) -> f32;
}

/// Used when no language model is configured.
pub struct NeutralScorer;

#[async_trait]
impl SentimentScorer for NeutralScorer {
    async fn score(&self, _text: &str) -> f32 {
        0.0
    }
}

pub struct LlmSentimentScorer {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl LlmSentimentScorer {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }
}

#[async_trait]
impl SentimentScorer for LlmSentimentScorer {
    async fn score(&self, text: &str) -> f32 {
        if text.trim().is_empty() {
            return 0.0;
        }

        let request = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: text.to_string(),
            max_tokens: Some(10),
            json_mode: false,
        };

        match timeout(self.timeout, self.model.complete(request)).await {
            Ok(Ok(raw)) => parse_sentiment(&raw).unwrap_or_else(|| {
                warn!(response = %raw, "sentiment response was not a score in [-1, 1]");
                0.0
            }),
            Ok(Err(err)) => {
                warn!(error = %err, "sentiment scoring failed");
                0.0
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "sentiment scoring timed out");
                0.0
            }
        }
    }
}

/// Reads the leading number of a model reply. Anything non-numeric,
/// non-finite or outside `[-1, 1]` is rejected.
pub fn parse_sentiment(raw: &str) -> Option<f32> {
    let token = raw
        .trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
        .split_whitespace()
        .next()?
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | '"' | '\'' | '`'));
    let value: f32 = token.parse().ok()?;
    (value.is_finite() && (-1.0..=1.0).contains(&value)).then_some(value)
}
