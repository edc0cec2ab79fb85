use std::{sync::Arc, time::Duration};

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::InsightDraft;
use crate::llm::{ChatRequest, LanguageModel};
use crate::models::{InsightKind, Transcript};

const DEFAULT_CONFIDENCE: f32 = 0.8;

const SYSTEM_PROMPT: &str = r#"You are an AI analyst for a conference intelligence platform. Analyze transcripts and extract insights in JSON format.

Return a JSON object {"insights": [...]} where every insight has this structure:
{
  "type": "THEME" | "ACTION_ITEM" | "QUESTION" | "SENTIMENT_SPIKE" | "GOLDEN_NUGGET",
  "title": "Brief title",
  "description": "Detailed description",
  "confidence": 0.0-1.0,
  "relatedTableIds": [table IDs as numbers],
  "evidenceCount": number of supporting statements
}

Focus on:
- THEME: Recurring topics across multiple tables
- ACTION_ITEM: Specific tasks or follow-ups mentioned
- QUESTION: Questions that need answering
- SENTIMENT_SPIKE: Notable positive or negative reactions
- GOLDEN_NUGGET: Quotable moments or key insights"#;

#[derive(Debug, Error)]
pub enum DraftParseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("expected an insights array")]
    Shape,
}

pub struct InsightExtractor {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl InsightExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    /// Asks the model for at most `limit` drafts grounded in `segments`.
    /// A failed call or an unusable reply yields no drafts.
    pub async fn extract(
        &self,
        event_id: i32,
        segments: &[Transcript],
        limit: usize,
    ) -> Vec<InsightDraft> {
        if segments.is_empty() || limit == 0 {
            return Vec::new();
        }

        let request = ChatRequest {
            system: SYSTEM_PROMPT.to_string(),
            user: format_segments(segments),
            max_tokens: None,
            json_mode: true,
        };

        let raw = match timeout(self.timeout, self.model.complete(request)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(err)) => {
                warn!(event_id, error = %err, "insight extraction call failed");
                return Vec::new();
            }
            Err(_) => {
                warn!(event_id, "insight extraction timed out");
                return Vec::new();
            }
        };

        match parse_drafts(&raw, limit) {
            Ok(drafts) => {
                debug!(event_id, segments = segments.len(), drafts = drafts.len(), "extracted insight drafts");
                drafts
            }
            Err(err) => {
                warn!(event_id, error = %err, "insight extraction reply was malformed");
                Vec::new()
            }
        }
    }
}

pub fn format_segments(segments: &[Transcript]) -> String {
    segments
        .iter()
        .map(|segment| {
            format!(
                "[Table {}] {}: {}",
                segment.table_id,
                segment.speaker.as_deref().unwrap_or("Unknown"),
                segment.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Accepts `{"insights": [...]}` or a bare array. Items that cannot become
/// a draft are skipped one by one.
pub fn parse_drafts(raw: &str, limit: usize) -> Result<Vec<InsightDraft>, DraftParseError> {
    let items = match serde_json::from_str::<Value>(strip_code_fence(raw))? {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("insights") {
            Some(Value::Array(items)) => items,
            _ => return Err(DraftParseError::Shape),
        },
        _ => return Err(DraftParseError::Shape),
    };

    Ok(items
        .into_iter()
        .filter_map(draft_from_value)
        .take(limit)
        .collect())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDraft {
    #[serde(rename = "type")]
    kind: Option<String>,
    title: Option<String>,
    description: Option<String>,
    confidence: Option<f64>,
    #[serde(default)]
    related_table_ids: Vec<Value>,
    evidence_count: Option<f64>,
}

fn draft_from_value(value: Value) -> Option<InsightDraft> {
    let raw: RawDraft = match serde_json::from_value(value) {
        Ok(raw) => raw,
        Err(err) => {
            debug!(error = %err, "skipping undecodable insight item");
            return None;
        }
    };

    let kind = match raw.kind.as_deref().map(str::parse::<InsightKind>) {
        Some(Ok(kind)) => kind,
        _ => {
            debug!(kind = ?raw.kind, "skipping insight with unknown type");
            return None;
        }
    };
    let title = raw.title.map(|title| title.trim().to_string()).unwrap_or_default();
    if title.is_empty() {
        return None;
    }

    let confidence = raw
        .confidence
        .filter(|value| value.is_finite())
        .map(|value| value as f32)
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);
    let evidence_count = raw
        .evidence_count
        .filter(|value| value.is_finite() && *value >= 1.0)
        .map(|value| value.min(i32::MAX as f64) as i32)
        .unwrap_or(1);

    let mut related_table_ids: Vec<i32> = raw
        .related_table_ids
        .iter()
        .filter_map(|id| match id {
            Value::Number(number) => number.as_i64().and_then(|n| i32::try_from(n).ok()),
            Value::String(text) => text.trim().parse().ok(),
            _ => None,
        })
        .collect();
    related_table_ids.sort_unstable();
    related_table_ids.dedup();

    Some(InsightDraft {
        kind,
        title,
        description: raw
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        confidence,
        related_table_ids,
        evidence_count,
    })
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
