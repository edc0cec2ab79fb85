//! Model-backed enrichment: per-utterance sentiment and batch insight
//! extraction, plus the glue that persists drafts and fans them out.

use crate::models::{InsightKind, InsightStatus, NewInsight};

pub mod extract;
pub mod pipeline;
pub mod scheduler;
pub mod sentiment;

pub use extract::InsightExtractor;
pub use scheduler::ExtractionScheduler;
pub use sentiment::{LlmSentimentScorer, NeutralScorer, SentimentScorer};

/// An insight proposed by the extractor, not yet persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightDraft {
    pub kind: InsightKind,
    pub title: String,
    pub description: Option<String>,
    pub confidence: f32,
    pub related_table_ids: Vec<i32>,
    pub evidence_count: i32,
}

impl InsightDraft {
    pub fn into_new_insight(self, event_id: i32) -> NewInsight {
        NewInsight {
            event_id,
            insight_type: self.kind.as_str().to_string(),
            title: self.title,
            description: self.description,
            confidence: self.confidence,
            related_table_ids: self.related_table_ids,
            evidence_count: self.evidence_count,
            status: InsightStatus::Pending.as_str().to_string(),
        }
    }
}
