//! Client-side records keyed by join code, and the read-only filters the
//! dashboards recompute over them.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::identity::IdentityMapper;
use super::merge::Keyed;
use crate::models::{AttendeeQuestion, Insight, InsightKind, Table, Transcript};

/// A transcript segment as the UI sees it. `table_id` is kept so the entry
/// can be re-keyed once its table becomes known.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptView {
    pub id: i32,
    pub table: String,
    #[serde(skip)]
    pub table_id: i32,
    pub timestamp: DateTime<Utc>,
    pub speaker: Option<String>,
    pub text: String,
    pub sentiment: f32,
    pub is_quote: bool,
}

impl TranscriptView {
    pub fn from_wire(transcript: Transcript, mapper: &IdentityMapper) -> Self {
        Self {
            id: transcript.id,
            table: mapper.resolve(transcript.table_id),
            table_id: transcript.table_id,
            timestamp: transcript.timestamp,
            speaker: transcript.speaker,
            text: transcript.text,
            sentiment: transcript.sentiment,
            is_quote: transcript.is_quote,
        }
    }

    pub fn rekey(mut self, mapper: &IdentityMapper) -> Self {
        self.table = mapper.resolve(self.table_id);
        self
    }

    /// Still showing the raw id because its table is unknown.
    pub fn is_unmapped(&self, mapper: &IdentityMapper) -> bool {
        mapper.lookup(self.table_id).is_none()
    }
}

impl Keyed for TranscriptView {
    type Key = i32;

    fn key(&self) -> i32 {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightView {
    #[serde(flatten)]
    pub insight: Insight,
    pub related_tables: Vec<String>,
}

impl InsightView {
    pub fn from_wire(insight: Insight, mapper: &IdentityMapper) -> Self {
        let related_tables = insight
            .related_table_ids
            .iter()
            .map(|id| mapper.resolve(*id))
            .collect();
        Self {
            insight,
            related_tables,
        }
    }

    pub fn rekey(self, mapper: &IdentityMapper) -> Self {
        Self::from_wire(self.insight, mapper)
    }

    pub fn kind(&self) -> Option<InsightKind> {
        self.insight.insight_type.parse().ok()
    }
}

impl Keyed for InsightView {
    type Key = i32;

    fn key(&self) -> i32 {
        self.insight.id
    }
}

impl Keyed for Table {
    type Key = i32;

    fn key(&self) -> i32 {
        self.id
    }
}

impl Keyed for AttendeeQuestion {
    type Key = i32;

    fn key(&self) -> i32 {
        self.id
    }
}

pub fn transcripts_for_table<'a>(
    transcripts: &'a [TranscriptView],
    join_code: &str,
) -> Vec<&'a TranscriptView> {
    transcripts
        .iter()
        .filter(|segment| segment.table.eq_ignore_ascii_case(join_code))
        .collect()
}

/// Case-insensitive match on text or speaker. A blank query matches all.
pub fn search_transcripts<'a>(
    transcripts: &'a [TranscriptView],
    query: &str,
) -> Vec<&'a TranscriptView> {
    let needle = query.trim().to_lowercase();
    transcripts
        .iter()
        .filter(|segment| {
            needle.is_empty()
                || segment.text.to_lowercase().contains(&needle)
                || segment
                    .speaker
                    .as_deref()
                    .is_some_and(|speaker| speaker.to_lowercase().contains(&needle))
        })
        .collect()
}

pub fn quotes(transcripts: &[TranscriptView]) -> Vec<&TranscriptView> {
    transcripts.iter().filter(|segment| segment.is_quote).collect()
}

pub fn tables_in_session<'a>(tables: &'a [Table], session: &str) -> Vec<&'a Table> {
    tables
        .iter()
        .filter(|table| table.session.as_deref() == Some(session))
        .collect()
}

pub fn hot_tables(tables: &[Table]) -> Vec<&Table> {
    tables.iter().filter(|table| table.is_hot).collect()
}

pub fn insights_of_kind(insights: &[InsightView], kind: InsightKind) -> Vec<&InsightView> {
    insights
        .iter()
        .filter(|view| view.kind() == Some(kind))
        .collect()
}

pub fn insights_for_table<'a>(insights: &'a [InsightView], join_code: &str) -> Vec<&'a InsightView> {
    insights
        .iter()
        .filter(|view| {
            view.related_tables
                .iter()
                .any(|code| code.eq_ignore_ascii_case(join_code))
        })
        .collect()
}

/// Mean sentiment of the segments recorded at one table, if any.
pub fn average_sentiment(transcripts: &[TranscriptView], join_code: &str) -> Option<f32> {
    let scores: Vec<f32> = transcripts_for_table(transcripts, join_code)
        .into_iter()
        .map(|segment| segment.sentiment)
        .collect();
    (!scores.is_empty()).then(|| scores.iter().sum::<f32>() / scores.len() as f32)
}
