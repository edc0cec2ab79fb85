//! Push contract shared by the hub and the client sync manager. Every
//! message is `{ "type": "<event_type>", "data": <json> }`.

use std::{fmt, str::FromStr};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::models::UnknownVariant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn new(event_type: EventType, data: Value) -> Self {
        Self {
            event_type: event_type.as_str().to_string(),
            data,
        }
    }

    /// `None` for event types this build does not know about.
    pub fn kind(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    pub fn to_text(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_text(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    pub fn decode_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        T::deserialize(&self.data)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    TableCreated,
    TableUpdated,
    TableDeleted,
    TranscriptAdded,
    InsightAdded,
    InsightUpdated,
    InsightsGenerated,
    Notice,
    QuestionAdded,
}

impl EventType {
    pub const ALL: &'static [EventType] = &[
        EventType::TableCreated,
        EventType::TableUpdated,
        EventType::TableDeleted,
        EventType::TranscriptAdded,
        EventType::InsightAdded,
        EventType::InsightUpdated,
        EventType::InsightsGenerated,
        EventType::Notice,
        EventType::QuestionAdded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TableCreated => "table_created",
            EventType::TableUpdated => "table_updated",
            EventType::TableDeleted => "table_deleted",
            EventType::TranscriptAdded => "transcript_added",
            EventType::InsightAdded => "insight_added",
            EventType::InsightUpdated => "insight_updated",
            EventType::InsightsGenerated => "insights_generated",
            EventType::Notice => "notice",
            EventType::QuestionAdded => "question_added",
        }
    }
}

impl FromStr for EventType {
    type Err = UnknownVariant;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| UnknownVariant(value.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `data` of a `notice` push. A missing or empty `tableIds` addresses the
/// whole event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoticePayload {
    pub event_id: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_ids: Option<Vec<i32>>,
    pub message: String,
}

impl NoticePayload {
    pub fn targets(&self, table_id: i32) -> bool {
        match self.table_ids.as_deref() {
            None | Some([]) => true,
            Some(ids) => ids.contains(&table_id),
        }
    }
}

/// `data` of a `table_deleted` push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDeleted {
    pub id: i32,
}
