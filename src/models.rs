use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::*;

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = events)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: i32,
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = events)]
pub struct NewEvent {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub location: Option<String>,
    pub status: String,
}

/// A discussion table. `id` is the persistent numeric id; `join_code` is what
/// people type and what every client-side view keys on.
#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = tables)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub id: i32,
    pub event_id: i32,
    pub join_code: String,
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
    pub status: String,
    #[serde(default)]
    pub last_audio: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_transcript: Option<DateTime<Utc>>,
    #[serde(default)]
    pub topic: Option<String>,
    #[serde(default)]
    pub is_hot: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = tables)]
pub struct NewTable {
    pub event_id: i32,
    pub join_code: String,
    pub name: String,
    pub session: Option<String>,
    pub status: String,
    pub topic: Option<String>,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = tables)]
pub struct TableChanges {
    pub name: Option<String>,
    pub session: Option<Option<String>>,
    pub status: Option<String>,
    pub topic: Option<Option<String>>,
    pub is_hot: Option<bool>,
    pub last_audio: Option<Option<DateTime<Utc>>>,
    pub last_transcript: Option<Option<DateTime<Utc>>>,
}

impl TableChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.session.is_none()
            && self.status.is_none()
            && self.topic.is_none()
            && self.is_hot.is_none()
            && self.last_audio.is_none()
            && self.last_transcript.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = transcripts)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub id: i32,
    pub table_id: i32,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub sentiment: f32,
    #[serde(default)]
    pub is_quote: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = transcripts)]
pub struct NewTranscript {
    pub table_id: i32,
    pub timestamp: DateTime<Utc>,
    pub speaker: Option<String>,
    pub text: String,
    pub sentiment: f32,
    pub is_quote: bool,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = insights)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub id: i32,
    pub event_id: i32,
    #[serde(rename = "type")]
    pub insight_type: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub related_table_ids: Vec<i32>,
    #[serde(default)]
    pub evidence_count: i32,
    #[serde(default = "default_insight_status")]
    pub status: String,
    pub created_at: DateTime<Utc>,
    /// Bumped on every review edit; the newer copy wins when merging.
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = insights)]
pub struct NewInsight {
    pub event_id: i32,
    pub insight_type: String,
    pub title: String,
    pub description: Option<String>,
    pub confidence: f32,
    pub related_table_ids: Vec<i32>,
    pub evidence_count: i32,
    pub status: String,
}

#[derive(Debug, Clone, Default, AsChangeset)]
#[diesel(table_name = insights)]
pub struct InsightChanges {
    pub insight_type: Option<String>,
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub confidence: Option<f32>,
    pub related_table_ids: Option<Vec<i32>>,
    pub evidence_count: Option<i32>,
    pub status: Option<String>,
    /// Stamped by the store; not part of `is_empty`.
    pub updated_at: Option<DateTime<Utc>>,
}

impl InsightChanges {
    pub fn is_empty(&self) -> bool {
        self.insight_type.is_none()
            && self.title.is_none()
            && self.description.is_none()
            && self.confidence.is_none()
            && self.related_table_ids.is_none()
            && self.evidence_count.is_none()
            && self.status.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = notices)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: i32,
    pub event_id: i32,
    #[serde(default)]
    pub table_id: Option<i32>,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_read: bool,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notices)]
pub struct NewNotice {
    pub event_id: i32,
    pub table_id: Option<i32>,
    pub message: String,
}

/// Marks an event-wide notice as read for one table.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = notice_reads)]
pub struct NewNoticeRead {
    pub notice_id: i32,
    pub table_id: i32,
}

#[derive(Debug, Clone, PartialEq, Queryable, Identifiable, Serialize, Deserialize)]
#[diesel(table_name = attendee_questions)]
#[serde(rename_all = "camelCase")]
pub struct AttendeeQuestion {
    pub id: i32,
    pub event_id: i32,
    pub question: String,
    #[serde(default)]
    pub asked_by: Option<String>,
    #[serde(default = "default_true")]
    pub is_anonymous: bool,
    #[serde(default)]
    pub votes: i32,
    #[serde(default)]
    pub answered: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = attendee_questions)]
pub struct NewAttendeeQuestion {
    pub event_id: i32,
    pub question: String,
    pub asked_by: Option<String>,
    pub is_anonymous: bool,
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = jobs)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub attempts: i32,
    pub run_after: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = jobs)]
pub struct NewJob {
    pub id: Uuid,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub run_after: DateTime<Utc>,
}

fn default_confidence() -> f32 {
    0.8
}

fn default_insight_status() -> String {
    InsightStatus::Pending.as_str().to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a string-backed enum stored as `VARCHAR` and sent as
/// SCREAMING_SNAKE_CASE on the wire.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_uppercase().as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant(other.to_string())),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum!(EventStatus {
    Upcoming => "UPCOMING",
    Live => "LIVE",
    Completed => "COMPLETED",
});

string_enum!(TableStatus {
    Active => "ACTIVE",
    Degraded => "DEGRADED",
    Offline => "OFFLINE",
});

string_enum!(
    /// Classification tag carried by every insight.
    InsightKind {
        Theme => "THEME",
        ActionItem => "ACTION_ITEM",
        Question => "QUESTION",
        SentimentSpike => "SENTIMENT_SPIKE",
        GoldenNugget => "GOLDEN_NUGGET",
    }
);

string_enum!(InsightStatus {
    Pending => "PENDING",
    Approved => "APPROVED",
    Rejected => "REJECTED",
});

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insight_kind_parses_case_insensitively() {
        assert_eq!(
            "action_item".parse::<InsightKind>().unwrap(),
            InsightKind::ActionItem
        );
        assert_eq!(
            " GOLDEN_NUGGET ".parse::<InsightKind>().unwrap(),
            InsightKind::GoldenNugget
        );
        assert!("SUMMARY".parse::<InsightKind>().is_err());
    }

    #[test]
    fn insight_serializes_type_field_in_camel_case() {
        let insight = Insight {
            id: 7,
            event_id: 1,
            insight_type: InsightKind::Theme.as_str().to_string(),
            title: "Onboarding friction".into(),
            description: None,
            confidence: 0.9,
            related_table_ids: vec![3, 4],
            evidence_count: 5,
            status: "PENDING".into(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        };

        let value = serde_json::to_value(&insight).unwrap();
        assert_eq!(value["type"], "THEME");
        assert_eq!(value["relatedTableIds"], json!([3, 4]));
        assert_eq!(value["evidenceCount"], 5);
    }

    #[test]
    fn insight_decodes_with_missing_optional_fields() {
        let decoded: Insight = serde_json::from_value(json!({
            "id": 2,
            "eventId": 1,
            "type": "QUESTION",
            "title": "Who owns onboarding?",
            "createdAt": "2025-03-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(decoded.confidence, 0.8);
        assert!(decoded.related_table_ids.is_empty());
        assert_eq!(decoded.status, "PENDING");
    }
}
