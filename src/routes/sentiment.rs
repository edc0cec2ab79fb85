use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Duration, DurationRound, Utc};
use serde::Serialize;

use crate::error::AppResult;
use crate::models::Transcript;
use crate::state::AppState;

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SentimentPoint {
    /// `HH:MM` label in UTC.
    pub time: String,
    pub minute: DateTime<Utc>,
    pub sentiment: f32,
    pub samples: usize,
}

pub async fn sentiment_data(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<SentimentPoint>>> {
    let transcripts = state.store.list_event_transcripts(event_id, None).await?;
    Ok(Json(bucket_by_minute(&transcripts)))
}

/// Average sentiment per wall-clock minute, oldest minute first.
pub fn bucket_by_minute(transcripts: &[Transcript]) -> Vec<SentimentPoint> {
    let mut buckets: BTreeMap<DateTime<Utc>, (f32, usize)> = BTreeMap::new();
    for transcript in transcripts {
        let minute = transcript
            .timestamp
            .duration_trunc(Duration::minutes(1))
            .unwrap_or(transcript.timestamp);
        let bucket = buckets.entry(minute).or_insert((0.0, 0));
        bucket.0 += transcript.sentiment;
        bucket.1 += 1;
    }

    buckets
        .into_iter()
        .map(|(minute, (sum, samples))| SentimentPoint {
            time: minute.format("%H:%M").to_string(),
            minute,
            sentiment: sum / samples as f32,
            samples,
        })
        .collect()
}
