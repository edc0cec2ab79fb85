use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use crate::error::{AppError, AppResult};
use crate::insights::pipeline;
use crate::models::{NewTranscript, Transcript};
use crate::state::AppState;
use crate::wire::EventType;

const MAX_PAGE: i64 = 1000;

#[derive(Deserialize)]
pub struct TranscriptQuery {
    #[serde(default)]
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTranscriptRequest {
    #[serde(default)]
    pub speaker: Option<String>,
    pub text: String,
    #[serde(default)]
    pub is_quote: bool,
}

pub async fn list_event_transcripts(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Query(query): Query<TranscriptQuery>,
) -> AppResult<Json<Vec<Transcript>>> {
    let limit = query.limit.map(|limit| limit.clamp(1, MAX_PAGE));
    Ok(Json(
        state.store.list_event_transcripts(event_id, limit).await?,
    ))
}

pub async fn list_table_transcripts(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
) -> AppResult<Json<Vec<Transcript>>> {
    Ok(Json(state.store.list_table_transcripts(table_id).await?))
}

/// Scores the utterance, persists it, then fans it out. Scoring can only
/// lower the result to neutral; it never fails the request.
pub async fn create_transcript(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
    Json(payload): Json<CreateTranscriptRequest>,
) -> AppResult<Json<Transcript>> {
    let text = payload.text.trim();
    if text.is_empty() {
        return Err(AppError::bad_request("text must not be empty"));
    }
    let table = state.store.get_table(table_id).await?;

    let sentiment = state.scorer.score(text).await;
    let saved = state
        .store
        .append_transcript(NewTranscript {
            table_id,
            timestamp: Utc::now(),
            speaker: payload
                .speaker
                .map(|speaker| speaker.trim().to_string())
                .filter(|speaker| !speaker.is_empty()),
            text: text.to_string(),
            sentiment,
            is_quote: payload.is_quote,
        })
        .await?;

    let reached = state.hub.publish(EventType::TranscriptAdded, &saved);
    debug!(table_id, transcript_id = saved.id, sentiment, reached, "transcript ingested");

    pipeline::note_segment(&state, table.event_id).await;
    Ok(Json(saved))
}
