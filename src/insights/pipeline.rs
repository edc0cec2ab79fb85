use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::InsightDraft;
use crate::jobs::JOB_EXTRACT_INSIGHTS;
use crate::models::Insight;
use crate::state::AppState;
use crate::store::{StoreError, StoreResult};
use crate::wire::EventType;

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("no language model is configured")]
    NotConfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Payload of an `extract-insights` job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionJob {
    pub event_id: i32,
}

/// Loads the event's most recent segments, extracts drafts and hands them to
/// [`persist_and_publish`]. An event without segments produces nothing.
pub async fn run_extraction(
    state: &AppState,
    event_id: i32,
) -> Result<Vec<Insight>, ExtractionError> {
    let extractor = state
        .extractor
        .as_ref()
        .ok_or(ExtractionError::NotConfigured)?;

    let mut segments = state
        .store
        .list_event_transcripts(event_id, Some(state.config.insight_segment_window))
        .await?;
    if segments.is_empty() {
        return Ok(Vec::new());
    }
    segments.reverse();

    let drafts = extractor
        .extract(event_id, &segments, state.config.insight_max_drafts)
        .await;
    Ok(persist_and_publish(state, event_id, drafts).await?)
}

/// Stores drafts as `PENDING` insights, then broadcasts the saved rows as a
/// single `insights_generated` push.
pub async fn persist_and_publish(
    state: &AppState,
    event_id: i32,
    drafts: Vec<InsightDraft>,
) -> StoreResult<Vec<Insight>> {
    if drafts.is_empty() {
        return Ok(Vec::new());
    }

    let rows = drafts
        .into_iter()
        .map(|draft| draft.into_new_insight(event_id))
        .collect();
    let saved = state.store.create_insights(rows).await?;
    let reached = state.hub.publish(EventType::InsightsGenerated, &saved);
    info!(event_id, insights = saved.len(), reached, "published generated insights");
    Ok(saved)
}

/// Called once a segment has been persisted. Queues a batch extraction when
/// the event crosses the configured segment threshold. Never fails the
/// caller.
pub async fn note_segment(state: &AppState, event_id: i32) {
    if state.extractor.is_none() || !state.scheduler.record_segment(event_id) {
        return;
    }

    let payload = match serde_json::to_value(ExtractionJob { event_id }) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(event_id, error = %err, "failed to encode extraction job");
            return;
        }
    };
    match state
        .store
        .enqueue_job(JOB_EXTRACT_INSIGHTS, payload, None)
        .await
    {
        Ok(job) => info!(event_id, job_id = %job.id, "queued insight extraction"),
        Err(err) => warn!(event_id, error = %err, "failed to queue insight extraction"),
    }
}
