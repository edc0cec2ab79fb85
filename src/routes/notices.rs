use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::Notice;
use crate::state::AppState;
use crate::wire::{EventType, NoticePayload};

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub table_ids: Option<Vec<i32>>,
}

/// Stores one notice per addressed table (or one event-wide notice) and
/// pushes a single `notice` envelope.
pub async fn broadcast_notice(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(payload): Json<BroadcastRequest>,
) -> AppResult<Json<Vec<Notice>>> {
    let message = payload.message.trim().to_string();
    if message.is_empty() {
        return Err(AppError::bad_request("message must not be empty"));
    }
    state.store.get_event(event_id).await?;

    let saved = state
        .store
        .create_notices(
            event_id,
            payload.table_ids.clone().unwrap_or_default(),
            message.clone(),
        )
        .await?;

    let reached = state.hub.publish(
        EventType::Notice,
        &NoticePayload {
            event_id,
            table_ids: payload.table_ids,
            message,
        },
    );
    info!(event_id, notices = saved.len(), reached, "notice broadcast");
    Ok(Json(saved))
}

pub async fn list_unread_notices(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
) -> AppResult<Json<Vec<Notice>>> {
    Ok(Json(state.store.list_unread_notices(table_id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadQuery {
    #[serde(default)]
    pub table_id: Option<i32>,
}

/// `?tableId=` dismisses an event-wide notice for that table alone.
pub async fn mark_notice_read(
    State(state): State<AppState>,
    Path(notice_id): Path<i32>,
    Query(query): Query<MarkReadQuery>,
) -> AppResult<Json<Notice>> {
    Ok(Json(
        state
            .store
            .mark_notice_read(notice_id, query.table_id)
            .await?,
    ))
}
