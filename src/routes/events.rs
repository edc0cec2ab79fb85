use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{Event, EventStatus, NewEvent};
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEventRequest {
    pub name: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_events(State(state): State<AppState>) -> AppResult<Json<Vec<Event>>> {
    Ok(Json(state.store.list_events().await?))
}

pub async fn get_event(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Event>> {
    Ok(Json(state.store.get_event(event_id).await?))
}

pub async fn create_event(
    State(state): State<AppState>,
    Json(payload): Json<CreateEventRequest>,
) -> AppResult<Json<Event>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    if payload.end_date < payload.start_date {
        return Err(AppError::bad_request("endDate must not precede startDate"));
    }
    let status = match payload.status.as_deref() {
        Some(raw) => raw
            .parse::<EventStatus>()
            .map_err(|err| AppError::bad_request(format!("status: {err}")))?,
        None => EventStatus::Upcoming,
    };

    let event = state
        .store
        .create_event(NewEvent {
            name: name.to_string(),
            start_date: payload.start_date,
            end_date: payload.end_date,
            location: payload
                .location
                .map(|location| location.trim().to_string())
                .filter(|location| !location.is_empty()),
            status: status.as_str().to_string(),
        })
        .await?;
    Ok(Json(event))
}
