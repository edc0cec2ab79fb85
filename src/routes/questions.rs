use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::{AttendeeQuestion, NewAttendeeQuestion};
use crate::state::AppState;
use crate::wire::EventType;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateQuestionRequest {
    pub question: String,
    #[serde(default)]
    pub asked_by: Option<String>,
    #[serde(default)]
    pub is_anonymous: Option<bool>,
}

pub async fn list_questions(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<AttendeeQuestion>>> {
    Ok(Json(state.store.list_questions(event_id).await?))
}

pub async fn create_question(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(payload): Json<CreateQuestionRequest>,
) -> AppResult<Json<AttendeeQuestion>> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err(AppError::bad_request("question must not be empty"));
    }
    state.store.get_event(event_id).await?;

    let is_anonymous = payload.is_anonymous.unwrap_or(true);
    let asked_by = if is_anonymous {
        None
    } else {
        payload
            .asked_by
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
    };

    let saved = state
        .store
        .create_question(NewAttendeeQuestion {
            event_id,
            question: question.to_string(),
            asked_by,
            is_anonymous,
        })
        .await?;
    state.hub.publish(EventType::QuestionAdded, &saved);
    Ok(Json(saved))
}
