use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::insights::pipeline::{run_extraction, ExtractionError};
use crate::models::{Insight, InsightChanges, InsightKind, InsightStatus, NewInsight};
use crate::state::AppState;
use crate::utils::json::{patch_field, patch_text};
use crate::wire::EventType;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInsightRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub related_table_ids: Vec<i32>,
    #[serde(default)]
    pub evidence_count: Option<i32>,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn list_insights(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<Insight>>> {
    Ok(Json(state.store.list_insights(event_id).await?))
}

pub async fn create_insight(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(payload): Json<CreateInsightRequest>,
) -> AppResult<Json<Insight>> {
    let kind = parse_kind(&payload.kind).map_err(AppError::bad_request)?;
    let title = payload.title.trim();
    if title.is_empty() {
        return Err(AppError::bad_request("title must not be empty"));
    }
    let confidence = check_confidence(payload.confidence.unwrap_or(0.8))
        .map_err(AppError::bad_request)?;
    let status = match payload.status.as_deref() {
        Some(raw) => parse_status(raw).map_err(AppError::bad_request)?,
        None => InsightStatus::Pending,
    };
    state.store.get_event(event_id).await?;

    let row = NewInsight {
        event_id,
        insight_type: kind.as_str().to_string(),
        title: title.to_string(),
        description: payload
            .description
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty()),
        confidence,
        related_table_ids: payload.related_table_ids,
        evidence_count: payload.evidence_count.unwrap_or(1).max(0),
        status: status.as_str().to_string(),
    };
    let insight = state
        .store
        .create_insights(vec![row])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::internal("insight insert returned no row"))?;

    state.hub.publish(EventType::InsightAdded, &insight);
    Ok(Json(insight))
}

pub async fn update_insight(
    State(state): State<AppState>,
    Path(insight_id): Path<i32>,
    Json(body): Json<Value>,
) -> AppResult<Json<Insight>> {
    let changes = insight_changes(&body).map_err(AppError::bad_request)?;
    let insight = state.store.update_insight(insight_id, changes).await?;
    state.hub.publish(EventType::InsightUpdated, &insight);
    Ok(Json(insight))
}

/// Runs extraction inline over the event's recent segments.
pub async fn generate_insights(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<Insight>>> {
    if !state.model_configured() {
        return Err(AppError::service_unavailable("language model not configured"));
    }
    state.store.get_event(event_id).await?;

    match run_extraction(&state, event_id).await {
        Ok(saved) => Ok(Json(saved)),
        Err(ExtractionError::NotConfigured) => Err(AppError::service_unavailable(
            "language model not configured",
        )),
        Err(ExtractionError::Store(err)) => Err(err.into()),
    }
}

fn insight_changes(body: &Value) -> Result<InsightChanges, String> {
    let insight_type = match patch_field::<String>(body, "type")?.into_required("type")? {
        Some(raw) => Some(parse_kind(&raw)?.as_str().to_string()),
        None => None,
    };
    let status = match patch_field::<String>(body, "status")?.into_required("status")? {
        Some(raw) => Some(parse_status(&raw)?.as_str().to_string()),
        None => None,
    };
    let confidence = match patch_field::<f32>(body, "confidence")?.into_required("confidence")? {
        Some(value) => Some(check_confidence(value)?),
        None => None,
    };

    Ok(InsightChanges {
        insight_type,
        title: patch_text(body, "title")?.into_required("title")?,
        description: patch_text(body, "description")?.into_nullable(),
        confidence,
        related_table_ids: patch_field(body, "relatedTableIds")?.into_required("relatedTableIds")?,
        evidence_count: patch_field(body, "evidenceCount")?.into_required("evidenceCount")?,
        status,
        updated_at: None,
    })
}

fn parse_kind(raw: &str) -> Result<InsightKind, String> {
    raw.parse().map_err(|err| format!("type: {err}"))
}

fn parse_status(raw: &str) -> Result<InsightStatus, String> {
    raw.parse().map_err(|err| format!("status: {err}"))
}

fn check_confidence(value: f32) -> Result<f32, String> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err("confidence must be between 0 and 1".to_string())
    }
}
