use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};
use crate::models::{NewTable, Table, TableChanges, TableStatus};
use crate::state::AppState;
use crate::store::StoreError;
use crate::utils::json::{patch_field, patch_text};
use crate::wire::{EventType, TableDeleted};

pub const JOIN_CODE_LEN: usize = 6;
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const JOIN_CODE_ATTEMPTS: usize = 5;

#[derive(Deserialize)]
pub struct CreateTableRequest {
    pub name: String,
    #[serde(default)]
    pub session: Option<String>,
    #[serde(default)]
    pub topic: Option<String>,
}

pub fn generate_join_code() -> String {
    let mut rng = rand::thread_rng();
    (0..JOIN_CODE_LEN)
        .map(|_| JOIN_CODE_ALPHABET[rng.gen_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

pub async fn list_tables(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
) -> AppResult<Json<Vec<Table>>> {
    Ok(Json(state.store.list_tables(event_id).await?))
}

pub async fn create_table(
    State(state): State<AppState>,
    Path(event_id): Path<i32>,
    Json(payload): Json<CreateTableRequest>,
) -> AppResult<Json<Table>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }
    state.store.get_event(event_id).await?;

    let mut created = None;
    for attempt in 1..=JOIN_CODE_ATTEMPTS {
        let row = NewTable {
            event_id,
            join_code: generate_join_code(),
            name: name.to_string(),
            session: non_blank(payload.session.as_deref()),
            status: TableStatus::Offline.as_str().to_string(),
            topic: non_blank(payload.topic.as_deref()),
        };
        match state.store.create_table(row).await {
            Ok(table) => {
                created = Some(table);
                break;
            }
            Err(StoreError::Conflict(_)) => {
                debug!(event_id, attempt, "join code collision; retrying");
            }
            Err(err) => return Err(err.into()),
        }
    }
    let table = created.ok_or_else(|| AppError::conflict("could not allocate a unique join code"))?;

    state.hub.publish(EventType::TableCreated, &table);
    info!(table_id = table.id, join_code = %table.join_code, "table created");
    Ok(Json(table))
}

pub async fn update_table(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
    Json(body): Json<Value>,
) -> AppResult<Json<Table>> {
    let changes = table_changes(&body).map_err(AppError::bad_request)?;
    let table = state.store.update_table(table_id, changes).await?;
    state.hub.publish(EventType::TableUpdated, &table);
    Ok(Json(table))
}

pub async fn delete_table(
    State(state): State<AppState>,
    Path(table_id): Path<i32>,
) -> AppResult<Json<Value>> {
    state.store.delete_table(table_id).await?;
    state
        .hub
        .publish(EventType::TableDeleted, &TableDeleted { id: table_id });
    info!(table_id, "table deleted");
    Ok(Json(json!({ "success": true })))
}

/// Looks a table up by join code and marks it live.
pub async fn join_table(
    State(state): State<AppState>,
    Path(join_code): Path<String>,
) -> AppResult<Json<Table>> {
    let table = state.store.find_table_by_join_code(&join_code).await?;
    let changes = TableChanges {
        status: Some(TableStatus::Active.as_str().to_string()),
        last_audio: Some(Some(Utc::now())),
        ..TableChanges::default()
    };
    let joined = state.store.update_table(table.id, changes).await?;
    state.hub.publish(EventType::TableUpdated, &joined);
    Ok(Json(joined))
}

fn table_changes(body: &Value) -> Result<TableChanges, String> {
    let name = patch_text(body, "name")?.into_required("name")?;
    let status = match patch_field::<String>(body, "status")?.into_required("status")? {
        Some(raw) => Some(
            raw.parse::<TableStatus>()
                .map_err(|err| format!("status: {err}"))?
                .as_str()
                .to_string(),
        ),
        None => None,
    };

    Ok(TableChanges {
        name,
        session: patch_text(body, "session")?.into_nullable(),
        status,
        topic: patch_text(body, "topic")?.into_nullable(),
        is_hot: patch_field(body, "isHot")?.into_required("isHot")?,
        ..TableChanges::default()
    })
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
