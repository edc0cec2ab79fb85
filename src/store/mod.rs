//! Persistence seam. Everything the live-sync core needs from the relational
//! store goes through [`Store`], so the HTTP layer and the worker never touch
//! diesel directly.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AttendeeQuestion, Event, Insight, InsightChanges, Job, NewAttendeeQuestion, NewEvent,
    NewInsight, NewTable, NewTranscript, Notice, Table, TableChanges, Transcript,
};

pub mod pg;

pub use pg::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("conflicting record: {0}")]
    Conflict(String),
    #[error("database error: {0}")]
    Backend(String),
}

impl From<diesel::result::Error> for StoreError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => StoreError::NotFound,
            diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                info,
            ) => StoreError::Conflict(info.message().to_string()),
            other => StoreError::Backend(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn list_events(&self) -> StoreResult<Vec<Event>>;
    async fn create_event(&self, event: NewEvent) -> StoreResult<Event>;
    async fn get_event(&self, id: i32) -> StoreResult<Event>;

    async fn list_tables(&self, event_id: i32) -> StoreResult<Vec<Table>>;
    async fn get_table(&self, id: i32) -> StoreResult<Table>;
    /// Join codes are matched case-insensitively.
    async fn find_table_by_join_code(&self, join_code: &str) -> StoreResult<Table>;
    /// Fails with [`StoreError::Conflict`] when the join code is taken.
    async fn create_table(&self, table: NewTable) -> StoreResult<Table>;
    async fn update_table(&self, id: i32, changes: TableChanges) -> StoreResult<Table>;
    async fn delete_table(&self, id: i32) -> StoreResult<()>;

    /// Persists the segment and stamps the owning table's `last_transcript`
    /// and `last_audio` with the segment timestamp.
    async fn append_transcript(&self, transcript: NewTranscript) -> StoreResult<Transcript>;
    /// Newest first.
    async fn list_event_transcripts(
        &self,
        event_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Transcript>>;
    async fn list_table_transcripts(&self, table_id: i32) -> StoreResult<Vec<Transcript>>;

    async fn list_insights(&self, event_id: i32) -> StoreResult<Vec<Insight>>;
    async fn create_insights(&self, insights: Vec<NewInsight>) -> StoreResult<Vec<Insight>>;
    async fn update_insight(&self, id: i32, changes: InsightChanges) -> StoreResult<Insight>;

    /// One notice per target table, or a single event-wide notice when
    /// `table_ids` is empty.
    async fn create_notices(
        &self,
        event_id: i32,
        table_ids: Vec<i32>,
        message: String,
    ) -> StoreResult<Vec<Notice>>;
    /// Notices addressed to the table plus event-wide notices the table has
    /// not read yet, newest first.
    async fn list_unread_notices(&self, table_id: i32) -> StoreResult<Vec<Notice>>;
    /// With a `reader`, an event-wide notice is marked read for that table
    /// only. Targeted notices, or calls without a reader, mark the row itself.
    async fn mark_notice_read(&self, id: i32, reader: Option<i32>) -> StoreResult<Notice>;

    async fn create_question(&self, question: NewAttendeeQuestion)
        -> StoreResult<AttendeeQuestion>;
    async fn list_questions(&self, event_id: i32) -> StoreResult<Vec<AttendeeQuestion>>;

    async fn enqueue_job(
        &self,
        job_type: &str,
        payload: Value,
        run_after: Option<DateTime<Utc>>,
    ) -> StoreResult<Job>;
    /// Claims the oldest runnable job of one of `job_types`, if any.
    async fn reserve_job(&self, job_types: &[&str]) -> StoreResult<Option<Job>>;
    async fn mark_job_succeeded(&self, job_id: Uuid) -> StoreResult<()>;
    async fn retry_job_after(
        &self,
        job_id: Uuid,
        delay: Duration,
        error_message: &str,
    ) -> StoreResult<()>;
    async fn mark_job_failed(&self, job_id: Uuid, error_message: &str) -> StoreResult<()>;
}
