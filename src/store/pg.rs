use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde_json::Value;
use tokio::task;
use uuid::Uuid;

use super::{Store, StoreError, StoreResult};
use crate::jobs;
use crate::models::{
    AttendeeQuestion, Event, Insight, InsightChanges, Job, NewAttendeeQuestion, NewEvent,
    NewInsight, NewNotice, NewNoticeRead, NewTable, NewTranscript, Notice, Table, TableChanges,
    Transcript,
};
use crate::schema::{
    attendee_questions, events, insights, notice_reads, notices, tables, transcripts,
};

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size.max(1))
        .connection_timeout(Duration::from_secs(10))
        .build(manager)?;
    Ok(pool)
}

pub fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    let mut conn = pool.get()?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow::anyhow!("failed to run migrations: {err}"))?;
    Ok(())
}

/// Diesel-backed [`Store`]. Every call checks out a pooled connection on the
/// blocking thread pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn run<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| StoreError::Backend(format!("database pool error: {err}")))?;
            f(&mut conn).map_err(StoreError::from)
        })
        .await
        .map_err(|err| StoreError::Backend(format!("database task panicked: {err}")))?
    }
}

#[async_trait]
impl Store for PgStore {
    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        self.run(|conn| events::table.order(events::created_at.desc()).load(conn))
            .await
    }

    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        self.run(move |conn| {
            diesel::insert_into(events::table)
                .values(&event)
                .get_result(conn)
        })
        .await
    }

    async fn get_event(&self, id: i32) -> StoreResult<Event> {
        self.run(move |conn| events::table.find(id).first(conn)).await
    }

    async fn list_tables(&self, event_id: i32) -> StoreResult<Vec<Table>> {
        self.run(move |conn| {
            tables::table
                .filter(tables::event_id.eq(event_id))
                .order(tables::id.asc())
                .load(conn)
        })
        .await
    }

    async fn get_table(&self, id: i32) -> StoreResult<Table> {
        self.run(move |conn| tables::table.find(id).first(conn)).await
    }

    async fn find_table_by_join_code(&self, join_code: &str) -> StoreResult<Table> {
        let code = join_code.trim().to_ascii_uppercase();
        self.run(move |conn| {
            tables::table
                .filter(tables::join_code.eq(code))
                .first(conn)
        })
        .await
    }

    async fn create_table(&self, table: NewTable) -> StoreResult<Table> {
        self.run(move |conn| {
            diesel::insert_into(tables::table)
                .values(&table)
                .get_result(conn)
        })
        .await
    }

    async fn update_table(&self, id: i32, changes: TableChanges) -> StoreResult<Table> {
        self.run(move |conn| {
            if changes.is_empty() {
                return tables::table.find(id).first(conn);
            }
            diesel::update(tables::table.find(id))
                .set(&changes)
                .get_result(conn)
        })
        .await
    }

    async fn delete_table(&self, id: i32) -> StoreResult<()> {
        let deleted = self
            .run(move |conn| diesel::delete(tables::table.find(id)).execute(conn))
            .await?;
        if deleted == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn append_transcript(&self, transcript: NewTranscript) -> StoreResult<Transcript> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let saved: Transcript = diesel::insert_into(transcripts::table)
                    .values(&transcript)
                    .get_result(conn)?;
                diesel::update(tables::table.find(saved.table_id))
                    .set((
                        tables::last_transcript.eq(Some(saved.timestamp)),
                        tables::last_audio.eq(Some(saved.timestamp)),
                    ))
                    .execute(conn)?;
                Ok(saved)
            })
        })
        .await
    }

    async fn list_event_transcripts(
        &self,
        event_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Transcript>> {
        self.run(move |conn| {
            let mut query = transcripts::table
                .inner_join(tables::table)
                .filter(tables::event_id.eq(event_id))
                .select(transcripts::all_columns)
                .order((transcripts::timestamp.desc(), transcripts::id.desc()))
                .into_boxed();
            if let Some(limit) = limit {
                query = query.limit(limit);
            }
            query.load::<Transcript>(conn)
        })
        .await
    }

    async fn list_table_transcripts(&self, table_id: i32) -> StoreResult<Vec<Transcript>> {
        self.run(move |conn| {
            transcripts::table
                .filter(transcripts::table_id.eq(table_id))
                .order((transcripts::timestamp.desc(), transcripts::id.desc()))
                .load(conn)
        })
        .await
    }

    async fn list_insights(&self, event_id: i32) -> StoreResult<Vec<Insight>> {
        self.run(move |conn| {
            insights::table
                .filter(insights::event_id.eq(event_id))
                .order((insights::created_at.desc(), insights::id.desc()))
                .load(conn)
        })
        .await
    }

    async fn create_insights(&self, new_insights: Vec<NewInsight>) -> StoreResult<Vec<Insight>> {
        if new_insights.is_empty() {
            return Ok(Vec::new());
        }
        self.run(move |conn| {
            diesel::insert_into(insights::table)
                .values(&new_insights)
                .get_results(conn)
        })
        .await
    }

    async fn update_insight(&self, id: i32, changes: InsightChanges) -> StoreResult<Insight> {
        self.run(move |conn| {
            if changes.is_empty() {
                return insights::table.find(id).first(conn);
            }
            let changes = InsightChanges {
                updated_at: Some(Utc::now()),
                ..changes
            };
            diesel::update(insights::table.find(id))
                .set(&changes)
                .get_result(conn)
        })
        .await
    }

    async fn create_notices(
        &self,
        event_id: i32,
        table_ids: Vec<i32>,
        message: String,
    ) -> StoreResult<Vec<Notice>> {
        let rows: Vec<NewNotice> = if table_ids.is_empty() {
            vec![NewNotice {
                event_id,
                table_id: None,
                message,
            }]
        } else {
            table_ids
                .into_iter()
                .map(|table_id| NewNotice {
                    event_id,
                    table_id: Some(table_id),
                    message: message.clone(),
                })
                .collect()
        };
        self.run(move |conn| {
            diesel::insert_into(notices::table)
                .values(&rows)
                .get_results(conn)
        })
        .await
    }

    async fn list_unread_notices(&self, table_id: i32) -> StoreResult<Vec<Notice>> {
        self.run(move |conn| {
            let event_id: i32 = tables::table
                .find(table_id)
                .select(tables::event_id)
                .first(conn)?;

            let mut unread: Vec<Notice> = notices::table
                .filter(notices::table_id.eq(table_id))
                .filter(notices::is_read.eq(false))
                .load(conn)?;

            let read_here = notice_reads::table
                .filter(notice_reads::table_id.eq(table_id))
                .select(notice_reads::notice_id);
            let event_wide: Vec<Notice> = notices::table
                .filter(notices::event_id.eq(event_id))
                .filter(notices::table_id.is_null())
                .filter(notices::is_read.eq(false))
                .filter(notices::id.ne_all(read_here))
                .load(conn)?;

            unread.extend(event_wide);
            unread.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
            Ok(unread)
        })
        .await
    }

    async fn mark_notice_read(&self, id: i32, reader: Option<i32>) -> StoreResult<Notice> {
        self.run(move |conn| {
            conn.transaction(|conn| {
                let notice: Notice = notices::table.find(id).first(conn)?;
                match (notice.table_id, reader) {
                    (None, Some(table_id)) => {
                        diesel::insert_into(notice_reads::table)
                            .values(&NewNoticeRead {
                                notice_id: id,
                                table_id,
                            })
                            .on_conflict_do_nothing()
                            .execute(conn)?;
                        Ok(Notice {
                            is_read: true,
                            ..notice
                        })
                    }
                    _ => diesel::update(notices::table.find(id))
                        .set(notices::is_read.eq(true))
                        .get_result(conn),
                }
            })
        })
        .await
    }

    async fn create_question(
        &self,
        question: NewAttendeeQuestion,
    ) -> StoreResult<AttendeeQuestion> {
        self.run(move |conn| {
            diesel::insert_into(attendee_questions::table)
                .values(&question)
                .get_result(conn)
        })
        .await
    }

    async fn list_questions(&self, event_id: i32) -> StoreResult<Vec<AttendeeQuestion>> {
        self.run(move |conn| {
            attendee_questions::table
                .filter(attendee_questions::event_id.eq(event_id))
                .order((
                    attendee_questions::votes.desc(),
                    attendee_questions::created_at.desc(),
                ))
                .load(conn)
        })
        .await
    }

    async fn enqueue_job(
        &self,
        job_type: &str,
        payload: Value,
        run_after: Option<DateTime<Utc>>,
    ) -> StoreResult<Job> {
        let job_type = job_type.to_string();
        self.run(move |conn| jobs::enqueue_job(conn, &job_type, payload, run_after))
            .await
    }

    async fn reserve_job(&self, job_types: &[&str]) -> StoreResult<Option<Job>> {
        let owned: Vec<String> = job_types.iter().map(|ty| ty.to_string()).collect();
        self.run(move |conn| {
            let borrowed: Vec<&str> = owned.iter().map(String::as_str).collect();
            jobs::reserve_job(conn, &borrowed)
        })
        .await
    }

    async fn mark_job_succeeded(&self, job_id: Uuid) -> StoreResult<()> {
        self.run(move |conn| jobs::mark_job_succeeded(conn, job_id))
            .await
    }

    async fn retry_job_after(
        &self,
        job_id: Uuid,
        delay: Duration,
        error_message: &str,
    ) -> StoreResult<()> {
        let error_message = error_message.to_string();
        self.run(move |conn| jobs::retry_job_after(conn, job_id, delay, &error_message))
            .await
    }

    async fn mark_job_failed(&self, job_id: Uuid, error_message: &str) -> StoreResult<()> {
        let error_message = error_message.to_string();
        self.run(move |conn| jobs::mark_job_failed(conn, job_id, &error_message))
            .await
    }
}
