use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use nutshell::config::AppConfig;
use nutshell::jobs::{STATUS_FAILED, STATUS_PROCESSING, STATUS_QUEUED, STATUS_SUCCEEDED};
use nutshell::llm::{ChatRequest, LanguageModel, ModelError};
use nutshell::models::{
    AttendeeQuestion, Event, Insight, InsightChanges, Job, NewAttendeeQuestion, NewEvent,
    NewInsight, NewTable, NewTranscript, Notice, Table, TableChanges, Transcript,
};
use nutshell::routes;
use nutshell::state::AppState;
use nutshell::store::{Store, StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tower::util::ServiceExt;
use uuid::Uuid;

#[derive(Default)]
struct Rows {
    next_id: i32,
    events: Vec<Event>,
    tables: Vec<Table>,
    transcripts: Vec<Transcript>,
    insights: Vec<Insight>,
    notices: Vec<Notice>,
    notice_reads: HashSet<(i32, i32)>,
    questions: Vec<AttendeeQuestion>,
    jobs: Vec<Job>,
}

impl Rows {
    fn id(&mut self) -> i32 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory [`Store`] with the same ordering and conflict rules as the
/// Postgres one.
#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<Rows>,
}

impl FakeStore {
    #[allow(dead_code)]
    pub async fn jobs_by_type(&self, job_type: &str) -> Vec<Job> {
        let rows = self.rows.lock().await;
        rows.jobs
            .iter()
            .filter(|job| job.job_type == job_type)
            .cloned()
            .collect()
    }

    #[allow(dead_code)]
    pub async fn table(&self, id: i32) -> Option<Table> {
        let rows = self.rows.lock().await;
        rows.tables.iter().find(|table| table.id == id).cloned()
    }
}

#[async_trait]
impl Store for FakeStore {
    async fn list_events(&self) -> StoreResult<Vec<Event>> {
        let rows = self.rows.lock().await;
        Ok(rows.events.iter().rev().cloned().collect())
    }

    async fn create_event(&self, event: NewEvent) -> StoreResult<Event> {
        let mut rows = self.rows.lock().await;
        let saved = Event {
            id: rows.id(),
            name: event.name,
            start_date: event.start_date,
            end_date: event.end_date,
            location: event.location,
            status: event.status,
            created_at: Utc::now(),
        };
        rows.events.push(saved.clone());
        Ok(saved)
    }

    async fn get_event(&self, id: i32) -> StoreResult<Event> {
        let rows = self.rows.lock().await;
        rows.events
            .iter()
            .find(|event| event.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn list_tables(&self, event_id: i32) -> StoreResult<Vec<Table>> {
        let rows = self.rows.lock().await;
        Ok(rows
            .tables
            .iter()
            .filter(|table| table.event_id == event_id)
            .cloned()
            .collect())
    }

    async fn get_table(&self, id: i32) -> StoreResult<Table> {
        let rows = self.rows.lock().await;
        rows.tables
            .iter()
            .find(|table| table.id == id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn find_table_by_join_code(&self, join_code: &str) -> StoreResult<Table> {
        let code = join_code.trim().to_ascii_uppercase();
        let rows = self.rows.lock().await;
        rows.tables
            .iter()
            .find(|table| table.join_code == code)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn create_table(&self, table: NewTable) -> StoreResult<Table> {
        let mut rows = self.rows.lock().await;
        if rows.tables.iter().any(|row| row.join_code == table.join_code) {
            return Err(StoreError::Conflict("join code taken".into()));
        }
        let saved = Table {
            id: rows.id(),
            event_id: table.event_id,
            join_code: table.join_code,
            name: table.name,
            session: table.session,
            status: table.status,
            last_audio: None,
            last_transcript: None,
            topic: table.topic,
            is_hot: false,
            created_at: Utc::now(),
        };
        rows.tables.push(saved.clone());
        Ok(saved)
    }

    async fn update_table(&self, id: i32, changes: TableChanges) -> StoreResult<Table> {
        let mut rows = self.rows.lock().await;
        let table = rows
            .tables
            .iter_mut()
            .find(|table| table.id == id)
            .ok_or(StoreError::NotFound)?;
        if let Some(name) = changes.name {
            table.name = name;
        }
        if let Some(session) = changes.session {
            table.session = session;
        }
        if let Some(status) = changes.status {
            table.status = status;
        }
        if let Some(topic) = changes.topic {
            table.topic = topic;
        }
        if let Some(is_hot) = changes.is_hot {
            table.is_hot = is_hot;
        }
        if let Some(last_audio) = changes.last_audio {
            table.last_audio = last_audio;
        }
        if let Some(last_transcript) = changes.last_transcript {
            table.last_transcript = last_transcript;
        }
        Ok(table.clone())
    }

    async fn delete_table(&self, id: i32) -> StoreResult<()> {
        let mut rows = self.rows.lock().await;
        let before = rows.tables.len();
        rows.tables.retain(|table| table.id != id);
        if rows.tables.len() == before {
            return Err(StoreError::NotFound);
        }
        rows.transcripts.retain(|segment| segment.table_id != id);
        rows.notices.retain(|notice| notice.table_id != Some(id));
        Ok(())
    }

    async fn append_transcript(&self, transcript: NewTranscript) -> StoreResult<Transcript> {
        let mut rows = self.rows.lock().await;
        let id = rows.id();
        let table = rows
            .tables
            .iter_mut()
            .find(|table| table.id == transcript.table_id)
            .ok_or(StoreError::NotFound)?;
        table.last_transcript = Some(transcript.timestamp);
        table.last_audio = Some(transcript.timestamp);
        let saved = Transcript {
            id,
            table_id: transcript.table_id,
            timestamp: transcript.timestamp,
            speaker: transcript.speaker,
            text: transcript.text,
            sentiment: transcript.sentiment,
            is_quote: transcript.is_quote,
        };
        rows.transcripts.push(saved.clone());
        Ok(saved)
    }

    async fn list_event_transcripts(
        &self,
        event_id: i32,
        limit: Option<i64>,
    ) -> StoreResult<Vec<Transcript>> {
        let rows = self.rows.lock().await;
        let tables: Vec<i32> = rows
            .tables
            .iter()
            .filter(|table| table.event_id == event_id)
            .map(|table| table.id)
            .collect();
        let mut segments: Vec<Transcript> = rows
            .transcripts
            .iter()
            .filter(|segment| tables.contains(&segment.table_id))
            .cloned()
            .collect();
        segments.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        if let Some(limit) = limit {
            segments.truncate(limit.max(0) as usize);
        }
        Ok(segments)
    }

    async fn list_table_transcripts(&self, table_id: i32) -> StoreResult<Vec<Transcript>> {
        let rows = self.rows.lock().await;
        let mut segments: Vec<Transcript> = rows
            .transcripts
            .iter()
            .filter(|segment| segment.table_id == table_id)
            .cloned()
            .collect();
        segments.sort_by(|a, b| (b.timestamp, b.id).cmp(&(a.timestamp, a.id)));
        Ok(segments)
    }

    async fn list_insights(&self, event_id: i32) -> StoreResult<Vec<Insight>> {
        let rows = self.rows.lock().await;
        let mut insights: Vec<Insight> = rows
            .insights
            .iter()
            .filter(|insight| insight.event_id == event_id)
            .cloned()
            .collect();
        insights.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(insights)
    }

    async fn create_insights(&self, insights: Vec<NewInsight>) -> StoreResult<Vec<Insight>> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let mut saved = Vec::with_capacity(insights.len());
        for insight in insights {
            let row = Insight {
                id: rows.id(),
                event_id: insight.event_id,
                insight_type: insight.insight_type,
                title: insight.title,
                description: insight.description,
                confidence: insight.confidence,
                related_table_ids: insight.related_table_ids,
                evidence_count: insight.evidence_count,
                status: insight.status,
                created_at: now,
                updated_at: now,
            };
            rows.insights.push(row.clone());
            saved.push(row);
        }
        Ok(saved)
    }

    async fn update_insight(&self, id: i32, changes: InsightChanges) -> StoreResult<Insight> {
        let mut rows = self.rows.lock().await;
        let insight = rows
            .insights
            .iter_mut()
            .find(|insight| insight.id == id)
            .ok_or(StoreError::NotFound)?;
        if !changes.is_empty() {
            insight.updated_at = Utc::now();
        }
        if let Some(kind) = changes.insight_type {
            insight.insight_type = kind;
        }
        if let Some(title) = changes.title {
            insight.title = title;
        }
        if let Some(description) = changes.description {
            insight.description = description;
        }
        if let Some(confidence) = changes.confidence {
            insight.confidence = confidence;
        }
        if let Some(related) = changes.related_table_ids {
            insight.related_table_ids = related;
        }
        if let Some(evidence) = changes.evidence_count {
            insight.evidence_count = evidence;
        }
        if let Some(status) = changes.status {
            insight.status = status;
        }
        Ok(insight.clone())
    }

    async fn create_notices(
        &self,
        event_id: i32,
        table_ids: Vec<i32>,
        message: String,
    ) -> StoreResult<Vec<Notice>> {
        let mut rows = self.rows.lock().await;
        let targets: Vec<Option<i32>> = if table_ids.is_empty() {
            vec![None]
        } else {
            table_ids.into_iter().map(Some).collect()
        };
        let mut saved = Vec::new();
        for table_id in targets {
            let notice = Notice {
                id: rows.id(),
                event_id,
                table_id,
                message: message.clone(),
                created_at: Utc::now(),
                is_read: false,
            };
            rows.notices.push(notice.clone());
            saved.push(notice);
        }
        Ok(saved)
    }

    async fn list_unread_notices(&self, table_id: i32) -> StoreResult<Vec<Notice>> {
        let rows = self.rows.lock().await;
        let event_id = rows
            .tables
            .iter()
            .find(|table| table.id == table_id)
            .map(|table| table.event_id)
            .ok_or(StoreError::NotFound)?;
        Ok(rows
            .notices
            .iter()
            .rev()
            .filter(|notice| !notice.is_read)
            .filter(|notice| match notice.table_id {
                Some(target) => target == table_id,
                None => {
                    notice.event_id == event_id
                        && !rows.notice_reads.contains(&(notice.id, table_id))
                }
            })
            .cloned()
            .collect())
    }

    async fn mark_notice_read(&self, id: i32, reader: Option<i32>) -> StoreResult<Notice> {
        let mut rows = self.rows.lock().await;
        let index = rows
            .notices
            .iter()
            .position(|notice| notice.id == id)
            .ok_or(StoreError::NotFound)?;
        match (rows.notices[index].table_id, reader) {
            (None, Some(table_id)) => {
                rows.notice_reads.insert((id, table_id));
                Ok(Notice {
                    is_read: true,
                    ..rows.notices[index].clone()
                })
            }
            _ => {
                rows.notices[index].is_read = true;
                Ok(rows.notices[index].clone())
            }
        }
    }

    async fn create_question(
        &self,
        question: NewAttendeeQuestion,
    ) -> StoreResult<AttendeeQuestion> {
        let mut rows = self.rows.lock().await;
        let saved = AttendeeQuestion {
            id: rows.id(),
            event_id: question.event_id,
            question: question.question,
            asked_by: question.asked_by,
            is_anonymous: question.is_anonymous,
            votes: 0,
            answered: false,
            created_at: Utc::now(),
        };
        rows.questions.push(saved.clone());
        Ok(saved)
    }

    async fn list_questions(&self, event_id: i32) -> StoreResult<Vec<AttendeeQuestion>> {
        let rows = self.rows.lock().await;
        let mut questions: Vec<AttendeeQuestion> = rows
            .questions
            .iter()
            .filter(|question| question.event_id == event_id)
            .cloned()
            .collect();
        questions.sort_by(|a, b| (b.votes, b.created_at).cmp(&(a.votes, a.created_at)));
        Ok(questions)
    }

    async fn enqueue_job(
        &self,
        job_type: &str,
        payload: Value,
        run_after: Option<DateTime<Utc>>,
    ) -> StoreResult<Job> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            job_type: job_type.to_string(),
            payload,
            status: STATUS_QUEUED.to_string(),
            attempts: 0,
            run_after: run_after.unwrap_or(now),
            last_error: None,
            created_at: now,
            updated_at: now,
        };
        rows.jobs.push(job.clone());
        Ok(job)
    }

    async fn reserve_job(&self, job_types: &[&str]) -> StoreResult<Option<Job>> {
        let mut rows = self.rows.lock().await;
        let now = Utc::now();
        let Some(job) = rows.jobs.iter_mut().find(|job| {
            job.status == STATUS_QUEUED
                && job.run_after <= now
                && job_types.contains(&job.job_type.as_str())
        }) else {
            return Ok(None);
        };
        job.status = STATUS_PROCESSING.to_string();
        job.attempts += 1;
        job.updated_at = now;
        Ok(Some(job.clone()))
    }

    async fn mark_job_succeeded(&self, job_id: Uuid) -> StoreResult<()> {
        self.set_job(job_id, |job| job.status = STATUS_SUCCEEDED.to_string())
            .await
    }

    async fn retry_job_after(
        &self,
        job_id: Uuid,
        delay: Duration,
        error_message: &str,
    ) -> StoreResult<()> {
        let run_after = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(30));
        let error_message = error_message.to_string();
        self.set_job(job_id, move |job| {
            job.status = STATUS_QUEUED.to_string();
            job.run_after = run_after;
            job.last_error = Some(error_message);
        })
        .await
    }

    async fn mark_job_failed(&self, job_id: Uuid, error_message: &str) -> StoreResult<()> {
        let error_message = error_message.to_string();
        self.set_job(job_id, move |job| {
            job.status = STATUS_FAILED.to_string();
            job.last_error = Some(error_message);
        })
        .await
    }
}

impl FakeStore {
    async fn set_job(&self, job_id: Uuid, update: impl FnOnce(&mut Job)) -> StoreResult<()> {
        let mut rows = self.rows.lock().await;
        let job = rows
            .jobs
            .iter_mut()
            .find(|job| job.id == job_id)
            .ok_or(StoreError::NotFound)?;
        update(job);
        job.updated_at = Utc::now();
        Ok(())
    }
}

/// Scripted language model. JSON-mode requests are extraction calls, the
/// rest are sentiment calls.
#[derive(Default)]
pub struct FakeModel {
    pub sentiment_reply: Option<String>,
    pub sentiment_delay: Option<Duration>,
    pub extraction_reply: Option<String>,
}

#[async_trait]
impl LanguageModel for FakeModel {
    async fn complete(&self, request: ChatRequest) -> Result<String, ModelError> {
        if request.json_mode {
            return self.extraction_reply.clone().ok_or(ModelError::Empty);
        }
        if let Some(delay) = self.sentiment_delay {
            tokio::time::sleep(delay).await;
        }
        self.sentiment_reply.clone().ok_or(ModelError::Empty)
    }
}

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://unused".to_string(),
        database_max_pool_size: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        cors_allowed_origin: None,
        openai_api_key: None,
        openai_base_url: "http://127.0.0.1:9".to_string(),
        openai_model: "test-model".to_string(),
        model_timeout_secs: 1,
        insight_every_segments: 10,
        insight_segment_window: 100,
        insight_max_drafts: 12,
        hub_queue_capacity: 64,
        worker_poll_interval_ms: 10,
    }
}

pub struct TestApp {
    pub state: AppState,
    pub store: Arc<FakeStore>,
    router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::build(test_config(), None)
    }

    #[allow(dead_code)]
    pub fn with_model(model: FakeModel, config: AppConfig) -> Self {
        Self::build(config, Some(Arc::new(model)))
    }

    fn build(config: AppConfig, model: Option<Arc<dyn LanguageModel>>) -> Self {
        let store = Arc::new(FakeStore::default());
        let store_for_state: Arc<dyn Store> = store.clone();
        let state = AppState::new(config, store_for_state, model);
        let router = routes::create_router(state.clone());
        Self {
            state,
            store,
            router,
        }
    }

    /// Serves the router on an ephemeral port.
    #[allow(dead_code)]
    pub async fn spawn_server(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let router = self.router.clone();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(addr)
    }

    /// Registers a raw hub connection to observe broadcasts.
    #[allow(dead_code)]
    pub fn listen(&self) -> mpsc::Receiver<String> {
        self.state.hub.connect().1
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload).await
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload).await
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    /// Creates an event and returns its id.
    #[allow(dead_code)]
    pub async fn seed_event(&self, name: &str) -> Result<i32> {
        let response = self
            .post_json(
                "/api/events",
                &json!({
                    "name": name,
                    "startDate": "2025-03-01T09:00:00Z",
                    "endDate": "2025-03-01T18:00:00Z",
                    "status": "LIVE"
                }),
            )
            .await?;
        let event: Event = read_json(response).await?;
        Ok(event.id)
    }

    #[allow(dead_code)]
    pub async fn seed_table(&self, event_id: i32, name: &str) -> Result<Table> {
        let response = self
            .post_json(
                &format!("/api/events/{event_id}/tables"),
                &json!({ "name": name }),
            )
            .await?;
        read_json(response).await
    }
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

pub async fn read_json<T: DeserializeOwned>(response: hyper::Response<Body>) -> Result<T> {
    let status = response.status();
    let body = body_to_vec(response.into_body()).await?;
    serde_json::from_slice(&body).map_err(|err| {
        anyhow!(
            "unexpected body for status {status}: {err}: {}",
            String::from_utf8_lossy(&body)
        )
    })
}

/// Collects every envelope already queued on a hub receiver.
#[allow(dead_code)]
pub fn drain(receiver: &mut mpsc::Receiver<String>) -> Vec<Value> {
    let mut envelopes = Vec::new();
    while let Ok(text) = receiver.try_recv() {
        if let Ok(value) = serde_json::from_str(&text) {
            envelopes.push(value);
        }
    }
    envelopes
}

/// Polls `check` until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn eventually(mut check: impl FnMut() -> bool) -> Result<()> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Err(anyhow!("condition not met within 5s"))
}
