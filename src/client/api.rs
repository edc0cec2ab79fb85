use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use url::Url;

use super::live::Snapshot;
use crate::config::base_url;
use crate::models::{AttendeeQuestion, Insight, Notice, Table, Transcript};

/// Number of recent segments pulled into a snapshot.
pub const SNAPSHOT_TRANSCRIPT_LIMIT: i64 = 500;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },
    #[error("invalid request URL: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// REST calls used to build and refresh a client snapshot. Paths resolve
/// under the base URL, so a server mounted below a prefix works too.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(http: Client, base: Url) -> Self {
        Self {
            http,
            base: base_url(base),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }

    pub async fn tables(&self, event_id: i32) -> Result<Vec<Table>, ApiError> {
        self.get_json(&format!("api/events/{event_id}/tables")).await
    }

    pub async fn event_transcripts(
        &self,
        event_id: i32,
        limit: i64,
    ) -> Result<Vec<Transcript>, ApiError> {
        self.get_json(&format!("api/events/{event_id}/transcripts?limit={limit}"))
            .await
    }

    pub async fn insights(&self, event_id: i32) -> Result<Vec<Insight>, ApiError> {
        self.get_json(&format!("api/events/{event_id}/insights")).await
    }

    pub async fn questions(&self, event_id: i32) -> Result<Vec<AttendeeQuestion>, ApiError> {
        self.get_json(&format!("api/events/{event_id}/questions")).await
    }

    pub async fn unread_notices(&self, table_id: i32) -> Result<Vec<Notice>, ApiError> {
        self.get_json(&format!("api/tables/{table_id}/notices")).await
    }

    /// Fetches the four collections concurrently.
    pub async fn snapshot(&self, event_id: i32) -> Result<Snapshot, ApiError> {
        let (tables, transcripts, insights, questions) = tokio::try_join!(
            self.tables(event_id),
            self.event_transcripts(event_id, SNAPSHOT_TRANSCRIPT_LIMIT),
            self.insights(event_id),
            self.questions(event_id),
        )?;
        Ok(Snapshot {
            tables,
            transcripts,
            insights,
            questions,
        })
    }

    pub async fn join_table(&self, join_code: &str) -> Result<Table, ApiError> {
        self.get_json(&format!("api/tables/{}/join", join_code.trim().to_uppercase()))
            .await
    }

    /// With `table_id`, an event-wide notice is dismissed for that table only.
    pub async fn mark_notice_read(
        &self,
        notice_id: i32,
        table_id: Option<i32>,
    ) -> Result<Notice, ApiError> {
        let mut url = self.endpoint(&format!("api/notices/{notice_id}/read"))?;
        if let Some(table_id) = table_id {
            url.query_pairs_mut()
                .append_pair("tableId", &table_id.to_string());
        }
        let response = self.http.post(url).send().await?;
        decode(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        let response = self.http.get(url).send().await?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err(ApiError::Status { status, message })
}
