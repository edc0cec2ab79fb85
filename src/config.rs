use std::{env, str::FromStr, time::Duration};

use anyhow::{anyhow, Context, Result};
use url::Url;

use crate::store::pg::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub server_host: String,
    pub server_port: u16,
    pub cors_allowed_origin: Option<String>,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub model_timeout_secs: u64,
    /// New segments an event accumulates before a batch extraction is queued.
    pub insight_every_segments: u32,
    /// Most recent segments fed to one extraction call.
    pub insight_segment_window: i64,
    pub insight_max_drafts: usize,
    pub hub_queue_capacity: usize,
    pub worker_poll_interval_ms: u64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let server_port = parse_env("SERVER_PORT", 3001)?;
        let cors_allowed_origin = env::var("CORS_ALLOWED_ORIGIN").ok();
        let openai_api_key = env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty());
        let openai_base_url = env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let openai_model = env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            database_url,
            database_max_pool_size,
            server_host,
            server_port,
            cors_allowed_origin,
            openai_api_key,
            openai_base_url,
            openai_model,
            model_timeout_secs: parse_env("MODEL_TIMEOUT_SECS", 20)?,
            insight_every_segments: parse_env("INSIGHT_EVERY_SEGMENTS", 10)?,
            insight_segment_window: parse_env("INSIGHT_SEGMENT_WINDOW", 100)?,
            insight_max_drafts: parse_env("INSIGHT_MAX_DRAFTS", 12)?,
            hub_queue_capacity: parse_env("HUB_QUEUE_CAPACITY", 256)?,
            worker_poll_interval_ms: parse_env("WORKER_POLL_INTERVAL_MS", 2000)?,
        })
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms.max(1))
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

/// Settings for a dashboard/console process following one event.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: Url,
    pub event_id: i32,
    pub reconnect_base_ms: u64,
    pub reconnect_max_attempts: u32,
    pub refresh_secs: u64,
}

impl ClientConfig {
    pub fn from_env() -> Result<Self> {
        let raw_url = env::var("NUTSHELL_SERVER_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:3001".to_string());
        let server_url = base_url(
            Url::parse(&raw_url).context("NUTSHELL_SERVER_URL must be a valid URL")?,
        );
        let event_id = env::var("NUTSHELL_EVENT_ID")
            .context("NUTSHELL_EVENT_ID must be set")?
            .parse()
            .context("NUTSHELL_EVENT_ID must be an integer")?;

        Ok(Self {
            server_url,
            event_id,
            reconnect_base_ms: parse_env("CLIENT_RECONNECT_BASE_MS", 1000)?,
            reconnect_max_attempts: parse_env("CLIENT_RECONNECT_MAX_ATTEMPTS", 5)?,
            refresh_secs: parse_env("CLIENT_REFRESH_SECS", 30)?,
        })
    }

    /// Push endpoint derived from the REST base: `http` becomes `ws`,
    /// `https` becomes `wss`, and `ws` is appended to the base path.
    pub fn ws_url(&self) -> Result<Url> {
        websocket_url(&self.server_url)
    }
}

/// Directory form of a server URL: trailing slash, no query or fragment.
/// Relative joins against it keep any path prefix.
pub fn base_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}

pub fn websocket_url(server_url: &Url) -> Result<Url> {
    let mut url = base_url(server_url.clone())
        .join("ws")
        .with_context(|| format!("cannot derive websocket URL from {server_url}"))?;
    let scheme = match server_url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(anyhow!("unsupported server URL scheme `{other}`")),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow!("cannot derive websocket URL from {server_url}"))?;
    Ok(url)
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value `{raw}`")),
        Err(_) => Ok(default),
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
