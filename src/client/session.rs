use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use super::api::{ApiClient, ApiError};
use super::live::{LiveState, Retention};
use super::sync::{ConnectionState, SyncConfig, SyncManager};
use crate::config::ClientConfig;
use crate::wire::EventType;

const MIN_REFRESH: Duration = Duration::from_secs(1);

/// One client following one event: a REST snapshot, a push subscription for
/// every event type, and a periodic plus on-reconnect snapshot refresh.
/// Handlers read the shared state at dispatch time, so they always merge
/// against the current table list.
pub struct LiveSession {
    state: Arc<Mutex<LiveState>>,
    sync: SyncManager,
    api: ApiClient,
    refresh: JoinHandle<()>,
}

impl LiveSession {
    pub async fn start(config: &ClientConfig) -> anyhow::Result<Self> {
        let api = ApiClient::new(config.server_url.clone());
        let sync = SyncManager::websocket(config.ws_url()?, SyncConfig::from_client_config(config));
        let session = Self::start_with(
            api,
            sync,
            config.event_id,
            Retention::default(),
            Duration::from_secs(config.refresh_secs),
        )
        .await?;
        Ok(session)
    }

    pub async fn start_with(
        api: ApiClient,
        sync: SyncManager,
        event_id: i32,
        retention: Retention,
        refresh_every: Duration,
    ) -> Result<Self, ApiError> {
        let state = Arc::new(Mutex::new(LiveState::new(event_id, retention)));
        let snapshot = api.snapshot(event_id).await?;
        lock(&state).apply_snapshot(snapshot);
        info!(event_id, tables = lock(&state).tables().len(), "loaded event snapshot");

        for &event_type in EventType::ALL {
            let state = state.clone();
            sync.subscribe(event_type, move |data| {
                lock(&state).apply(event_type, data)?;
                Ok(())
            });
        }
        sync.connect();

        let refresh = tokio::spawn(refresh_loop(
            api.clone(),
            state.clone(),
            sync.watch_state(),
            refresh_every.max(MIN_REFRESH),
        ));

        Ok(Self {
            state,
            sync,
            api,
            refresh,
        })
    }

    pub fn event_id(&self) -> i32 {
        lock(&self.state).event_id()
    }

    /// Copy of the current state.
    pub fn state(&self) -> LiveState {
        lock(&self.state).clone()
    }

    pub fn with_state<R>(&self, read: impl FnOnce(&LiveState) -> R) -> R {
        read(&lock(&self.state))
    }

    pub fn take_notices(&self) -> Vec<crate::wire::NoticePayload> {
        lock(&self.state).take_notices()
    }

    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub async fn refresh(&self) -> Result<(), ApiError> {
        let event_id = self.event_id();
        let snapshot = self.api.snapshot(event_id).await?;
        lock(&self.state).apply_snapshot(snapshot);
        Ok(())
    }

    pub fn shutdown(self) {
        self.refresh.abort();
        self.sync.disconnect();
    }
}

async fn refresh_loop(
    api: ApiClient,
    state: Arc<Mutex<LiveState>>,
    mut connection: watch::Receiver<ConnectionState>,
    every: Duration,
) {
    let event_id = lock(&state).event_id();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => debug!(event_id, "periodic snapshot refresh"),
            changed = connection.changed() => {
                if changed.is_err() {
                    return;
                }
                if *connection.borrow_and_update() != ConnectionState::Connected {
                    continue;
                }
                debug!(event_id, "refreshing snapshot after connect");
            }
        }

        match api.snapshot(event_id).await {
            Ok(snapshot) => lock(&state).apply_snapshot(snapshot),
            Err(err) => warn!(event_id, error = %err, "snapshot refresh failed"),
        }
    }
}

fn lock(state: &Mutex<LiveState>) -> MutexGuard<'_, LiveState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
