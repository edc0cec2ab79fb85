//! Owns the single push connection of a client process, reconnects with
//! linear backoff and fans inbound envelopes out to registered handlers.

use std::{
    collections::HashMap,
    panic::{catch_unwind, AssertUnwindSafe},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, Weak,
    },
    time::Duration,
};

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tokio::{sync::watch, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::wire::{Envelope, EventType};

pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

/// Text frames of one open connection. The stream ends when the peer closes;
/// an `Err` item means the connection broke.
pub type FrameStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub base_delay: Duration,
    pub max_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

impl SyncConfig {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.reconnect_base_ms),
            max_attempts: config.reconnect_max_attempts,
        }
    }

    /// Wait before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> anyhow::Result<FrameStream>;
}

pub struct WsConnector {
    url: Url,
}

impl WsConnector {
    pub fn new(url: Url) -> Self {
        Self { url }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self) -> anyhow::Result<FrameStream> {
        let (socket, _) = connect_async(self.url.as_str()).await?;
        debug!(url = %self.url, "websocket handshake complete");

        // Reading the unsplit socket also flushes automatic pong replies.
        let frames = socket.filter_map(|frame| async move {
            match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(
                    String::from_utf8(bytes).map_err(|_| anyhow!("non UTF-8 binary frame")),
                ),
                Ok(_) => None,
                Err(err) => Some(Err(err.into())),
            }
        });
        Ok(Box::pin(frames))
    }
}

type Registry = HashMap<EventType, Vec<(u64, Handler)>>;

struct Shared {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    handlers: Mutex<Registry>,
    next_handler: AtomicU64,
    state: watch::Sender<ConnectionState>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

/// Handle returned by [`SyncManager::subscribe`].
pub struct Subscription {
    shared: Weak<Shared>,
    event_type: EventType,
    id: u64,
}

impl Subscription {
    /// Takes effect for the next dispatch. A handler that is already running
    /// finishes normally.
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            let mut handlers = shared.handlers();
            if let Some(list) = handlers.get_mut(&self.event_type) {
                list.retain(|(id, _)| *id != self.id);
            }
        }
    }
}

#[derive(Clone)]
pub struct SyncManager {
    shared: Arc<Shared>,
}

impl SyncManager {
    pub fn new(connector: Arc<dyn Connector>, config: SyncConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                config,
                connector,
                handlers: Mutex::new(HashMap::new()),
                next_handler: AtomicU64::new(1),
                state,
                driver: Mutex::new(None),
            }),
        }
    }

    pub fn websocket(url: Url, config: SyncConfig) -> Self {
        Self::new(Arc::new(WsConnector::new(url)), config)
    }

    /// Starts the connection loop unless one is already running. Calling it
    /// after the loop gave up starts over with a fresh attempt counter.
    pub fn connect(&self) {
        let mut driver = self.shared.driver();
        if driver.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        self.shared.state.send_replace(ConnectionState::Connecting);
        *driver = Some(tokio::spawn(drive(self.shared.clone())));
    }

    /// Closes the connection and forgets every handler.
    pub fn disconnect(&self) {
        if let Some(task) = self.shared.driver().take() {
            task.abort();
        }
        self.shared.handlers().clear();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        info!("push connection closed by client");
    }

    pub fn subscribe<F>(&self, event_type: EventType, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.shared.next_handler.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers()
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription {
            shared: Arc::downgrade(&self.shared),
            event_type,
            id,
        }
    }

    pub fn handler_count(&self, event_type: EventType) -> usize {
        self.shared
            .handlers()
            .get(&event_type)
            .map_or(0, Vec::len)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Runs every handler registered for the envelope's type, in
    /// registration order. Returns how many completed without error.
    pub fn dispatch(&self, envelope: &Envelope) -> usize {
        self.shared.dispatch(envelope)
    }
}

impl Shared {
    fn handlers(&self) -> MutexGuard<'_, Registry> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn driver(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn dispatch_text(&self, text: &str) {
        match Envelope::from_text(text) {
            Ok(envelope) => {
                self.dispatch(&envelope);
            }
            Err(err) => warn!(error = %err, "discarding malformed push frame"),
        }
    }

    fn dispatch(&self, envelope: &Envelope) -> usize {
        let Some(event_type) = envelope.kind() else {
            debug!(event_type = %envelope.event_type, "no handlers for unknown push type");
            return 0;
        };

        // Snapshot the list so handlers may subscribe or unsubscribe.
        let handlers: Vec<Handler> = self
            .handlers()
            .get(&event_type)
            .map(|list| list.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        let mut succeeded = 0;
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&envelope.data))) {
                Ok(Ok(())) => succeeded += 1,
                Ok(Err(err)) => {
                    warn!(event_type = %event_type, error = %err, "push handler failed")
                }
                Err(_) => error!(event_type = %event_type, "push handler panicked"),
            }
        }
        succeeded
    }
}

async fn drive(shared: Arc<Shared>) {
    let mut attempt: u32 = 0;
    loop {
        shared.state.send_replace(ConnectionState::Connecting);
        match shared.connector.connect().await {
            Ok(mut frames) => {
                attempt = 0;
                shared.state.send_replace(ConnectionState::Connected);
                info!("push connection established");
                while let Some(frame) = frames.next().await {
                    match frame {
                        Ok(text) => shared.dispatch_text(&text),
                        Err(err) => {
                            warn!(error = %err, "push connection broke");
                            break;
                        }
                    }
                }
                info!("push connection lost");
            }
            Err(err) => warn!(attempt, error = %err, "push connection attempt failed"),
        }
        shared.state.send_replace(ConnectionState::Disconnected);

        attempt += 1;
        if attempt > shared.config.max_attempts {
            warn!(
                attempts = shared.config.max_attempts,
                "giving up on push connection until reconnect is requested"
            );
            return;
        }
        let delay = shared.config.delay_for(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::time::sleep(delay).await;
    }
}
