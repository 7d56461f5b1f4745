use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::buffer::{LogBuffer, LogLine};
use super::transport::{log_stream_endpoint, with_token, LogConnector, WsConnector};
use crate::auth::Credential;
use crate::config::ClientConfig;
use crate::error::Result;

pub const CONNECTED_MESSAGE: &str = "INFO: Log connection established.";
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Upper bound on how long a teardown waits for the close handshake.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Open => write!(f, "Open"),
            ConnectionState::Closing => write!(f, "Closing"),
        }
    }
}

struct ActiveChannel {
    id: u64,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Inner {
    credential: Option<Credential>,
    channel: Option<ActiveChannel>,
    reconnect: Option<JoinHandle<()>>,
    next_id: u64,
}

/// Owns the single live log channel of a session.
///
/// A channel is opened whenever a credential is present and none is
/// connecting or open. When the channel drops for any reason other than
/// [`LiveConnection::disconnect`], a reconnect is scheduled after a fixed
/// delay, indefinitely, for as long as the credential stays set.
#[derive(Clone)]
pub struct LiveConnection {
    inner: Arc<Mutex<Inner>>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    logs: Arc<RwLock<LogBuffer>>,
    line_tx: broadcast::Sender<LogLine>,
    connector: Arc<dyn LogConnector>,
    endpoint: Url,
    reconnect_delay: Duration,
}

impl LiveConnection {
    pub fn new(
        api_base_url: &str,
        connector: Arc<dyn LogConnector>,
        log_capacity: usize,
        reconnect_delay: Duration,
    ) -> Result<Self> {
        let endpoint = log_stream_endpoint(api_base_url)?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (line_tx, _) = broadcast::channel(256);

        Ok(Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            state_tx: Arc::new(state_tx),
            logs: Arc::new(RwLock::new(LogBuffer::new(log_capacity))),
            line_tx,
            connector,
            endpoint,
            reconnect_delay,
        })
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        Self::new(
            &config.api_base_url,
            Arc::new(WsConnector::new(config.request_timeout())),
            config.log_capacity,
            config.reconnect_delay(),
        )
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn subscribe_lines(&self) -> broadcast::Receiver<LogLine> {
        self.line_tx.subscribe()
    }

    pub async fn logs(&self) -> Vec<LogLine> {
        self.logs.read().await.snapshot()
    }

    pub async fn clear_logs(&self) {
        self.logs.write().await.clear();
    }

    pub async fn has_pending_reconnect(&self) -> bool {
        self.inner.lock().await.reconnect.is_some()
    }

    /// Adopts `credential` and opens the channel unless one is already
    /// connecting or open, in which case this is a no-op.
    pub async fn connect(&self, credential: Credential) {
        let mut inner = self.inner.lock().await;
        inner.credential = Some(credential);
        self.open_if_idle(&mut inner);
    }

    /// Drops the credential and tears the channel down without reconnecting.
    /// A reconnect that was already scheduled is cancelled.
    pub async fn disconnect(&self) {
        let active = {
            let mut inner = self.inner.lock().await;
            inner.credential = None;
            if let Some(timer) = inner.reconnect.take() {
                timer.abort();
                debug!("Pending log reconnect cancelled");
            }
            let active = inner.channel.take();
            if active.is_some() {
                self.set_state(ConnectionState::Closing);
            }
            active
        };

        if let Some(mut active) = active {
            if let Some(shutdown) = active.shutdown.take() {
                let _ = shutdown.send(());
            }
            if tokio::time::timeout(CLOSE_TIMEOUT, &mut active.task).await.is_err() {
                warn!("Log channel did not close within {:?}, aborting it", CLOSE_TIMEOUT);
                active.task.abort();
            }
            info!("Log channel closed");
        }

        let inner = self.inner.lock().await;
        if inner.channel.is_none() {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// Timer entry point. Re-checks the credential so a timer that outlived
    /// a logout does nothing.
    async fn reconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.reconnect = None;
        if inner.credential.is_none() {
            debug!("Reconnect skipped, no credential");
            return;
        }
        info!("Reconnecting log channel");
        self.open_if_idle(&mut inner);
    }

    fn open_if_idle(&self, inner: &mut Inner) {
        if inner.channel.is_some() {
            debug!("Log channel already {}, connect ignored", self.state());
            return;
        }
        let Some(credential) = inner.credential.clone() else {
            return;
        };
        if let Some(timer) = inner.reconnect.take() {
            timer.abort();
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let url = with_token(&self.endpoint, &credential);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        self.set_state(ConnectionState::Connecting);
        let task = tokio::spawn(self.clone().run_channel(id, url, shutdown_rx));

        inner.channel = Some(ActiveChannel {
            id,
            shutdown: Some(shutdown_tx),
            task,
        });
    }

    async fn run_channel(self, id: u64, url: Url, mut shutdown: oneshot::Receiver<()>) {
        let connected = tokio::select! {
            biased;
            _ = &mut shutdown => return,
            result = self.connector.connect(&url) => result,
        };

        let mut channel = match connected {
            Ok(channel) => channel,
            Err(e) => {
                warn!("Log channel connect failed: {}", e);
                self.handle_closed(id).await;
                return;
            }
        };

        if !self.mark_open(id).await {
            channel.close().await;
            return;
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    channel.close().await;
                    return;
                }
                next = channel.next_line() => match next {
                    Some(Ok(text)) => self.push_line(text).await,
                    Some(Err(e)) => {
                        // errors always end in a close, never a separate state
                        warn!("Log channel error: {}", e);
                        channel.close().await;
                        break;
                    }
                    None => {
                        info!("Log channel closed by server");
                        break;
                    }
                },
            }
        }

        self.handle_closed(id).await;
    }

    async fn mark_open(&self, id: u64) -> bool {
        let inner = self.inner.lock().await;
        match &inner.channel {
            Some(active) if active.id == id => {
                self.set_state(ConnectionState::Open);
                drop(inner);
                self.push_line(CONNECTED_MESSAGE.to_string()).await;
                true
            }
            _ => false,
        }
    }

    async fn handle_closed(&self, id: u64) {
        let mut inner = self.inner.lock().await;
        match &inner.channel {
            Some(active) if active.id == id => {}
            _ => return,
        }
        inner.channel = None;
        self.set_state(ConnectionState::Disconnected);

        if inner.credential.is_none() {
            return;
        }

        info!("Log channel lost, reconnecting in {:?}", self.reconnect_delay);
        let this = self.clone();
        let delay = self.reconnect_delay;
        inner.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            this.reconnect().await;
        }));
    }

    async fn push_line(&self, text: String) {
        let line = self.logs.write().await.append(text);
        let _ = self.line_tx.send(line);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("Log channel {} -> {}", previous, state);
        }
    }
}
