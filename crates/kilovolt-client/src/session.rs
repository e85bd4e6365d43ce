//! Kilovolt session
//!
//! Owns the transport, the pending request table and both subscription
//! registries. `connect` opens the transport, starts the read loop, waits
//! for the server `hello` and then authenticates if a password is set.
//!
//! # Example
//! ```no_run
//! use kilovolt_client::{ClientConfig, Session};
//!
//! # async fn example() -> kilovolt_client::Result<()> {
//! let session = Session::new(ClientConfig::new("ws://localhost:4337/ws"));
//! session.connect().await?;
//!
//! session.set("stulbe/motd", "hello").await?;
//! let motd = session.get("stulbe/motd").await?;
//! assert_eq!(motd, "hello");
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::auth;
use crate::config::ClientConfig;
use crate::error::{KilovoltError, Result};
use crate::pending::PendingRequestTable;
use crate::protocol::{Command, Response};
use crate::read_loop::{ConnectionState, ReadLoop};
use crate::request_id::RequestIdGenerator;
use crate::subscription::{CommandSender, MatchMode, SubscriptionRegistry};
use crate::transport::{Connector, FrameSink, WebSocketConnector};

/// State shared between the session handle and its read loop
struct Shared {
    ids: RequestIdGenerator,
    pending: PendingRequestTable,
    keys: Arc<SubscriptionRegistry>,
    prefixes: Arc<SubscriptionRegistry>,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    state: Arc<watch::Sender<ConnectionState>>,
    request_timeout: Option<Duration>,
}

#[async_trait]
impl CommandSender for Shared {
    async fn send(&self, command: Command) -> Result<Response> {
        let id = self.ids.generate();
        let frame = command.encode(&id)?;

        // Register before writing so a fast response always finds its slot.
        // On any early return the slot drops and removes itself.
        let slot = self.pending.register(&id)?;
        {
            let mut sink = self.sink.lock().await;
            let sink = sink.as_mut().ok_or(KilovoltError::ConnectionClosed)?;
            sink.send(frame).await?;
        }
        tracing::trace!(request_id = %id, command = %command.command, "Command sent");

        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, slot)
                .await
                .map_err(|_| KilovoltError::RequestTimeout)?,
            None => slot.await,
        }
    }
}

/// Client session over a single persistent connection
pub struct Session {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create an unconnected session using the WebSocket transport
    pub fn new(config: ClientConfig) -> Self {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    /// Create an unconnected session over a custom transport
    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            ids: RequestIdGenerator::new(),
            pending: PendingRequestTable::new(),
            keys: Arc::new(SubscriptionRegistry::new(MatchMode::Exact)),
            prefixes: Arc::new(SubscriptionRegistry::new(MatchMode::Prefix)),
            sink: tokio::sync::Mutex::new(None),
            state: Arc::new(state),
            request_timeout: config.request_timeout,
        });

        Self {
            config,
            connector,
            shared,
            reader: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open the connection and complete the handshake
    ///
    /// Returns once the server `hello` has arrived and, when a password is
    /// configured, authentication has succeeded. On failure the session is
    /// closed again before the error is returned.
    pub async fn connect(&self) -> Result<()> {
        let claimed = self.shared.state.send_if_modified(|state| {
            if *state == ConnectionState::Disconnected {
                *state = ConnectionState::Connecting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(KilovoltError::AlreadyConnected);
        }

        let transport = match self.connector.connect(&self.config.endpoint).await {
            Ok(transport) => transport,
            Err(e) => {
                self.shared.state.send_replace(ConnectionState::Disconnected);
                return Err(e);
            }
        };

        self.shared.pending.reopen();
        *self.shared.sink.lock().await = Some(transport.sink);

        let mut state_rx = self.shared.state.subscribe();
        let read_loop = ReadLoop::new(
            self.shared.pending.clone(),
            self.shared.keys.clone(),
            self.shared.prefixes.clone(),
            self.shared.state.clone(),
        );
        let handle = tokio::spawn(read_loop.run(transport.stream));
        let stale = self.reader.lock().replace(handle);
        if let Some(stale) = stale {
            stale.abort();
        }

        if let Err(e) = self.handshake(&mut state_rx).await {
            tracing::warn!(endpoint = %self.config.endpoint, error = %e, "Handshake failed");
            self.close().await;
            return Err(e);
        }

        tracing::info!(
            endpoint = %self.config.endpoint,
            version = ?self.version(),
            "Session ready"
        );
        Ok(())
    }

    async fn handshake(&self, state_rx: &mut watch::Receiver<ConnectionState>) -> Result<()> {
        tokio::time::timeout(self.config.handshake_timeout, wait_for_hello(state_rx))
            .await
            .map_err(|_| KilovoltError::HandshakeTimeout)??;

        if let Some(password) = &self.config.password {
            auth::authenticate(self.shared.as_ref(), password).await?;
        }
        Ok(())
    }

    /// Send a raw command and wait for its response
    ///
    /// `ok: false` responses are returned as-is.
    pub async fn send(&self, command: Command) -> Result<Response> {
        self.shared.send(command).await
    }

    /// Close the connection
    ///
    /// Outstanding requests fail with `ConnectionClosed` and local
    /// subscriptions are dropped.
    pub async fn close(&self) {
        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
        }

        let sink = self.shared.sink.lock().await.take();
        if let Some(mut sink) = sink {
            if let Err(e) = sink.close().await {
                tracing::debug!(error = %e, "Error closing transport");
            }
        }

        let failed = self.shared.pending.fail_all(KilovoltError::ConnectionClosed);
        self.shared.keys.clear();
        self.shared.prefixes.clear();
        self.shared.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(failed_requests = failed, "Session closed");
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.shared.state.borrow().clone()
    }

    /// Whether the server hello has been received on a live connection
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Protocol version announced by the server
    pub fn version(&self) -> Option<String> {
        self.shared.state.borrow().version().map(str::to_string)
    }

    /// Resolve once the session is no longer connected
    ///
    /// Returns immediately if it is not connected now.
    pub async fn closed(&self) {
        let mut state_rx = self.shared.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = state_rx.wait_for(|state| !state.is_connected()).await;
    }

    /// Number of requests still awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    pub(crate) fn sender(&self) -> &dyn CommandSender {
        self.shared.as_ref()
    }

    pub(crate) fn registry(&self, mode: MatchMode) -> &SubscriptionRegistry {
        match mode {
            MatchMode::Exact => &self.shared.keys,
            MatchMode::Prefix => &self.shared.prefixes,
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.reader.get_mut().take() {
            handle.abort();
        }
    }
}

/// Resolve once the state leaves `Connecting`
async fn wait_for_hello(state_rx: &mut watch::Receiver<ConnectionState>) -> Result<()> {
    let connected = state_rx
        .wait_for(|state| *state != ConnectionState::Connecting)
        .await
        .map(|state| state.is_connected())
        .map_err(|_| KilovoltError::ConnectionClosed)?;

    if connected {
        Ok(())
    } else {
        Err(KilovoltError::ConnectionClosed)
    }
}
