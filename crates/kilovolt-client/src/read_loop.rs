//! Inbound frame demultiplexer
//!
//! One task per connected session. Responses complete pending requests,
//! `hello` records the protocol version, `push` events fan out to the
//! subscription registries. Bad frames are logged and skipped; the loop
//! only stops when the transport ends or fails.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;

use crate::error::KilovoltError;
use crate::pending::PendingRequestTable;
use crate::protocol::ServerMessage;
use crate::subscription::SubscriptionRegistry;
use crate::transport::FrameStream;

/// Connection lifecycle as seen by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Transport open, waiting for `hello`
    Connecting,
    Connected { version: String },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn version(&self) -> Option<&str> {
        match self {
            ConnectionState::Connected { version } => Some(version),
            _ => None,
        }
    }
}

pub(crate) struct ReadLoop {
    pending: PendingRequestTable,
    keys: Arc<SubscriptionRegistry>,
    prefixes: Arc<SubscriptionRegistry>,
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ReadLoop {
    pub(crate) fn new(
        pending: PendingRequestTable,
        keys: Arc<SubscriptionRegistry>,
        prefixes: Arc<SubscriptionRegistry>,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        Self {
            pending,
            keys,
            prefixes,
            state,
        }
    }

    /// Consume frames until the stream ends, then tear down session state
    pub(crate) async fn run(self, mut stream: FrameStream) {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(text) => self.handle_frame(&text),
                Err(e) => {
                    tracing::error!(error = %e, "Transport read failed");
                    break;
                }
            }
        }
        self.shutdown();
    }

    fn handle_frame(&self, text: &str) {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
                return;
            }
        };

        match message {
            ServerMessage::Response(response) => {
                let id = response.request_id.clone();
                if let Err(e) = self.pending.resolve(&id, response) {
                    tracing::warn!(request_id = %id, error = %e, "Response matched no pending request");
                }
            }
            ServerMessage::Hello { version } => {
                tracing::info!(version = %version, "Server hello received");
                self.state.send_replace(ConnectionState::Connected { version });
            }
            ServerMessage::Push(event) => {
                let invoked = self.keys.dispatch(&event.key, &event.new_value)
                    + self.prefixes.dispatch(&event.key, &event.new_value);
                tracing::trace!(key = %event.key, listeners = invoked, "Push dispatched");
            }
            ServerMessage::Unknown(value) => {
                tracing::warn!(message = %value, "Unhandled server message");
            }
        }
    }

    fn shutdown(&self) {
        let failed = self.pending.fail_all(KilovoltError::ConnectionClosed);
        self.keys.clear();
        self.prefixes.clear();
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!(failed_requests = failed, "Connection closed");
    }
}
