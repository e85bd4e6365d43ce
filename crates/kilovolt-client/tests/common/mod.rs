//! In-memory Kilovolt server for integration tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use futures::{SinkExt, StreamExt};
use kilovolt_client::{ClientConfig, Connector, KilovoltError, Result, Session, Transport};
use serde_json::{json, Value};

/// Server end of one in-memory connection
pub struct MockServer {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl MockServer {
    /// Next command sent by the client
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.incoming.next())
            .await
            .expect("timed out waiting for client command")
            .expect("client closed the connection");
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Next command, asserting its name
    pub async fn expect(&mut self, command: &str) -> Value {
        let received = self.recv().await;
        assert_eq!(received["command"], command, "unexpected command {}", received);
        received
    }

    /// Push a raw frame to the client
    pub fn send_raw(&self, frame: impl Into<String>) {
        self.outgoing
            .unbounded_send(frame.into())
            .expect("client dropped its stream");
    }

    pub fn send(&self, value: Value) {
        self.send_raw(value.to_string());
    }

    pub fn hello(&self) {
        self.send(json!({"type": "hello", "version": "v9"}));
    }

    pub fn reply_ok(&self, request: &Value, data: Value) {
        self.send(json!({
            "ok": true,
            "request_id": request["request_id"],
            "cmd": request["command"],
            "data": data,
        }));
    }

    pub fn reply_err(&self, request: &Value, error: &str) {
        self.send(json!({
            "ok": false,
            "request_id": request["request_id"],
            "error": error,
        }));
    }

    pub fn push(&self, key: &str, value: &str) {
        self.send(json!({"type": "push", "key": key, "new_value": value}));
    }

    /// Whether the client wrote anything not yet consumed
    pub fn has_pending_frame(&mut self) -> bool {
        matches!(self.incoming.try_next(), Ok(Some(_)))
    }
}

/// Connector handing the server half of each connection to the test
pub struct MockConnector {
    servers: mpsc::UnboundedSender<MockServer>,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _endpoint: &str) -> Result<Transport> {
        let (client_tx, server_rx) = mpsc::unbounded::<String>();
        let (server_tx, client_rx) = mpsc::unbounded::<String>();

        self.servers
            .unbounded_send(MockServer {
                incoming: server_rx,
                outgoing: server_tx,
            })
            .map_err(|e| KilovoltError::Transport(e.to_string()))?;

        Ok(Transport::new(
            client_tx.sink_map_err(|e| KilovoltError::Transport(e.to_string())),
            client_rx.map(Ok),
        ))
    }
}

/// Session wired to a mock connector, plus the stream of accepted servers
pub fn mock_session(config: ClientConfig) -> (Session, mpsc::UnboundedReceiver<MockServer>) {
    let (tx, rx) = mpsc::unbounded();
    let session = Session::with_connector(config, Arc::new(MockConnector { servers: tx }));
    (session, rx)
}

/// Wait for the next connection attempt
pub async fn accept(servers: &mut mpsc::UnboundedReceiver<MockServer>) -> MockServer {
    tokio::time::timeout(Duration::from_secs(5), servers.next())
        .await
        .expect("timed out waiting for connection")
        .expect("connector dropped")
}

/// Connect without authentication and return the server half
pub async fn connected(config: ClientConfig) -> (Session, MockServer) {
    let (session, mut servers) = mock_session(config);
    let (result, server) = tokio::join!(session.connect(), async {
        let server = accept(&mut servers).await;
        server.hello();
        server
    });
    result.expect("connect failed");
    (session, server)
}
