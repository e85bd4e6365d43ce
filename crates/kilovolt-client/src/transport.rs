//! Message-framed transport
//!
//! The session only needs a sink for outbound text frames and a stream of
//! inbound ones. [`WebSocketConnector`] provides both over
//! `tokio-tungstenite`; tests plug in in-memory channels.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::error::{KilovoltError, Result};

/// Outbound text frames
pub type FrameSink = Pin<Box<dyn Sink<String, Error = KilovoltError> + Send>>;

/// Inbound text frames; ends when the connection closes
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// An open connection, split into its two halves
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

impl Transport {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<String, Error = KilovoltError> + Send + 'static,
        R: Stream<Item = Result<String>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }
}

/// Opens transports to an endpoint
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str) -> Result<Transport>;
}

/// WebSocket connector (default)
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport> {
        let (ws, _response) = connect_async(endpoint)
            .await
            .map_err(|e| KilovoltError::Transport(format!("WebSocket connect failed: {}", e)))?;
        tracing::info!(endpoint = %endpoint, "WebSocket connected");

        let (write, read) = ws.split();

        let sink = write
            .sink_map_err(KilovoltError::from)
            .with(|text: String| future::ready(Ok::<_, KilovoltError>(Message::text(text))));

        let stream = read.filter_map(|message| {
            future::ready(match message {
                Ok(message) => frame_text(message).map(Ok),
                Err(e) => Some(Err(KilovoltError::from(e))),
            })
        });

        Ok(Transport::new(sink, stream))
    }
}

/// Text payload of a data frame; control frames yield `None`
fn frame_text(message: Message) -> Option<String> {
    match message {
        Message::Text(text) => Some(text.as_str().to_owned()),
        Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
            Ok(text) => Some(text),
            Err(_) => {
                tracing::warn!(len = bytes.len(), "Dropping non-UTF-8 binary frame");
                None
            }
        },
        Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_) => None,
    }
}
