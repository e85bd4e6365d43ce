//! Client for the Kilovolt key-value store
//!
//! A [`Session`] multiplexes commands over one WebSocket connection,
//! correlating responses by request id and routing key change pushes to
//! subscribed listeners.
//!
//! ```no_run
//! use kilovolt_client::{ClientConfig, Session};
//!
//! # async fn example() -> kilovolt_client::Result<()> {
//! let session = Session::new(ClientConfig::default().password("secret"));
//! session.connect().await?;
//!
//! session
//!     .subscribe_prefix("twitch/", |key, value| println!("{} = {}", key, value))
//!     .await?;
//! println!("{:?}", session.list("twitch/").await?);
//! # Ok(())
//! # }
//! ```

mod auth;
mod commands;
mod config;
mod error;
mod pending;
mod protocol;
mod read_loop;
mod request_id;
mod session;
mod subscription;
mod transport;

pub use auth::{sign_challenge, LoginChallenge};
pub use config::{ClientConfig, DEFAULT_ENDPOINT};
pub use error::{KilovoltError, Result};
pub use pending::{PendingRequestTable, PendingSlot};
pub use read_loop::ConnectionState;
pub use request_id::{RequestIdGenerator, REQUEST_ID_LEN};
pub use session::Session;
pub use subscription::{CommandSender, Listener, ListenerId, MatchMode, SubscriptionRegistry};
pub use transport::{Connector, FrameSink, FrameStream, Transport, WebSocketConnector};

// Re-export protocol types for raw `send` usage
pub use protocol::{names, Command, PushEvent, Response, ServerMessage};
