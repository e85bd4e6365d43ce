//! Wire protocol types
//!
//! JSON messages exchanged over text frames. Outbound commands carry a
//! `request_id`; inbound frames are either responses to those commands or
//! server events discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{KilovoltError, Result};

/// Command names understood by the server
pub mod names {
    pub const GET: &str = "kget";
    pub const GET_BULK: &str = "kget-bulk";
    pub const GET_ALL: &str = "kget-all";
    pub const SET: &str = "kset";
    pub const SET_BULK: &str = "kset-bulk";
    pub const LIST: &str = "klist";
    pub const SUBSCRIBE: &str = "ksub";
    pub const UNSUBSCRIBE: &str = "kunsub";
    pub const SUBSCRIBE_PREFIX: &str = "ksub-prefix";
    pub const UNSUBSCRIBE_PREFIX: &str = "kunsub-prefix";
    pub const LOGIN: &str = "klogin";
    pub const AUTH: &str = "kauth";
}

/// Outbound request, minus the request id injected at send time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Command {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Command {
    /// Command without payload
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            data: None,
        }
    }

    /// Command with a `data` payload
    pub fn with_data(command: impl Into<String>, data: Value) -> Self {
        Self {
            command: command.into(),
            data: Some(data),
        }
    }

    /// Serialize with the given request id merged in
    pub fn encode(&self, request_id: &str) -> Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            #[serde(flatten)]
            command: &'a Command,
            request_id: &'a str,
        }

        Ok(serde_json::to_string(&Envelope {
            command: self,
            request_id,
        })?)
    }
}

/// Server reply to a command
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub request_id: String,
    pub ok: bool,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

impl Response {
    /// Unwrap the payload, turning `ok: false` into `CommandFailed`
    pub fn into_data(self, command: &str) -> Result<Value> {
        if self.ok {
            return Ok(self.data);
        }
        let mut message = self.error.unwrap_or_else(|| "unknown error".to_string());
        if let Some(details) = self.details {
            message = format!("{} ({})", message, details);
        }
        Err(KilovoltError::CommandFailed {
            command: command.to_string(),
            message,
        })
    }
}

/// Unsolicited key change notification
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushEvent {
    pub key: String,
    pub new_value: String,
}

/// Classified inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    Response(Response),
    Hello { version: String },
    Push(PushEvent),
    /// Well-formed but not understood; reported and ignored
    Unknown(Value),
}

impl ServerMessage {
    /// Decode a text frame
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| KilovoltError::ProtocolDecode(e.to_string()))?;
        let Value::Object(object) = value else {
            return Err(KilovoltError::ProtocolDecode(
                "frame is not a JSON object".to_string(),
            ));
        };

        if object.contains_key("request_id") {
            return decode_as(object).map(ServerMessage::Response);
        }

        match object.get("type").and_then(Value::as_str) {
            Some("hello") => {
                #[derive(Deserialize)]
                struct Hello {
                    version: String,
                }
                decode_as::<Hello>(object).map(|h| ServerMessage::Hello { version: h.version })
            }
            Some("push") => decode_as(object).map(ServerMessage::Push),
            _ => Ok(ServerMessage::Unknown(Value::Object(object))),
        }
    }
}

fn decode_as<T: serde::de::DeserializeOwned>(object: Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(object))
        .map_err(|e| KilovoltError::ProtocolDecode(e.to_string()))
}
