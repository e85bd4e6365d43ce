//! Challenge-response authentication
//!
//! `klogin` returns a base64 salt and challenge. The client answers with
//! `kauth { hash }` where `hash = base64(HMAC-SHA256(password || salt, challenge))`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha2::Sha256;

use crate::error::{KilovoltError, Result};
use crate::protocol::{names, Command};
use crate::subscription::CommandSender;

type HmacSha256 = Hmac<Sha256>;

/// Payload of a successful `klogin` response
#[derive(Debug, Clone, Deserialize)]
pub struct LoginChallenge {
    pub salt: String,
    pub challenge: String,
}

impl LoginChallenge {
    /// Extract the challenge from `klogin` response data
    pub fn from_data(data: Value) -> Result<Self> {
        serde_json::from_value(data).map_err(|e| {
            KilovoltError::AuthenticationFailed(format!("malformed login challenge: {}", e))
        })
    }

    /// Compute the base64 `kauth` hash for `password`
    pub fn respond(&self, password: &str) -> Result<String> {
        let salt = decode_field("salt", &self.salt)?;
        let challenge = decode_field("challenge", &self.challenge)?;
        sign_challenge(password, &salt, &challenge)
    }
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| KilovoltError::AuthenticationFailed(format!("invalid {}: {}", name, e)))
}

/// `base64(HMAC-SHA256(key = password || salt, message = challenge))`
pub fn sign_challenge(password: &str, salt: &[u8], challenge: &[u8]) -> Result<String> {
    let mut key = Vec::with_capacity(password.len() + salt.len());
    key.extend_from_slice(password.as_bytes());
    key.extend_from_slice(salt);

    let mut mac = HmacSha256::new_from_slice(&key)
        .map_err(|e| KilovoltError::AuthenticationFailed(e.to_string()))?;
    mac.update(challenge);
    Ok(STANDARD.encode(mac.finalize().into_bytes()))
}

/// Run the `klogin` / `kauth` exchange over `sender`
pub async fn authenticate(sender: &dyn CommandSender, password: &str) -> Result<()> {
    let login = sender.send(Command::new(names::LOGIN)).await?;
    if !login.ok {
        return Err(KilovoltError::AuthenticationFailed(
            login.error.unwrap_or_else(|| "login rejected".to_string()),
        ));
    }

    let hash = LoginChallenge::from_data(login.data)?.respond(password)?;
    let auth = sender
        .send(Command::with_data(names::AUTH, json!({ "hash": hash })))
        .await?;
    if !auth.ok {
        return Err(KilovoltError::AuthenticationFailed(
            auth.error.unwrap_or_else(|| "authentication rejected".to_string()),
        ));
    }

    tracing::debug!("Authenticated");
    Ok(())
}
