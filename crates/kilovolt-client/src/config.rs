//! Client configuration

use std::time::Duration;

/// Default Kilovolt endpoint
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:4337/ws";

/// Session configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket endpoint (e.g., "ws://localhost:4337/ws")
    pub endpoint: String,
    /// Password for protected instances
    pub password: Option<String>,
    /// Upper bound for a single request; `None` waits indefinitely
    pub request_timeout: Option<Duration>,
    /// How long `connect` waits for the server hello
    pub handshake_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            password: None,
            request_timeout: None,
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a new config with the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the authentication password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Set the password only when one is given
    pub fn maybe_password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    /// Set per-request timeout
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set hello timeout
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.endpoint, "ws://localhost:4337/ws");
        assert!(config.password.is_none());
        assert!(config.request_timeout.is_none());
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_builder() {
        let config = ClientConfig::new("ws://kv.local:4337/ws")
            .password("hunter2")
            .request_timeout(Duration::from_secs(3))
            .handshake_timeout(Duration::from_millis(500));

        assert_eq!(config.endpoint, "ws://kv.local:4337/ws");
        assert_eq!(config.password.as_deref(), Some("hunter2"));
        assert_eq!(config.request_timeout, Some(Duration::from_secs(3)));
        assert_eq!(config.handshake_timeout, Duration::from_millis(500));

        let config = config.maybe_password(None);
        assert!(config.password.is_none());
    }
}
