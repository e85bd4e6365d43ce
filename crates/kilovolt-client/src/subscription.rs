//! Push subscription registry
//!
//! Keeps local listeners per pattern and reference-counts them against the
//! server: the first listener on a pattern issues the server subscribe
//! command, the last one removed issues the unsubscribe. One registry
//! exists per [`MatchMode`].
//!
//! Two locks are involved. `changes` (async) serializes subscribe and
//! unsubscribe so concurrent calls on the same pattern cannot both send the
//! server command. `patterns` (sync) guards the listener map and is only
//! held for short, non-awaiting sections, so dispatch from the read loop
//! never waits on a server round trip.
//!
//! `clear` runs when the connection is lost and does not wait on
//! `changes`. It bumps a generation counter instead; a subscribe whose
//! server command straddled the clear sees the new generation and does not
//! register, since the server it talked to is gone.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use crate::error::{KilovoltError, Result};
use crate::protocol::{names, Command, Response};

/// Callback invoked with `(key, new_value)` for each matching push
pub type Listener = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Anything that can issue a command and wait for its response
#[async_trait]
pub trait CommandSender: Send + Sync {
    async fn send(&self, command: Command) -> Result<Response>;
}

/// Handle identifying one registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// How a pattern is matched against pushed keys
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Pattern must equal the key
    Exact,
    /// Pattern must be a string prefix of the key
    Prefix,
}

impl MatchMode {
    fn subscribe_command(self, pattern: &str) -> Command {
        match self {
            MatchMode::Exact => Command::with_data(names::SUBSCRIBE, json!({ "key": pattern })),
            MatchMode::Prefix => {
                Command::with_data(names::SUBSCRIBE_PREFIX, json!({ "prefix": pattern }))
            }
        }
    }

    fn unsubscribe_command(self, pattern: &str) -> Command {
        match self {
            MatchMode::Exact => Command::with_data(names::UNSUBSCRIBE, json!({ "key": pattern })),
            MatchMode::Prefix => {
                Command::with_data(names::UNSUBSCRIBE_PREFIX, json!({ "prefix": pattern }))
            }
        }
    }

    fn matches(self, pattern: &str, key: &str) -> bool {
        match self {
            MatchMode::Exact => pattern == key,
            MatchMode::Prefix => key.starts_with(pattern),
        }
    }
}

#[derive(Default)]
struct Patterns {
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    /// Incremented by every `clear`
    generation: u64,
}

/// Listeners keyed by pattern
///
/// Invariant: a pattern is present iff it has at least one listener.
pub struct SubscriptionRegistry {
    mode: MatchMode,
    patterns: Mutex<Patterns>,
    changes: tokio::sync::Mutex<()>,
    next_id: AtomicU64,
}

impl SubscriptionRegistry {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            mode,
            patterns: Mutex::new(Patterns::default()),
            changes: tokio::sync::Mutex::new(()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Add `listener` under `pattern`, subscribing on the server first if
    /// this is the pattern's first listener
    pub async fn subscribe(
        &self,
        sender: &dyn CommandSender,
        pattern: &str,
        listener: Listener,
    ) -> Result<ListenerId> {
        let _guard = self.changes.lock().await;

        let (exists, generation) = {
            let patterns = self.patterns.lock();
            (patterns.listeners.contains_key(pattern), patterns.generation)
        };
        if !exists {
            let command = self.mode.subscribe_command(pattern);
            let name = command.command.clone();
            sender.send(command).await?.into_data(&name)?;
            tracing::debug!(pattern = %pattern, mode = ?self.mode, "Subscribed on server");
        }

        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut patterns = self.patterns.lock();
        if patterns.generation != generation {
            tracing::debug!(pattern = %pattern, "Connection lost during subscribe");
            return Err(KilovoltError::ConnectionClosed);
        }
        patterns
            .listeners
            .entry(pattern.to_string())
            .or_default()
            .push((id, listener));
        Ok(id)
    }

    /// Remove one listener; the last one out unsubscribes on the server
    ///
    /// The pattern leaves the local registry before the server command is
    /// sent, so a failed unsubscribe never strands an empty pattern.
    pub async fn unsubscribe(
        &self,
        sender: &dyn CommandSender,
        pattern: &str,
        id: ListenerId,
    ) -> Result<()> {
        let _guard = self.changes.lock().await;

        let now_empty = {
            let mut patterns = self.patterns.lock();
            let listeners = patterns
                .listeners
                .get_mut(pattern)
                .ok_or_else(|| KilovoltError::NotSubscribed(pattern.to_string()))?;
            let before = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            if listeners.len() == before {
                return Err(KilovoltError::NotSubscribed(format!("{} ({})", pattern, id)));
            }
            if listeners.is_empty() {
                patterns.listeners.remove(pattern);
                true
            } else {
                false
            }
        };

        if now_empty {
            let command = self.mode.unsubscribe_command(pattern);
            let name = command.command.clone();
            sender.send(command).await?.into_data(&name)?;
            tracing::debug!(pattern = %pattern, mode = ?self.mode, "Unsubscribed on server");
        }
        Ok(())
    }

    /// Invoke every listener whose pattern matches `key`
    ///
    /// Listeners are collected under the lock and called after it is
    /// released. Returns how many were invoked.
    pub fn dispatch(&self, key: &str, new_value: &str) -> usize {
        let targets: Vec<Listener> = {
            let patterns = self.patterns.lock();
            match self.mode {
                MatchMode::Exact => patterns
                    .listeners
                    .get(key)
                    .map(|listeners| listeners.iter().map(|(_, l)| l.clone()).collect())
                    .unwrap_or_default(),
                MatchMode::Prefix => patterns
                    .listeners
                    .iter()
                    .filter(|(pattern, _)| self.mode.matches(pattern, key))
                    .flat_map(|(_, listeners)| listeners.iter().map(|(_, l)| l.clone()))
                    .collect(),
            }
        };

        for listener in &targets {
            let call = panic::catch_unwind(AssertUnwindSafe(|| listener(key, new_value)));
            if call.is_err() {
                tracing::error!(key = %key, "Push listener panicked");
            }
        }
        targets.len()
    }

    /// Drop all local listeners without contacting the server
    ///
    /// Subscribes still waiting on the server when this runs will fail
    /// with `ConnectionClosed` instead of registering.
    pub fn clear(&self) {
        let mut patterns = self.patterns.lock();
        patterns.listeners.clear();
        patterns.generation += 1;
    }

    /// Whether `pattern` currently has listeners
    pub fn contains(&self, pattern: &str) -> bool {
        self.patterns.lock().listeners.contains_key(pattern)
    }

    pub fn listener_count(&self, pattern: &str) -> usize {
        self.patterns.lock().listeners.get(pattern).map_or(0, Vec::len)
    }

    /// Registered patterns, in no particular order
    pub fn patterns(&self) -> Vec<String> {
        self.patterns.lock().listeners.keys().cloned().collect()
    }
}
