//! Convenience commands
//!
//! Thin wrappers over [`Session::send`]: each builds one command, sends it
//! and unwraps the `ok`/`error`/`data` fields. A response with `ok: false`
//! becomes [`KilovoltError::CommandFailed`].

use std::collections::HashMap;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{KilovoltError, Result};
use crate::protocol::{names, Command};
use crate::session::Session;
use crate::subscription::{ListenerId, MatchMode};

impl Session {
    async fn call(&self, command: Command) -> Result<Value> {
        let name = command.command.clone();
        self.send(command).await?.into_data(&name)
    }

    /// Read a key as a bare string; unset keys read as `""`
    pub async fn get(&self, key: &str) -> Result<String> {
        let data = self
            .call(Command::with_data(names::GET, json!({ "key": key })))
            .await?;
        match data {
            Value::String(value) => Ok(value),
            Value::Null => Ok(String::new()),
            other => Err(unexpected(names::GET, &other)),
        }
    }

    /// Read a key and decode its value as JSON
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let raw = self.get(key).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Read several keys at once
    pub async fn get_multiple(&self, keys: &[&str]) -> Result<HashMap<String, String>> {
        let data = self
            .call(Command::with_data(names::GET_BULK, json!({ "keys": keys })))
            .await?;
        decode_data(names::GET_BULK, data)
    }

    /// Read every key starting with `prefix`
    pub async fn get_prefix(&self, prefix: &str) -> Result<HashMap<String, String>> {
        let data = self
            .call(Command::with_data(names::GET_ALL, json!({ "prefix": prefix })))
            .await?;
        decode_data(names::GET_ALL, data)
    }

    /// List keys starting with `prefix` (`""` lists everything)
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let data = self
            .call(Command::with_data(names::LIST, json!({ "prefix": prefix })))
            .await?;
        decode_data(names::LIST, data)
    }

    /// Write a key as a bare string
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.call(Command::with_data(
            names::SET,
            json!({ "key": key, "data": value }),
        ))
        .await?;
        Ok(())
    }

    /// Encode `value` as JSON and write it
    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let encoded = serde_json::to_string(value)?;
        self.set(key, &encoded).await
    }

    /// Write several keys at once
    pub async fn set_multiple(&self, values: &HashMap<String, String>) -> Result<()> {
        self.call(Command::with_data(names::SET_BULK, json!(values)))
            .await?;
        Ok(())
    }

    /// Call `listener` with `(key, new_value)` whenever `key` changes
    pub async fn subscribe<F>(&self, key: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.registry(MatchMode::Exact)
            .subscribe(self.sender(), key, Arc::new(listener))
            .await
    }

    /// Remove a listener added with [`Session::subscribe`]
    pub async fn unsubscribe(&self, key: &str, listener: ListenerId) -> Result<()> {
        self.registry(MatchMode::Exact)
            .unsubscribe(self.sender(), key, listener)
            .await
    }

    /// Call `listener` whenever any key starting with `prefix` changes
    pub async fn subscribe_prefix<F>(&self, prefix: &str, listener: F) -> Result<ListenerId>
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        self.registry(MatchMode::Prefix)
            .subscribe(self.sender(), prefix, Arc::new(listener))
            .await
    }

    /// Remove a listener added with [`Session::subscribe_prefix`]
    pub async fn unsubscribe_prefix(&self, prefix: &str, listener: ListenerId) -> Result<()> {
        self.registry(MatchMode::Prefix)
            .unsubscribe(self.sender(), prefix, listener)
            .await
    }
}

fn decode_data<T: DeserializeOwned + Default>(command: &str, data: Value) -> Result<T> {
    if data.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(data).map_err(|e| KilovoltError::CommandFailed {
        command: command.to_string(),
        message: format!("unexpected response payload: {}", e),
    })
}

fn unexpected(command: &str, data: &Value) -> KilovoltError {
    KilovoltError::CommandFailed {
        command: command.to_string(),
        message: format!("unexpected response payload: {}", data),
    }
}
