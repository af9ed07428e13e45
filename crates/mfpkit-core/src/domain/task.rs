//! Task attributes and detached payloads.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Attributes stamped onto a task when the background accepts it.
///
/// Task authors never set these: the request handlers build them from the
/// caller's access token and the values the dispatcher resolved at dispatch time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAttributes {
    /// Access token of the session that dispatched the task.
    pub api_token: String,
    /// Unix timestamp (seconds) at dispatch.
    pub dispatched_at: f64,
    /// Display locale of the dispatching session, e.g. `en_US`.
    pub locale: String,
}

impl TaskAttributes {
    pub fn new(api_token: impl Into<String>, dispatched_at: f64, locale: impl Into<String>) -> Self {
        Self {
            api_token: api_token.into(),
            dispatched_at,
            locale: locale.into(),
        }
    }
}

/// Open key/value bag handed to a task at execute time.
///
/// It only holds plain data, so it crosses the process boundary as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskPayload(Map<String, Value>);

impl TaskPayload {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Builds a payload from any serializable struct.
    ///
    /// Non-object values are rejected because payload fields are looked up by name.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        match serde_json::to_value(value)? {
            Value::Object(map) => Ok(Self(map)),
            other => Err(serde::de::Error::custom(format!(
                "task payload must be an object, got {other}"
            ))),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Reads the whole payload back as a typed struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.0.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
