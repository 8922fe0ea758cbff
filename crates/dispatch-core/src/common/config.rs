//! Typed configuration forwarded to `Worker::setup`.
//!
//! Stands in for the Python original's `**setup_kwargs` - a caller-defined
//! mapping passed through the controller untouched and handed to every
//! worker's `setup` call.

use serde_json::Value;
use std::collections::HashMap;

/// A string-keyed, JSON-valued configuration map forwarded verbatim to
/// every worker's `setup` call.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct ConfigMap(HashMap<String, Value>);

impl ConfigMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Deserializes the value at `key`, if present, into `T`.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.0.get(key).cloned().and_then(|v| serde_json::from_value(v).ok())
    }
}

impl FromIterator<(String, Value)> for ConfigMap {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
