use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Well-known metadata keys.
pub mod tags {
    pub const MESSAGE_ID: &str = "$messageId";
    pub const CAUSATION_ID: &str = "$causationId";
    pub const CORRELATION_ID: &str = "$correlationId";
    pub const TRACE_ID: &str = "$traceId";
    pub const SPAN_ID: &str = "$spanId";
    pub const ERROR: &str = "$error";
    pub const ORIGINAL_STREAM: &str = "$originalStream";
    pub const ORIGINAL_POSITION: &str = "$originalPosition";
}

/// Key/value envelope carried by every event and command, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style [`Metadata::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let _ = self.insert(key, value);
        self
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// Copies every entry of `other` not already present here.
    pub fn merge_missing(&mut self, other: &Metadata) {
        for (key, value) in other.iter() {
            if !self.contains_key(key) {
                let _ = self.insert(key, value);
            }
        }
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.uuid(tags::MESSAGE_ID)
    }

    pub fn causation_id(&self) -> Option<Uuid> {
        self.uuid(tags::CAUSATION_ID)
    }

    pub fn correlation_id(&self) -> Option<Uuid> {
        self.uuid(tags::CORRELATION_ID)
    }

    pub fn with_message_id(self, id: Uuid) -> Self {
        self.with(tags::MESSAGE_ID, id.to_string())
    }

    pub fn with_causation_id(self, id: Uuid) -> Self {
        self.with(tags::CAUSATION_ID, id.to_string())
    }

    pub fn with_correlation_id(self, id: Uuid) -> Self {
        self.with(tags::CORRELATION_ID, id.to_string())
    }

    /// Metadata for a message caused by the message described by `self`: the causation id
    /// becomes the original message id and the correlation id is kept, falling back to the
    /// original message id when the chain starts here.
    pub fn caused_by(&self, message_id: Uuid) -> Metadata {
        let correlation_id: Uuid = self.correlation_id().unwrap_or(message_id);
        Metadata::new()
            .with_causation_id(message_id)
            .with_correlation_id(correlation_id)
    }

    fn uuid(&self, key: &str) -> Option<Uuid> {
        self.get(key).and_then(|value| Uuid::parse_str(value).ok())
    }
}

impl FromIterator<(String, String)> for Metadata {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
