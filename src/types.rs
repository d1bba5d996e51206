use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::Aggregate;

/// Position of an event inside its own stream. The first event of a stream has position `0`.
pub type StreamPosition = u64;

/// Store-wide monotonic ordinal of an event, shared by all the streams of a store.
pub type GlobalPosition = u64;

/// Name of an ordered, append-only sequence of events.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamName(String);

impl StreamName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Default stream name of an aggregate instance: `{Aggregate::NAME}-{id}`.
    pub fn for_aggregate<A>(id: &A::Id) -> Self
    where
        A: Aggregate,
    {
        Self(format!("{}-{}", A::NAME, id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the part of the name following the first `-`, which is the aggregate id for
    /// streams named with [`StreamName::for_aggregate`].
    pub fn id_part(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, id)| id)
    }
}

impl Display for StreamName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamName {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for StreamName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// The stream version a writer expects to find when appending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpectedStreamVersion {
    /// The stream must not exist yet.
    NoStream,
    /// No concurrency check is performed.
    Any,
    /// The position of the last event of the stream must be exactly this one.
    Exact(StreamPosition),
}

impl ExpectedStreamVersion {
    /// Expected version after `count` events were appended on top of this one.
    ///
    /// `Any` has no known base, so it stays `Any`.
    pub fn advance(self, count: usize) -> Self {
        match (self, count) {
            (version, 0) => version,
            (Self::NoStream, count) => Self::Exact(count as u64 - 1),
            (Self::Exact(version), count) => Self::Exact(version + count as u64),
            (Self::Any, _) => Self::Any,
        }
    }

    /// Checks this expectation against the actual last position of a stream (`None` when the
    /// stream has no events).
    pub fn matches(&self, actual: Option<StreamPosition>) -> bool {
        match (self, actual) {
            (Self::Any, _) => true,
            (Self::NoStream, None) => true,
            (Self::Exact(expected), Some(actual)) => *expected == actual,
            _ => false,
        }
    }
}

impl Display for ExpectedStreamVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoStream => f.write_str("no stream"),
            Self::Any => f.write_str("any"),
            Self::Exact(version) => write!(f, "{}", version),
        }
    }
}

impl From<Option<StreamPosition>> for ExpectedStreamVersion {
    fn from(value: Option<StreamPosition>) -> Self {
        value.map_or(Self::NoStream, Self::Exact)
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendEventsResult {
    /// Version to use as expectation for the next append on the same stream.
    pub next_expected_version: ExpectedStreamVersion,
    /// Global position of the last appended event.
    pub global_position: GlobalPosition,
}
