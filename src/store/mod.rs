use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::metadata::Metadata;
use crate::serializer::SerializedEvent;
use crate::types::{AppendEventsResult, ExpectedStreamVersion, GlobalPosition, StreamName, StreamPosition};

pub mod memory;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The stream version does not match the one expected by the writer.
    #[error("wrong expected version for stream {stream}: expected {expected}, actual {actual:?}")]
    WrongExpectedVersion {
        stream: StreamName,
        expected: ExpectedStreamVersion,
        actual: Option<StreamPosition>,
    },
    #[error("stream {0} was deleted")]
    StreamDeleted(StreamName),
    #[error("stream {0} not found")]
    StreamNotFound(StreamName),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    /// Any failure of the backing store itself (I/O, connection, driver...).
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn backend(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Backend(Box::new(error))
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Backend(_))
    }
}

/// An event about to be appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Message id, unique among all events of the store.
    pub id: Uuid,
    pub event_type: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
}

impl NewEvent {
    pub fn new(serialized: SerializedEvent, metadata: Metadata) -> Self {
        Self::with_id(Uuid::new_v4(), serialized, metadata)
    }

    pub fn with_id(id: Uuid, serialized: SerializedEvent, metadata: Metadata) -> Self {
        Self {
            id,
            event_type: serialized.event_type,
            content_type: serialized.content_type,
            payload: serialized.payload,
            metadata,
        }
    }
}

/// A `StoreEvent` contains the serialized payload alongside the event's metadata and positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    /// Uniquely identifies an event among all events of the store.
    pub id: Uuid,
    /// The stream the event belongs to.
    pub stream: StreamName,
    pub event_type: String,
    pub content_type: String,
    pub payload: Vec<u8>,
    pub metadata: Metadata,
    /// The timestamp of when the event is persisted.
    pub occurred_on: DateTime<Utc>,
    /// Position of the event within its stream.
    pub stream_position: StreamPosition,
    /// Position of the event in the store-wide order.
    pub global_position: GlobalPosition,
}

/// An EventStore is responsible for appending events to named streams with optimistic concurrency
/// and reading them back in order.
///
/// Implementations never retry internally: the caller owns the retry policy.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends all the events atomically: either all of them are persisted or none is.
    ///
    /// Fails with [`StoreError::WrongExpectedVersion`] when the stream version differs from
    /// `expected` and with [`StoreError::StreamDeleted`] when the stream was deleted.
    async fn append_events(
        &self,
        stream: &StreamName,
        expected: ExpectedStreamVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendEventsResult, StoreError>;

    /// Reads at most `max_count` events starting from the stream position `from` (inclusive).
    ///
    /// Fails with [`StoreError::StreamNotFound`] if the stream was never written.
    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamPosition,
        max_count: usize,
    ) -> Result<Vec<StoreEvent>, StoreError>;

    /// Reads the last `max_count` events of the stream, most recent first.
    async fn read_events_backwards(&self, stream: &StreamName, max_count: usize) -> Result<Vec<StoreEvent>, StoreError>;

    async fn stream_exists(&self, stream: &StreamName) -> Result<bool, StoreError>;

    /// Position of the last event appended to the stream, counting truncated events too. `None`
    /// if the stream was never written or was deleted.
    async fn stream_version(&self, stream: &StreamName) -> Result<Option<StreamPosition>, StoreError>;

    /// Removes every event positioned before `before`.
    async fn truncate_stream(
        &self,
        stream: &StreamName,
        before: StreamPosition,
        expected: ExpectedStreamVersion,
    ) -> Result<(), StoreError>;

    /// Deletes the whole stream. Appending to it afterwards fails with
    /// [`StoreError::StreamDeleted`].
    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedStreamVersion) -> Result<(), StoreError>;
}

/// Read access to the store-wide order of events, across all streams.
#[async_trait]
pub trait GlobalEventReader: Send + Sync {
    /// Reads at most `max_count` events positioned strictly after `after` (from the beginning
    /// when `None`).
    async fn read_all(&self, after: Option<GlobalPosition>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError>;

    /// Global position of the last event of the store, `None` when the store is empty.
    async fn head_position(&self) -> Result<Option<GlobalPosition>, StoreError>;
}

/// Blanket implementation making an [`EventStore`] every (smart) pointer to an [`EventStore`],
/// e.g. `&Store`, `Box<Store>`, `Arc<Store>`, `Arc<dyn EventStore>`.
#[async_trait]
impl<S, T> EventStore for T
where
    S: EventStore + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    /// Deref call to [`EventStore::append_events`].
    async fn append_events(
        &self,
        stream: &StreamName,
        expected: ExpectedStreamVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendEventsResult, StoreError> {
        self.deref().append_events(stream, expected, events).await
    }

    /// Deref call to [`EventStore::read_events`].
    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamPosition,
        max_count: usize,
    ) -> Result<Vec<StoreEvent>, StoreError> {
        self.deref().read_events(stream, from, max_count).await
    }

    /// Deref call to [`EventStore::read_events_backwards`].
    async fn read_events_backwards(&self, stream: &StreamName, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        self.deref().read_events_backwards(stream, max_count).await
    }

    /// Deref call to [`EventStore::stream_exists`].
    async fn stream_exists(&self, stream: &StreamName) -> Result<bool, StoreError> {
        self.deref().stream_exists(stream).await
    }

    /// Deref call to [`EventStore::stream_version`].
    async fn stream_version(&self, stream: &StreamName) -> Result<Option<StreamPosition>, StoreError> {
        self.deref().stream_version(stream).await
    }

    /// Deref call to [`EventStore::truncate_stream`].
    async fn truncate_stream(
        &self,
        stream: &StreamName,
        before: StreamPosition,
        expected: ExpectedStreamVersion,
    ) -> Result<(), StoreError> {
        self.deref().truncate_stream(stream, before, expected).await
    }

    /// Deref call to [`EventStore::delete_stream`].
    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedStreamVersion) -> Result<(), StoreError> {
        self.deref().delete_stream(stream, expected).await
    }
}

/// Same as the [`EventStore`] blanket implementation, for [`GlobalEventReader`].
#[async_trait]
impl<S, T> GlobalEventReader for T
where
    S: GlobalEventReader + ?Sized,
    T: Deref<Target = S> + Send + Sync,
{
    async fn read_all(&self, after: Option<GlobalPosition>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        self.deref().read_all(after, max_count).await
    }

    async fn head_position(&self) -> Result<Option<GlobalPosition>, StoreError> {
        self.deref().head_position().await
    }
}
