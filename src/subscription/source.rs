use async_trait::async_trait;

use crate::store::{EventStore, GlobalEventReader, StoreError, StoreEvent};
use crate::types::StreamName;

/// Where a pull-based subscription reads its events from.
///
/// Positions are source specific: the global position for the whole store, the stream position for
/// a single stream. They are what the subscription checkpoints.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Reads at most `max_count` events positioned strictly after `after` (from the beginning when
    /// `None`), in position order.
    async fn read_after(&self, after: Option<u64>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError>;

    /// Position of the last event of the source, `None` if it is empty.
    async fn head_position(&self) -> Result<Option<u64>, StoreError>;

    /// Position of `event` in this source.
    fn position(&self, event: &StoreEvent) -> u64;
}

/// Every event of the store, in global order.
pub struct AllStreamSource<R>
where
    R: GlobalEventReader,
{
    reader: R,
}

impl<R> AllStreamSource<R>
where
    R: GlobalEventReader,
{
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R> EventSource for AllStreamSource<R>
where
    R: GlobalEventReader,
{
    async fn read_after(&self, after: Option<u64>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        self.reader.read_all(after, max_count).await
    }

    async fn head_position(&self) -> Result<Option<u64>, StoreError> {
        self.reader.head_position().await
    }

    fn position(&self, event: &StoreEvent) -> u64 {
        event.global_position
    }
}

/// The events of a single stream. A stream that does not exist yet reads as empty.
pub struct StreamSource<S>
where
    S: EventStore,
{
    store: S,
    stream: StreamName,
}

impl<S> StreamSource<S>
where
    S: EventStore,
{
    pub fn new(store: S, stream: impl Into<StreamName>) -> Self {
        Self {
            store,
            stream: stream.into(),
        }
    }
}

#[async_trait]
impl<S> EventSource for StreamSource<S>
where
    S: EventStore,
{
    async fn read_after(&self, after: Option<u64>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        let from: u64 = after.map_or(0, |position| position + 1);
        match self.store.read_events(&self.stream, from, max_count).await {
            Err(StoreError::StreamNotFound(_)) => Ok(vec![]),
            result => result,
        }
    }

    async fn head_position(&self) -> Result<Option<u64>, StoreError> {
        match self.store.read_events_backwards(&self.stream, 1).await {
            Ok(events) => Ok(events.first().map(|event| event.stream_position)),
            Err(StoreError::StreamNotFound(_)) => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn position(&self, event: &StoreEvent) -> u64 {
        event.stream_position
    }
}
