use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::store::{EventStore, GlobalEventReader, NewEvent, StoreError, StoreEvent};
use crate::types::{AppendEventsResult, ExpectedStreamVersion, GlobalPosition, StreamName, StreamPosition};

/// Event store keeping every stream in memory. Meant for tests and local development.
///
/// The store is protected by an [`Arc`] that allows it to be cloneable still having the same memory
/// reference.
#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    inner: Arc<RwLock<InnerStore>>,
}

#[derive(Default)]
struct InnerStore {
    streams: HashMap<StreamName, MemoryStream>,
    log: Vec<StoreEvent>,
}

#[derive(Default)]
struct MemoryStream {
    events: Vec<StoreEvent>,
    truncated_before: StreamPosition,
    deleted: bool,
}

impl MemoryStream {
    fn version(&self) -> Option<StreamPosition> {
        self.events.last().map(|event| event.stream_position)
    }

    fn visible(&self) -> impl DoubleEndedIterator<Item = &StoreEvent> {
        let truncated_before: StreamPosition = self.truncated_before;
        self.events
            .iter()
            .filter(move |event| event.stream_position >= truncated_before)
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events appended to the store, across all streams.
    pub async fn len(&self) -> usize {
        self.inner.read().await.log.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn check_version(
    stream: &StreamName,
    expected: ExpectedStreamVersion,
    actual: Option<StreamPosition>,
) -> Result<(), StoreError> {
    if expected.matches(actual) {
        Ok(())
    } else {
        Err(StoreError::WrongExpectedVersion {
            stream: stream.clone(),
            expected,
            actual,
        })
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[tracing::instrument(skip_all, fields(stream = %stream, expected = %expected, count = events.len()), err)]
    async fn append_events(
        &self,
        stream: &StreamName,
        expected: ExpectedStreamVersion,
        events: Vec<NewEvent>,
    ) -> Result<AppendEventsResult, StoreError> {
        let mut guard = self.inner.write().await;
        let InnerStore { streams, log } = &mut *guard;

        match streams.get(stream) {
            Some(memory_stream) if memory_stream.deleted => return Err(StoreError::StreamDeleted(stream.clone())),
            Some(memory_stream) => check_version(stream, expected, memory_stream.version())?,
            None => check_version(stream, expected, None)?,
        }

        if events.is_empty() {
            let version: Option<StreamPosition> = streams.get(stream).and_then(MemoryStream::version);
            return Ok(AppendEventsResult {
                next_expected_version: version.into(),
                global_position: log.len().saturating_sub(1) as GlobalPosition,
            });
        }

        let memory_stream: &mut MemoryStream = streams.entry(stream.clone()).or_default();

        let occurred_on = Utc::now();
        let mut next_position: StreamPosition = memory_stream.version().map_or(0, |version| version + 1);

        for event in events {
            let store_event = StoreEvent {
                id: event.id,
                stream: stream.clone(),
                event_type: event.event_type,
                content_type: event.content_type,
                payload: event.payload,
                metadata: event.metadata,
                occurred_on,
                stream_position: next_position,
                global_position: log.len() as GlobalPosition,
            };
            next_position += 1;

            log.push(store_event.clone());
            memory_stream.events.push(store_event);
        }

        Ok(AppendEventsResult {
            next_expected_version: memory_stream.version().into(),
            global_position: log.len().saturating_sub(1) as GlobalPosition,
        })
    }

    async fn read_events(
        &self,
        stream: &StreamName,
        from: StreamPosition,
        max_count: usize,
    ) -> Result<Vec<StoreEvent>, StoreError> {
        let guard = self.inner.read().await;

        match guard.streams.get(stream) {
            Some(memory_stream) if !memory_stream.deleted && memory_stream.version().is_some() => Ok(memory_stream
                .visible()
                .filter(|event| event.stream_position >= from)
                .take(max_count)
                .cloned()
                .collect()),
            _ => Err(StoreError::StreamNotFound(stream.clone())),
        }
    }

    async fn read_events_backwards(&self, stream: &StreamName, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        let guard = self.inner.read().await;

        match guard.streams.get(stream) {
            Some(memory_stream) if !memory_stream.deleted && memory_stream.version().is_some() => {
                Ok(memory_stream.visible().rev().take(max_count).cloned().collect())
            }
            _ => Err(StoreError::StreamNotFound(stream.clone())),
        }
    }

    async fn stream_exists(&self, stream: &StreamName) -> Result<bool, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard
            .streams
            .get(stream)
            .map_or(false, |memory_stream| !memory_stream.deleted && memory_stream.version().is_some()))
    }

    async fn stream_version(&self, stream: &StreamName) -> Result<Option<StreamPosition>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.streams.get(stream).and_then(MemoryStream::version))
    }

    #[tracing::instrument(skip_all, fields(stream = %stream, before), err)]
    async fn truncate_stream(
        &self,
        stream: &StreamName,
        before: StreamPosition,
        expected: ExpectedStreamVersion,
    ) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;

        let memory_stream: &mut MemoryStream = match guard.streams.get_mut(stream) {
            Some(memory_stream) if memory_stream.deleted => return Err(StoreError::StreamDeleted(stream.clone())),
            Some(memory_stream) => memory_stream,
            None => return Err(StoreError::StreamNotFound(stream.clone())),
        };

        check_version(stream, expected, memory_stream.version())?;
        memory_stream.truncated_before = memory_stream.truncated_before.max(before);

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(stream = %stream), err)]
    async fn delete_stream(&self, stream: &StreamName, expected: ExpectedStreamVersion) -> Result<(), StoreError> {
        let mut guard = self.inner.write().await;

        let memory_stream: &mut MemoryStream = match guard.streams.get_mut(stream) {
            Some(memory_stream) if memory_stream.deleted => return Err(StoreError::StreamDeleted(stream.clone())),
            Some(memory_stream) => memory_stream,
            None => return Err(StoreError::StreamNotFound(stream.clone())),
        };

        check_version(stream, expected, memory_stream.version())?;
        memory_stream.deleted = true;
        memory_stream.events.clear();

        Ok(())
    }
}

#[async_trait]
impl GlobalEventReader for InMemoryEventStore {
    async fn read_all(&self, after: Option<GlobalPosition>, max_count: usize) -> Result<Vec<StoreEvent>, StoreError> {
        let guard = self.inner.read().await;
        let start: usize = after.map_or(0, |position| position as usize + 1);

        Ok(guard.log.iter().skip(start).take(max_count).cloned().collect())
    }

    async fn head_position(&self) -> Result<Option<GlobalPosition>, StoreError> {
        let guard = self.inner.read().await;
        Ok(guard.log.last().map(|event| event.global_position))
    }
}
