use crate::aggregate::Aggregate;
use crate::metadata::Metadata;
use crate::serializer::{SerializationError, Serializer};
use crate::state::AggregateState;
use crate::store::{EventStore, NewEvent, StoreError, StoreEvent};
use crate::types::{AppendEventsResult, ExpectedStreamVersion, StreamName, StreamPosition};

/// Number of events read from the store in a single call while loading an aggregate.
pub const LOAD_PAGE_SIZE: usize = 500;

#[derive(thiserror::Error, Debug)]
pub enum AggregateStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
}

/// The AggregateStore is responsible for coupling aggregates with an [`EventStore`]: it rebuilds the
/// state of an aggregate instance by folding its stream, and persists the pending changes of a state.
pub struct AggregateStore<S>
where
    S: EventStore,
{
    event_store: S,
    serializer: Serializer,
}

impl<S> AggregateStore<S>
where
    S: EventStore,
{
    pub fn new(event_store: S, serializer: Serializer) -> Self {
        Self {
            event_store,
            serializer,
        }
    }

    /// Loads an aggregate instance by applying every event of `stream` onto the default state, in
    /// stream order.
    ///
    /// Returns `None` if the stream was never written. A stream whose events were all truncated
    /// loads as the default state at the stream version.
    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, stream = %stream), err)]
    pub async fn load<A>(&self, stream: &StreamName, id: A::Id) -> Result<Option<AggregateState<A>>, AggregateStoreError>
    where
        A: Aggregate,
    {
        let mut inner: A::State = A::State::default();
        let mut version: Option<StreamPosition> = None;

        loop {
            let from: StreamPosition = version.map_or(0, |version| version + 1);

            let page: Vec<StoreEvent> = match self.event_store.read_events(stream, from, LOAD_PAGE_SIZE).await {
                Ok(page) => page,
                Err(StoreError::StreamNotFound(_)) if version.is_none() => return Ok(None),
                Err(error) => return Err(error.into()),
            };

            let page_len: usize = page.len();

            for store_event in page {
                let event: A::Event =
                    self.serializer
                        .deserialize(&store_event.event_type, &store_event.content_type, &store_event.payload)?;
                inner = A::apply_event(inner, &event);
                version = Some(store_event.stream_position);
            }

            if page_len < LOAD_PAGE_SIZE {
                break;
            }
        }

        // A stream truncated past its last event has nothing left to fold, but keeps its version.
        let version: Option<StreamPosition> = match version {
            Some(version) => Some(version),
            None => self.event_store.stream_version(stream).await?,
        };

        Ok(version.map(|version| AggregateState::with_version(id, inner, ExpectedStreamVersion::Exact(version))))
    }

    /// Persists the pending changes of `state` in a single append, using the version the state was
    /// loaded at as expectation. Every event gets a fresh message id and a copy of `metadata`.
    ///
    /// Returns `None` when there was nothing to persist.
    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, stream = %stream), err)]
    pub async fn store<A>(
        &self,
        stream: &StreamName,
        state: &AggregateState<A>,
        metadata: &Metadata,
    ) -> Result<Option<AppendEventsResult>, AggregateStoreError>
    where
        A: Aggregate,
    {
        if !state.has_pending_changes() {
            return Ok(None);
        }

        let events: Vec<NewEvent> = state
            .pending_changes()
            .iter()
            .map(|event| Ok(NewEvent::new(self.serializer.serialize(event)?, metadata.clone())))
            .collect::<Result<_, SerializationError>>()?;

        let result: AppendEventsResult = self
            .event_store
            .append_events(stream, state.original_version(), events)
            .await?;

        Ok(Some(result))
    }

    /// Returns the internal event store
    pub fn event_store(&self) -> &S {
        &self.event_store
    }

    pub fn serializer(&self) -> &Serializer {
        &self.serializer
    }
}
