use crate::aggregate::Aggregate;
use crate::types::ExpectedStreamVersion;

/// The internal state of an aggregate instance, alongside the version it was loaded at and the events
/// applied on top of it since then.
///
/// The pending changes are what a [`crate::CommandService`] appends to the store, using
/// [`AggregateState::original_version`] as the optimistic concurrency expectation.
pub struct AggregateState<A>
where
    A: Aggregate,
{
    id: A::Id,
    inner: A::State,
    original_version: ExpectedStreamVersion,
    changes: Vec<A::Event>,
}

impl<A> AggregateState<A>
where
    A: Aggregate,
{
    /// Creates the empty state of an aggregate instance whose stream does not exist yet.
    pub fn new(id: A::Id) -> Self {
        Self::with_version(id, A::State::default(), ExpectedStreamVersion::NoStream)
    }

    /// Creates the state of an instance loaded from the store at `version`.
    pub fn with_version(id: A::Id, inner: A::State, version: ExpectedStreamVersion) -> Self {
        Self {
            id,
            inner,
            original_version: version,
            changes: vec![],
        }
    }

    /// Applies a new event onto the state and records it as a pending change.
    pub fn apply(&mut self, event: impl Into<A::Event>) -> &mut Self {
        let event: A::Event = event.into();
        let inner: A::State = std::mem::take(&mut self.inner);
        self.inner = A::apply_event(inner, &event);
        self.changes.push(event);
        self
    }

    /// Applies all the given events in order, see [`AggregateState::apply`].
    pub fn apply_all(&mut self, events: impl IntoIterator<Item = A::Event>) -> &mut Self {
        for event in events {
            self.apply(event);
        }
        self
    }

    pub fn id(&self) -> &A::Id {
        &self.id
    }

    /// Returns the internal state.
    pub fn inner(&self) -> &A::State {
        &self.inner
    }

    /// The events applied since the state was loaded, in application order.
    pub fn pending_changes(&self) -> &[A::Event] {
        &self.changes
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// The stream version the state was loaded at.
    pub fn original_version(&self) -> ExpectedStreamVersion {
        self.original_version
    }

    /// The stream version once the pending changes are persisted.
    pub fn current_version(&self) -> ExpectedStreamVersion {
        self.original_version.advance(self.changes.len())
    }

    /// Whether the stream of this instance already had events when it was loaded.
    pub fn exists(&self) -> bool {
        self.original_version != ExpectedStreamVersion::NoStream
    }

    pub(crate) fn take_changes(&mut self) -> Vec<A::Event> {
        std::mem::take(&mut self.changes)
    }

    /// Consumes the state, returning the internal state.
    pub fn into_inner(self) -> A::State {
        self.inner
    }
}

impl<A> Clone for AggregateState<A>
where
    A: Aggregate,
    A::Event: Clone,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            inner: self.inner.clone(),
            original_version: self.original_version,
            changes: self.changes.clone(),
        }
    }
}

impl<A> std::fmt::Debug for AggregateState<A>
where
    A: Aggregate,
    A::State: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateState")
            .field("aggregate", &A::NAME)
            .field("id", &self.id.to_string())
            .field("inner", &self.inner)
            .field("original_version", &self.original_version)
            .field("pending_changes", &self.changes.len())
            .finish()
    }
}
