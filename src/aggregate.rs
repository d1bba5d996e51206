use std::fmt::Display;

use crate::event::Event;

/// The Aggregate trait is responsible for folding events into the state of an entity.
///
/// An aggregate never mutates its state directly: business logic (registered in a
/// [`crate::CommandService`]) produces events, and the state is derived by applying them one by one
/// through [`Aggregate::apply_event`]. Loading an aggregate replays its whole stream the same way.
pub trait Aggregate: Send + Sync + 'static {
    /// The `NAME` const is used as prefix of the default stream name of an aggregate instance:
    /// `{NAME}-{id}`.
    ///
    /// Changing it after events were persisted makes the existing streams unreachable.
    const NAME: &'static str;

    /// Identifier of an aggregate instance.
    type Id: Display + Clone + Send + Sync + 'static;

    /// Internal aggregate state. This will be wrapped in [`crate::AggregateState`] and could be used
    /// to validate commands.
    type State: Default + Clone + Send + Sync + 'static;

    /// The set of events this aggregate emits, usually declared with [`crate::event_set!`].
    type Event: Event;

    /// Error returned by the business functions of this aggregate.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Updates the aggregate state using the new event. This assumes that the event can be correctly
    /// applied to the state.
    ///
    /// This function must be pure and infallible: events are facts that already happened, and
    /// replaying the same events must always produce the same state.
    fn apply_event(state: Self::State, event: &Self::Event) -> Self::State;
}

/// Folds `events` left to right onto `state`.
pub fn fold<'a, A>(state: A::State, events: impl IntoIterator<Item = &'a A::Event>) -> A::State
where
    A: Aggregate,
{
    events.into_iter().fold(state, A::apply_event)
}
