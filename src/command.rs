use std::any::{Any, TypeId};
use std::collections::HashMap;

pub use error::{CommandError, RegistrationError};
pub use handler::{OnCommand, WithId};

use crate::aggregate::Aggregate;
use crate::metadata::Metadata;
use crate::repository::AggregateStore;
use crate::serializer::Serializer;
use crate::state::AggregateState;
use crate::store::EventStore;
use crate::types::{AppendEventsResult, ExpectedStreamVersion, GlobalPosition, StreamName};
use handler::{Action, RegisteredHandler};

mod error;
mod handler;

/// Precondition on the stream of the aggregate instance targeted by a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedState {
    /// The stream must not exist: the command creates the aggregate instance.
    New,
    /// The stream must exist.
    Existing,
    /// No precondition.
    Any,
}

/// The result of a successfully handled command.
pub struct CommandOutcome<A>
where
    A: Aggregate,
{
    /// The state after the new events were applied.
    pub state: A::State,
    /// The new events, in append order. Empty if the command was a no-op.
    pub changes: Vec<A::Event>,
    /// Version of the stream after the command.
    pub stream_version: ExpectedStreamVersion,
    /// Global position of the last appended event, `None` if nothing was appended.
    pub global_position: Option<GlobalPosition>,
}

impl<A> std::fmt::Debug for CommandOutcome<A>
where
    A: Aggregate,
    A::State: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandOutcome")
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("stream_version", &self.stream_version)
            .field("global_position", &self.global_position)
            .finish()
    }
}

/// The CommandService is responsible for executing commands against aggregate instances: it loads the
/// instance, checks the precondition of the command, runs the registered business function and
/// persists the produced events with an optimistic concurrency check.
///
/// Handlers are registered once, before the service is shared:
///
/// ```ignore
/// let mut service: CommandService<Booking, _> = CommandService::new(store, serializer);
/// service
///     .on::<BookRoom>()
///     .in_state(ExpectedState::New)
///     .get_id(|command| command.booking_id.clone())
///     .act(|_state, command| Ok(vec![RoomBooked { price: command.price }.into()]))?;
/// ```
///
/// No state is cached between commands, and a version conflict is reported to the caller instead of
/// being retried.
pub struct CommandService<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    aggregate_store: AggregateStore<S>,
    handlers: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    _aggregate: std::marker::PhantomData<fn() -> A>,
}

impl<A, S> CommandService<A, S>
where
    A: Aggregate,
    S: EventStore,
{
    /// Creates a new instance of a [`CommandService`], with no handler registered.
    pub fn new(event_store: S, serializer: Serializer) -> Self {
        Self {
            aggregate_store: AggregateStore::new(event_store, serializer),
            handlers: HashMap::new(),
            _aggregate: std::marker::PhantomData,
        }
    }

    /// Starts the registration of the handler of commands of type `C`.
    pub fn on<C>(&mut self) -> OnCommand<'_, A, S, C>
    where
        C: Send + Sync + 'static,
    {
        OnCommand::new(self)
    }

    pub fn is_registered<C: 'static>(&self) -> bool {
        self.handlers.contains_key(&TypeId::of::<C>())
    }

    /// Handles the command with no metadata.
    pub async fn handle<C>(&self, command: C) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        C: Send + Sync + 'static,
    {
        self.handle_with_metadata(command, Metadata::new()).await
    }

    /// Handles the command. `metadata` is copied onto every produced event.
    ///
    /// Exactly one append is performed when the business function produced events, none otherwise.
    #[tracing::instrument(skip_all, fields(aggregate = A::NAME, command = std::any::type_name::<C>()), err)]
    pub async fn handle_with_metadata<C>(
        &self,
        command: C,
        metadata: Metadata,
    ) -> Result<CommandOutcome<A>, CommandError<A::Error>>
    where
        C: Send + Sync + 'static,
    {
        let handler: &RegisteredHandler<A, C> = self
            .handlers
            .get(&TypeId::of::<C>())
            .and_then(|handler| handler.downcast_ref::<RegisteredHandler<A, C>>())
            .ok_or(CommandError::HandlerNotFound {
                command: std::any::type_name::<C>(),
            })?;

        let id: A::Id = (handler.get_id)(&command);
        let stream: StreamName = handler.stream_for(&id, &command);

        let loaded: Option<AggregateState<A>> = self.aggregate_store.load::<A>(&stream, id.clone()).await?;

        let mut state: AggregateState<A> = match (handler.expected, loaded) {
            (ExpectedState::New, Some(_)) | (ExpectedState::Existing, None) => {
                return Err(CommandError::ExpectedState {
                    expected: handler.expected,
                    stream,
                });
            }
            (_, Some(state)) => state,
            (_, None) => AggregateState::new(id),
        };

        match &handler.action {
            Action::Act(act) => {
                let events: Vec<A::Event> = act(state.inner(), &command).map_err(CommandError::Domain)?;
                state.apply_all(events);
            }
            Action::ActAsync(act) => {
                let events: Vec<A::Event> = act(state.inner().clone(), command)
                    .await
                    .map_err(CommandError::Domain)?;
                state.apply_all(events);
            }
            Action::ActOn(act) => act(&mut state, &command).map_err(CommandError::Domain)?,
        }

        let result: Option<AppendEventsResult> = self.aggregate_store.store(&stream, &state, &metadata).await?;

        let (stream_version, global_position) = match result {
            Some(result) => (result.next_expected_version, Some(result.global_position)),
            None => (state.original_version(), None),
        };

        let changes: Vec<A::Event> = state.take_changes();

        Ok(CommandOutcome {
            state: state.into_inner(),
            changes,
            stream_version,
            global_position,
        })
    }

    /// Loads the aggregate instance from its default stream.
    pub async fn load(&self, id: A::Id) -> Result<Option<AggregateState<A>>, CommandError<A::Error>> {
        let stream: StreamName = StreamName::for_aggregate::<A>(&id);
        Ok(self.aggregate_store.load::<A>(&stream, id).await?)
    }

    pub fn aggregate_store(&self) -> &AggregateStore<S> {
        &self.aggregate_store
    }

    /// Returns the internal event store
    pub fn event_store(&self) -> &S {
        self.aggregate_store.event_store()
    }
}
