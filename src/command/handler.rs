use std::any::TypeId;
use std::marker::PhantomData;

use futures::future::BoxFuture;

use crate::aggregate::Aggregate;
use crate::state::AggregateState;
use crate::store::EventStore;
use crate::types::StreamName;

use super::{CommandService, ExpectedState, RegistrationError};

pub(crate) type GetIdFn<A, C> = Box<dyn Fn(&C) -> <A as Aggregate>::Id + Send + Sync>;
pub(crate) type ResolveStreamFn<A, C> = Box<dyn Fn(&<A as Aggregate>::Id, &C) -> StreamName + Send + Sync>;

type Events<A> = Result<Vec<<A as Aggregate>::Event>, <A as Aggregate>::Error>;

/// The business function of a command handler.
pub(crate) enum Action<A, C>
where
    A: Aggregate,
{
    /// Pure function returning the new events.
    Act(Box<dyn Fn(&A::State, &C) -> Events<A> + Send + Sync>),
    /// Asynchronous function returning the new events. Gets a copy of the state and the command.
    ActAsync(Box<dyn Fn(A::State, C) -> BoxFuture<'static, Events<A>> + Send + Sync>),
    /// Function applying the new events itself onto the loaded state.
    ActOn(Box<dyn Fn(&mut AggregateState<A>, &C) -> Result<(), A::Error> + Send + Sync>),
}

pub(crate) struct RegisteredHandler<A, C>
where
    A: Aggregate,
{
    pub(crate) expected: ExpectedState,
    pub(crate) get_id: GetIdFn<A, C>,
    pub(crate) resolve_stream: Option<ResolveStreamFn<A, C>>,
    pub(crate) action: Action<A, C>,
}

impl<A, C> RegisteredHandler<A, C>
where
    A: Aggregate,
{
    pub(crate) fn stream_for(&self, id: &A::Id, command: &C) -> StreamName {
        match &self.resolve_stream {
            Some(resolve_stream) => resolve_stream(id, command),
            None => StreamName::for_aggregate::<A>(id),
        }
    }
}

/// First step of a command handler registration, see [`CommandService::on`].
pub struct OnCommand<'a, A, S, C>
where
    A: Aggregate,
    S: EventStore,
{
    service: &'a mut CommandService<A, S>,
    expected: ExpectedState,
    _command: PhantomData<fn(C)>,
}

impl<'a, A, S, C> OnCommand<'a, A, S, C>
where
    A: Aggregate,
    S: EventStore,
    C: Send + Sync + 'static,
{
    pub(crate) fn new(service: &'a mut CommandService<A, S>) -> Self {
        Self {
            service,
            expected: ExpectedState::Any,
            _command: PhantomData,
        }
    }

    /// Sets the precondition on the aggregate stream. Defaults to [`ExpectedState::Any`].
    pub fn in_state(mut self, expected: ExpectedState) -> Self {
        self.expected = expected;
        self
    }

    /// Sets the function extracting the aggregate id from the command.
    pub fn get_id<F>(self, get_id: F) -> WithId<'a, A, S, C>
    where
        F: Fn(&C) -> A::Id + Send + Sync + 'static,
    {
        WithId {
            service: self.service,
            expected: self.expected,
            get_id: Box::new(get_id),
            resolve_stream: None,
        }
    }
}

/// Last step of a command handler registration: sets the business function.
pub struct WithId<'a, A, S, C>
where
    A: Aggregate,
    S: EventStore,
{
    service: &'a mut CommandService<A, S>,
    expected: ExpectedState,
    get_id: GetIdFn<A, C>,
    resolve_stream: Option<ResolveStreamFn<A, C>>,
}

impl<'a, A, S, C> WithId<'a, A, S, C>
where
    A: Aggregate,
    S: EventStore,
    C: Send + Sync + 'static,
{
    /// Overrides the default stream name `{Aggregate::NAME}-{id}` for this command.
    pub fn resolve_stream<F>(mut self, resolve_stream: F) -> Self
    where
        F: Fn(&A::Id, &C) -> StreamName + Send + Sync + 'static,
    {
        self.resolve_stream = Some(Box::new(resolve_stream));
        self
    }

    /// Registers a pure business function returning the new events. The events are applied onto the
    /// state in the returned order.
    pub fn act<F>(self, act: F) -> Result<(), RegistrationError>
    where
        F: Fn(&A::State, &C) -> Result<Vec<A::Event>, A::Error> + Send + Sync + 'static,
    {
        self.register(Action::Act(Box::new(act)))
    }

    /// Registers an asynchronous business function returning the new events.
    pub fn act_async<F>(self, act: F) -> Result<(), RegistrationError>
    where
        F: Fn(A::State, C) -> BoxFuture<'static, Result<Vec<A::Event>, A::Error>> + Send + Sync + 'static,
    {
        self.register(Action::ActAsync(Box::new(act)))
    }

    /// Registers a business function applying events directly onto the loaded state with
    /// [`AggregateState::apply`], so that later events can depend on the state produced by earlier
    /// ones.
    pub fn act_on<F>(self, act: F) -> Result<(), RegistrationError>
    where
        F: Fn(&mut AggregateState<A>, &C) -> Result<(), A::Error> + Send + Sync + 'static,
    {
        self.register(Action::ActOn(Box::new(act)))
    }

    fn register(self, action: Action<A, C>) -> Result<(), RegistrationError> {
        let handler: RegisteredHandler<A, C> = RegisteredHandler {
            expected: self.expected,
            get_id: self.get_id,
            resolve_stream: self.resolve_stream,
            action,
        };

        if self.service.handlers.contains_key(&TypeId::of::<C>()) {
            return Err(RegistrationError::AlreadyRegistered {
                command: std::any::type_name::<C>(),
            });
        }

        let _ = self.service.handlers.insert(TypeId::of::<C>(), Box::new(handler));
        Ok(())
    }
}
