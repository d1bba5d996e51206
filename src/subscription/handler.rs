use std::ops::Deref;
use std::time::Duration;

use async_trait::async_trait;

use crate::subscription::MessageContext;

/// What a handler did with a message.
///
/// The variants are ordered so that the status of a message handled by several handlers is the
/// greatest of their statuses, see [`HandlingStatus::combine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandlingStatus {
    /// The handler is not interested in the message. The position can still be checkpointed.
    Ignored,
    Success,
    /// The outcome is not known yet: the handler will acknowledge the message later through
    /// [`MessageContext::defer_ack`].
    Pending,
}

impl HandlingStatus {
    pub fn combine(self, other: HandlingStatus) -> HandlingStatus {
        self.max(other)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Failed(Box<dyn std::error::Error + Send + Sync>),
    #[error("handler timed out after {0:?}")]
    Timeout(Duration),
    #[error("message was negatively acknowledged: {0}")]
    Nacked(String),
}

impl HandlerError {
    pub fn failed(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Failed(Box::new(error))
    }
}

/// This trait is used to implement an `EventHandler`. An event handler receives every message of the
/// subscription it is added to, and can update a read side or perform side effects.
///
/// Messages may be delivered more than once (e.g. after a restart from the last checkpoint), so
/// handlers must be idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handles a message. Returning an error triggers the retry policy of the subscription.
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError>;

    /// The name of the event handler. By default, this is the type name of the event handler,
    /// but it can be overridden to provide a custom name. This name is used as
    /// part of tracing spans, to identify the event handler being run.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<Q, T> EventHandler for T
where
    Q: EventHandler + ?Sized,
    T: Deref<Target = Q> + Send + Sync,
{
    /// Deref call to [`EventHandler::handle`].
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        self.deref().handle(context).await
    }

    /// Deref call to [`EventHandler::name`].
    fn name(&self) -> &'static str {
        self.deref().name()
    }
}
