use std::sync::Arc;

use tokio::sync::watch;

use crate::checkpoint::CheckpointStore;
use crate::serializer::Serializer;
use crate::subscription::{
    EventHandler, EventSource, EventSubscription, FailureHandler, SubscriptionOptions, SubscriptionStatus,
};

/// Struct used to build a brand new [`EventSubscription`].
pub struct EventSubscriptionBuilder<S>
where
    S: EventSource,
{
    source: S,
    checkpoint_store: Arc<dyn CheckpointStore>,
    serializer: Serializer,
    options: SubscriptionOptions,
    handlers: Vec<Arc<dyn EventHandler>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
}

impl<S> EventSubscriptionBuilder<S>
where
    S: EventSource,
{
    /// Creates a new instance of an [`EventSubscriptionBuilder`].
    pub fn new(
        source: S,
        checkpoint_store: impl CheckpointStore + 'static,
        serializer: Serializer,
        options: SubscriptionOptions,
    ) -> Self {
        Self {
            source,
            checkpoint_store: Arc::new(checkpoint_store),
            serializer,
            options,
            handlers: vec![],
            failure_handler: None,
        }
    }

    /// Set event handlers list
    pub fn with_event_handlers(mut self, handlers: Vec<Arc<dyn EventHandler>>) -> Self {
        self.handlers = handlers;
        self
    }

    /// Add a single event handler. Handlers are called in the order they were added.
    pub fn add_event_handler(mut self, handler: impl EventHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Set the handler of messages whose handling failed after every retry. Without one, such a
    /// failure drops the subscription.
    pub fn with_failure_handler(mut self, failure_handler: impl FailureHandler + 'static) -> Self {
        self.failure_handler = Some(Arc::new(failure_handler));
        self
    }

    pub fn build(self) -> EventSubscription<S> {
        let (status, _) = watch::channel(SubscriptionStatus::Stopped);
        let (committed, _) = watch::channel(None);

        EventSubscription {
            source: self.source,
            checkpoint_store: self.checkpoint_store,
            serializer: self.serializer,
            handlers: self.handlers,
            failure_handler: self.failure_handler,
            options: self.options,
            status,
            committed: Arc::new(committed),
        }
    }
}
