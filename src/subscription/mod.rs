use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use builder::EventSubscriptionBuilder;
pub use context::{DeferredAck, MessageContext};
pub use failure::{FailureHandler, ParkingFailureHandler};
pub use gap::{measure_gap, SubscriptionGap};
pub use handler::{EventHandler, HandlerError, HandlingStatus};
pub use options::{ConsumeMode, PartitionKeyFn, SubscriptionOptions};
pub use partition::{murmur3_32, partition_for};
pub use retry::RetryPolicy;
pub use sequence::{first_before_gap, CommitPosition, CommitPositionSequence};
pub use source::{AllStreamSource, EventSource, StreamSource};

use crate::checkpoint::{Checkpoint, CheckpointStore, CheckpointStoreError};
use crate::serializer::{SerializationError, Serializer};
use crate::store::{StoreError, StoreEvent};
use commit::CheckpointCommitter;
use dispatch::{ConsumeState, Dispatcher};

mod builder;
mod commit;
mod context;
mod dispatch;
mod failure;
mod gap;
mod handler;
mod options;
mod partition;
mod retry;
mod sequence;
mod source;

#[derive(thiserror::Error, Debug)]
pub enum SubscriptionError {
    #[error(transparent)]
    Checkpoint(#[from] CheckpointStoreError),
    /// Reading the source failed, and kept failing for transient errors.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An event could not be decoded. The subscription never skips it.
    #[error("cannot decode message {message_id} at position {position}: {source}")]
    Serialization {
        message_id: Uuid,
        position: u64,
        #[source]
        source: SerializationError,
    },
    #[error("{handler} failed to handle message {message_id} at position {position}: {source}")]
    Handler {
        handler: &'static str,
        message_id: Uuid,
        position: u64,
        #[source]
        source: HandlerError,
    },
    #[error("{handler} panicked handling message {message_id}: {message}")]
    HandlerPanicked {
        handler: &'static str,
        message_id: Uuid,
        message: String,
    },
    #[error("subscription task failed: {0}")]
    TaskPanicked(String),
}

/// Lifecycle of a subscription: `Stopped -> Subscribing -> Running -> (Dropped | Stopped)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionStatus {
    Stopped,
    /// Loading the checkpoint.
    Subscribing,
    Running,
    /// Stopped on an unrecoverable error. Terminal until the subscription is run again.
    Dropped,
}

/// A pull-based subscription: reads events from an [`EventSource`] after the last checkpoint, hands
/// them to its handlers with bounded concurrency, and checkpoints the positions of handled events
/// without ever moving past one that was not handled.
///
/// Built with [`EventSubscriptionBuilder`].
pub struct EventSubscription<S>
where
    S: EventSource,
{
    source: S,
    checkpoint_store: Arc<dyn CheckpointStore>,
    serializer: Serializer,
    handlers: Vec<Arc<dyn EventHandler>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    options: SubscriptionOptions,
    status: watch::Sender<SubscriptionStatus>,
    committed: Arc<watch::Sender<Option<CommitPosition>>>,
}

impl<S> EventSubscription<S>
where
    S: EventSource,
{
    pub fn subscription_id(&self) -> &str {
        &self.options.subscription_id
    }

    pub fn options(&self) -> &SubscriptionOptions {
        &self.options
    }

    pub fn status(&self) -> SubscriptionStatus {
        *self.status.borrow()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.status.subscribe()
    }

    /// Last position checkpointed by the current or last run.
    pub fn last_committed(&self) -> Option<CommitPosition> {
        *self.committed.borrow()
    }

    fn set_status(&self, status: SubscriptionStatus) {
        let previous: SubscriptionStatus = self.status.send_replace(status);
        if previous != status {
            tracing::info!(
                subscription_id = %self.options.subscription_id,
                from = ?previous,
                to = ?status,
                "subscription status changed"
            );
        }
    }

    /// Runs the subscription until `cancel` is cancelled or the subscription drops.
    ///
    /// On return every in-flight handler call completed, and the last gapless checkpoint was
    /// force-stored. Returns `Ok(())` when stopped through `cancel`, the error that dropped the
    /// subscription otherwise.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), SubscriptionError> {
        self.set_status(SubscriptionStatus::Subscribing);

        let checkpoint: Checkpoint = match self
            .checkpoint_store
            .get_last_checkpoint(&self.options.subscription_id)
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                tracing::error!({
                    subscription_id = %self.options.subscription_id,
                    error = %error,
                }, "failed to load checkpoint");
                self.set_status(SubscriptionStatus::Dropped);
                return Err(error.into());
            }
        };

        tracing::info!(
            subscription_id = %self.options.subscription_id,
            checkpoint = ?checkpoint.position,
            "subscribing"
        );

        let committer: CheckpointCommitter = CheckpointCommitter::new(
            self.options.subscription_id.clone(),
            self.checkpoint_store.clone(),
            self.committed.clone(),
        );

        let state: Arc<ConsumeState> = Arc::new(ConsumeState::new(
            self.options.subscription_id.clone(),
            self.handlers.clone(),
            self.failure_handler.clone(),
            self.options.retry.clone(),
            self.options.handler_timeout,
            committer,
        ));

        let dispatcher: Dispatcher = Dispatcher::start(&self.options.consume_mode, &state);
        self.set_status(SubscriptionStatus::Running);

        let result: Result<(), SubscriptionError> = self.poll(&state, &dispatcher, checkpoint.position, &cancel).await;

        if let Err(error) = result {
            state.drop_subscription(error);
        }

        drop(dispatcher);
        state.shutdown().await;

        let flushed = state.committer.lock().await.flush().await;
        if let Err(error) = flushed {
            state.drop_subscription(error.into());
        }

        match state.take_failure() {
            Some(error) => {
                self.set_status(SubscriptionStatus::Dropped);
                Err(error)
            }
            None => {
                self.set_status(SubscriptionStatus::Stopped);
                Ok(())
            }
        }
    }

    async fn poll(
        &self,
        state: &Arc<ConsumeState>,
        dispatcher: &Dispatcher,
        checkpoint: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<(), SubscriptionError> {
        let mut after: Option<u64> = checkpoint;
        let mut sequence: u64 = 0;
        let mut failures: u32 = 0;

        loop {
            let page = tokio::select! {
                page = self.source.read_after(after, self.options.page_size) => page,
                _ = cancel.cancelled() => return Ok(()),
                _ = state.dropped.cancelled() => return Ok(()),
            };

            let delay: Duration = match page {
                Ok(events) if events.is_empty() => {
                    failures = 0;
                    self.options.poll_interval
                }
                Ok(events) => {
                    failures = 0;

                    for event in events {
                        let position: u64 = self.source.position(&event);
                        let context: MessageContext = self.decode(event, position, sequence)?;

                        dispatcher.dispatch(state, context).await;
                        after = Some(position);
                        sequence += 1;

                        if cancel.is_cancelled() || state.dropped.is_cancelled() {
                            return Ok(());
                        }
                    }

                    continue;
                }
                Err(error) if error.is_transient() && failures < self.options.max_poll_failures => {
                    failures += 1;
                    let delay: Duration = self.backoff(failures);

                    tracing::warn!({
                        subscription_id = %self.options.subscription_id,
                        failures,
                        delay = ?delay,
                        error = %error,
                    }, "failed to read events, retrying");

                    delay
                }
                Err(error) => return Err(error.into()),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Ok(()),
                _ = state.dropped.cancelled() => return Ok(()),
            }
        }
    }

    fn backoff(&self, failures: u32) -> Duration {
        let factor: u32 = 2_u32.saturating_pow(failures.saturating_sub(1));
        self.options
            .poll_interval
            .saturating_mul(factor)
            .min(self.options.poll_backoff_max)
    }

    fn decode(&self, event: StoreEvent, position: u64, sequence: u64) -> Result<MessageContext, SubscriptionError> {
        let payload = self
            .serializer
            .deserialize_payload(&event.event_type, &event.content_type, &event.payload)
            .map_err(|source| {
                tracing::error!({
                    subscription_id = %self.options.subscription_id,
                    message_id = %event.id,
                    event_type = %event.event_type,
                    position,
                }, "cannot decode event");

                SubscriptionError::Serialization {
                    message_id: event.id,
                    position,
                    source,
                }
            })?;

        Ok(MessageContext::new(
            self.options.subscription_id.clone(),
            event.id,
            event.event_type,
            event.content_type,
            event.stream,
            event.stream_position,
            event.global_position,
            CommitPosition::new(position, sequence, event.occurred_on),
            event.occurred_on,
            event.metadata,
            Arc::from(payload),
        ))
    }

    /// Measures how far the subscription is behind its source, from the last position it
    /// checkpointed in this process, or from the checkpoint store if it did not checkpoint yet.
    pub async fn measure_gap(&self) -> Result<SubscriptionGap, SubscriptionError> {
        match self.last_committed() {
            Some(committed) => {
                let head: Option<u64> = self.source.head_position().await?;
                Ok(SubscriptionGap::compute(
                    &self.options.subscription_id,
                    head,
                    Some(committed.position),
                    Some(committed.timestamp),
                ))
            }
            None => measure_gap(&self.source, self.checkpoint_store.as_ref(), &self.options.subscription_id).await,
        }
    }
}

impl<S> EventSubscription<S>
where
    S: EventSource + 'static,
{
    /// Spawns the subscription on the current tokio runtime.
    pub fn start(self: Arc<Self>) -> SubscriptionHandle<S> {
        let cancel: CancellationToken = CancellationToken::new();
        let subscription: Arc<Self> = self.clone();
        let token: CancellationToken = cancel.clone();

        let task = tokio::spawn(async move { subscription.run(token).await });

        SubscriptionHandle {
            subscription: self,
            cancel,
            task: Some(task),
        }
    }
}

/// Handle of a subscription started with [`EventSubscription::start`].
///
/// Dropping the handle without calling [`SubscriptionHandle::stop`] signals the subscription to stop,
/// without waiting for it.
pub struct SubscriptionHandle<S>
where
    S: EventSource,
{
    subscription: Arc<EventSubscription<S>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), SubscriptionError>>>,
}

impl<S> SubscriptionHandle<S>
where
    S: EventSource,
{
    /// Stops the subscription gracefully and waits for it to finish: in-flight handlers complete and
    /// the last checkpoint is flushed.
    ///
    /// Returns the error that dropped the subscription, if it dropped before being stopped.
    pub async fn stop(mut self) -> Result<(), SubscriptionError> {
        self.cancel.cancel();
        self.join().await
    }

    /// Waits for the subscription to finish on its own, i.e. to drop.
    pub async fn join(&mut self) -> Result<(), SubscriptionError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|error| SubscriptionError::TaskPanicked(error.to_string()))?,
            None => Ok(()),
        }
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.subscription.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SubscriptionStatus> {
        self.subscription.watch_status()
    }

    pub async fn measure_gap(&self) -> Result<SubscriptionGap, SubscriptionError> {
        self.subscription.measure_gap().await
    }

    pub fn subscription(&self) -> &EventSubscription<S> {
        &self.subscription
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl<S> Drop for SubscriptionHandle<S>
where
    S: EventSource,
{
    fn drop(&mut self) {
        if self.is_finished() {
            return;
        }

        tracing::warn!(
            subscription_id = %self.subscription.subscription_id(),
            "subscription handle dropped without stop, signaling the subscription to stop"
        );
        self.cancel.cancel();
    }
}
