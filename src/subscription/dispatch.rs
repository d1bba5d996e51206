use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::Instrument;

use crate::subscription::commit::CheckpointCommitter;
use crate::subscription::partition::partition_for;
use crate::subscription::{
    ConsumeMode, EventHandler, FailureHandler, HandlerError, HandlingStatus, MessageContext, PartitionKeyFn,
    RetryPolicy, SubscriptionError,
};

/// Capacity of the queue of each partition lane.
const LANE_CAPACITY: usize = 64;

/// Per-run state shared by every task handling messages of a subscription.
pub(crate) struct ConsumeState {
    pub(crate) subscription_id: String,
    handlers: Vec<Arc<dyn EventHandler>>,
    failure_handler: Option<Arc<dyn FailureHandler>>,
    retry: RetryPolicy,
    handler_timeout: Option<Duration>,
    pub(crate) committer: tokio::sync::Mutex<CheckpointCommitter>,
    /// Cancelled when the subscription drops.
    pub(crate) dropped: CancellationToken,
    /// Cancelled when the subscription drops, or once in-flight handlers drained on shutdown.
    halted: CancellationToken,
    failure: Mutex<Option<SubscriptionError>>,
    handlers_tracker: TaskTracker,
    acks_tracker: TaskTracker,
}

enum Outcome {
    Handled(HandlingStatus),
    Failed { handler: &'static str, error: HandlerError },
    Panicked { handler: &'static str, message: String },
}

impl ConsumeState {
    pub(crate) fn new(
        subscription_id: String,
        handlers: Vec<Arc<dyn EventHandler>>,
        failure_handler: Option<Arc<dyn FailureHandler>>,
        retry: RetryPolicy,
        handler_timeout: Option<Duration>,
        committer: CheckpointCommitter,
    ) -> Self {
        let dropped: CancellationToken = CancellationToken::new();
        let halted: CancellationToken = dropped.child_token();

        Self {
            subscription_id,
            handlers,
            failure_handler,
            retry,
            handler_timeout,
            committer: tokio::sync::Mutex::new(committer),
            dropped,
            halted,
            failure: Mutex::new(None),
            handlers_tracker: TaskTracker::new(),
            acks_tracker: TaskTracker::new(),
        }
    }

    /// Moves the subscription to the dropped state. Only the first error is kept.
    pub(crate) fn drop_subscription(&self, error: SubscriptionError) {
        tracing::error!({
            subscription_id = %self.subscription_id,
            error = %error,
        }, "subscription dropped");

        let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
        if failure.is_none() {
            *failure = Some(error);
        }
        drop(failure);

        self.dropped.cancel();
    }

    pub(crate) fn take_failure(&self) -> Option<SubscriptionError> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Waits for every in-flight handler call, then abandons the messages still waiting for a
    /// deferred acknowledgement: their positions are not confirmed.
    pub(crate) async fn shutdown(&self) {
        self.handlers_tracker.close();
        self.handlers_tracker.wait().await;

        self.halted.cancel();
        self.acks_tracker.close();
        self.acks_tracker.wait().await;
    }
}

/// Routes messages to handling tasks according to the [`ConsumeMode`].
pub(crate) enum Dispatcher {
    Concurrent {
        permits: Arc<Semaphore>,
    },
    Partitioned {
        lanes: Vec<mpsc::Sender<MessageContext>>,
        key: PartitionKeyFn,
    },
}

impl Dispatcher {
    /// Creates the dispatcher, spawning one worker per lane in partitioned mode. Dropping the
    /// dispatcher lets the lane workers finish their queue and stop.
    pub(crate) fn start(mode: &ConsumeMode, state: &Arc<ConsumeState>) -> Self {
        match mode {
            ConsumeMode::Concurrent { limit } => Self::Concurrent {
                permits: Arc::new(Semaphore::new((*limit).max(1))),
            },
            ConsumeMode::Partitioned { partitions, key } => {
                let lanes: Vec<mpsc::Sender<MessageContext>> = (0..(*partitions).max(1))
                    .map(|_| {
                        let (sender, mut receiver) = mpsc::channel::<MessageContext>(LANE_CAPACITY);
                        let lane_state: Arc<ConsumeState> = state.clone();

                        let _ = state.handlers_tracker.spawn(async move {
                            while let Some(context) = receiver.recv().await {
                                process(lane_state.clone(), context).await;
                            }
                        });

                        sender
                    })
                    .collect();

                Self::Partitioned { lanes, key: key.clone() }
            }
        }
    }

    /// Hands the message over to a handling task. Waits while the concurrency limit is reached or the
    /// lane of the message is full.
    pub(crate) async fn dispatch(&self, state: &Arc<ConsumeState>, context: MessageContext) {
        match self {
            Self::Concurrent { permits } => {
                let Ok(permit) = permits.clone().acquire_owned().await else {
                    return;
                };
                let task_state: Arc<ConsumeState> = state.clone();

                let _ = state.handlers_tracker.spawn(async move {
                    process(task_state, context).await;
                    drop(permit);
                });
            }
            Self::Partitioned { lanes, key } => {
                let partition: usize = partition_for(&key(&context), lanes.len());

                let sent: bool = match lanes.get(partition) {
                    Some(lane) => lane.send(context).await.is_ok(),
                    None => false,
                };

                if !sent {
                    state.drop_subscription(SubscriptionError::TaskPanicked(format!(
                        "worker of partition {} stopped",
                        partition
                    )));
                }
            }
        }
    }
}

/// Runs every handler on the message and settles its position: confirmed when handled, waiting for
/// the acknowledgement when pending, handed to the failure policy otherwise.
async fn process(state: Arc<ConsumeState>, mut context: MessageContext) {
    if state.halted.is_cancelled() {
        return;
    }

    let receiver: oneshot::Receiver<Result<(), String>> = context.arm_ack();
    let outcome: Outcome = handle(&state, &mut context).await;
    context.disarm_ack();

    match outcome {
        Outcome::Handled(HandlingStatus::Pending) => {
            let ack_state: Arc<ConsumeState> = state.clone();
            let _ = state.acks_tracker.spawn(await_ack(ack_state, context, receiver));
        }
        Outcome::Handled(_) => confirm(&state, &context).await,
        Outcome::Failed { handler, error } => fail(&state, &context, handler, error).await,
        Outcome::Panicked { handler, message } => state.drop_subscription(SubscriptionError::HandlerPanicked {
            handler,
            message_id: context.message_id,
            message,
        }),
    }
}

async fn handle(state: &ConsumeState, context: &mut MessageContext) -> Outcome {
    let mut status: HandlingStatus = HandlingStatus::Ignored;

    for handler in &state.handlers {
        let span = tracing::debug_span!(
            "eskit.event_handler",
            subscription_id = %context.subscription_id,
            message_id = %context.message_id,
            message_type = %context.message_type,
            event_handler = handler.name()
        );

        let result = AssertUnwindSafe(invoke(state, handler.as_ref(), context))
            .catch_unwind()
            .instrument(span)
            .await;

        match result {
            Ok(Ok(handler_status)) => status = status.combine(handler_status),
            Ok(Err(error)) => {
                return Outcome::Failed {
                    handler: handler.name(),
                    error,
                }
            }
            Err(panic) => {
                return Outcome::Panicked {
                    handler: handler.name(),
                    message: panic_message(panic.as_ref()),
                }
            }
        }
    }

    Outcome::Handled(status)
}

/// Calls the handler, retrying failed attempts according to the retry policy.
async fn invoke(
    state: &ConsumeState,
    handler: &dyn EventHandler,
    context: &mut MessageContext,
) -> Result<HandlingStatus, HandlerError> {
    context.retry_count = 0;

    loop {
        let attempt: Result<HandlingStatus, HandlerError> = match state.handler_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handler.handle(context))
                .await
                .unwrap_or(Err(HandlerError::Timeout(timeout))),
            None => handler.handle(context).await,
        };

        let error: HandlerError = match attempt {
            Ok(status) => return Ok(status),
            Err(error) if context.retry_count >= state.retry.max_retries => return Err(error),
            Err(error) => error,
        };

        context.retry_count += 1;
        let delay: Duration = state.retry.delay_for(context.retry_count);

        tracing::warn!({
            subscription_id = %context.subscription_id,
            message_id = %context.message_id,
            event_handler = handler.name(),
            retry = context.retry_count,
            error = %error,
        }, "event handler failed, retrying");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = state.halted.cancelled() => return Err(error),
        }
    }
}

async fn await_ack(state: Arc<ConsumeState>, context: MessageContext, receiver: oneshot::Receiver<Result<(), String>>) {
    let acknowledgement = tokio::select! {
        acknowledgement = receiver => acknowledgement,
        _ = state.halted.cancelled() => return,
    };

    match acknowledgement {
        Ok(Ok(())) => confirm(&state, &context).await,
        Ok(Err(reason)) => fail(&state, &context, "deferred acknowledgement", HandlerError::Nacked(reason)).await,
        Err(_) => {
            let error = HandlerError::Nacked("acknowledgement dropped".to_string());
            fail(&state, &context, "deferred acknowledgement", error).await
        }
    }
}

async fn confirm(state: &ConsumeState, context: &MessageContext) {
    let result = state.committer.lock().await.confirm(context.position).await;

    if let Err(error) = result {
        state.drop_subscription(SubscriptionError::Checkpoint(error));
    }
}

async fn fail(state: &ConsumeState, context: &MessageContext, handler: &'static str, error: HandlerError) {
    if state.halted.is_cancelled() {
        return;
    }

    tracing::error!({
        subscription_id = %context.subscription_id,
        message_id = %context.message_id,
        position = context.position.position,
        event_handler = handler,
        error = ?error,
    }, "event handler failed to handle message");

    let Some(failure_handler) = &state.failure_handler else {
        state.drop_subscription(SubscriptionError::Handler {
            handler,
            message_id: context.message_id,
            position: context.position.position,
            source: error,
        });
        return;
    };

    match failure_handler.handle_failure(context, &error).await {
        Ok(()) => confirm(state, context).await,
        Err(failure) => state.drop_subscription(SubscriptionError::Handler {
            handler: failure_handler.name(),
            message_id: context.message_id,
            position: context.position.position,
            source: failure,
        }),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
