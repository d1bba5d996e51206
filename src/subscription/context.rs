use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::event::Payload;
use crate::metadata::Metadata;
use crate::subscription::CommitPosition;
use crate::types::{GlobalPosition, StreamName, StreamPosition};

type AckSender = oneshot::Sender<Result<(), String>>;

/// A decoded message handed to the handlers of a subscription.
#[derive(Clone)]
pub struct MessageContext {
    pub subscription_id: String,
    pub message_id: Uuid,
    /// Registered type name of the payload.
    pub message_type: String,
    pub content_type: String,
    pub stream: StreamName,
    pub stream_position: StreamPosition,
    pub global_position: GlobalPosition,
    /// The position checkpointed for this message.
    pub position: CommitPosition,
    pub occurred_on: DateTime<Utc>,
    pub metadata: Metadata,
    pub payload: Payload,
    /// Number of failed attempts before the current one.
    pub retry_count: u32,
    ack: Arc<Mutex<Option<AckSender>>>,
}

impl MessageContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscription_id: impl Into<String>,
        message_id: Uuid,
        message_type: impl Into<String>,
        content_type: impl Into<String>,
        stream: StreamName,
        stream_position: StreamPosition,
        global_position: GlobalPosition,
        position: CommitPosition,
        occurred_on: DateTime<Utc>,
        metadata: Metadata,
        payload: Payload,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            message_id,
            message_type: message_type.into(),
            content_type: content_type.into(),
            stream,
            stream_position,
            global_position,
            position,
            occurred_on,
            metadata,
            payload,
            retry_count: 0,
            ack: Arc::new(Mutex::new(None)),
        }
    }

    /// Downcasts the payload to the registered shape `T`.
    pub fn payload<T: 'static>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }

    /// Takes over the acknowledgement of this message. The handler must then return
    /// [`super::HandlingStatus::Pending`], and the position is only checkpointed once
    /// [`DeferredAck::ack`] is called.
    ///
    /// Only the first call gets a live acknowledgement; later calls, or calls outside of a
    /// subscription, get one that does nothing.
    pub fn defer_ack(&self) -> DeferredAck {
        let sender: Option<AckSender> = self.ack.lock().unwrap_or_else(PoisonError::into_inner).take();
        DeferredAck { sender }
    }

    /// Arms the acknowledgement slot of this message, returning the receiving end.
    pub(crate) fn arm_ack(&self) -> oneshot::Receiver<Result<(), String>> {
        let (sender, receiver) = oneshot::channel();
        *self.ack.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        receiver
    }

    /// Drops the acknowledgement if no handler took it over.
    pub(crate) fn disarm_ack(&self) {
        let _ = self.ack.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

impl std::fmt::Debug for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageContext")
            .field("subscription_id", &self.subscription_id)
            .field("message_id", &self.message_id)
            .field("message_type", &self.message_type)
            .field("stream", &self.stream)
            .field("stream_position", &self.stream_position)
            .field("global_position", &self.global_position)
            .field("retry_count", &self.retry_count)
            .finish()
    }
}

/// Acknowledgement of a message whose handling completes outside of the handler call.
///
/// Dropping it without calling [`DeferredAck::ack`] counts as a negative acknowledgement.
#[derive(Debug)]
pub struct DeferredAck {
    sender: Option<AckSender>,
}

impl DeferredAck {
    pub fn ack(mut self) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Ok(()));
        }
    }

    pub fn nack(mut self, reason: impl Into<String>) {
        if let Some(sender) = self.sender.take() {
            let _ = sender.send(Err(reason.into()));
        }
    }
}
