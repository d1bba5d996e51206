use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::Semaphore;

use eskit::subscription::{DeferredAck, EventHandler, HandlerError, HandlingStatus, MessageContext};
use eskit::StreamName;

use crate::booking::{PaymentRecorded, RoomBooked};

#[derive(thiserror::Error, Debug)]
#[error("{0}")]
pub struct ProjectionError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handled {
    pub stream: StreamName,
    pub stream_position: u64,
    pub global_position: u64,
}

/// Records every message it handles, optionally sleeping a random time before returning.
#[derive(Clone, Default)]
pub struct RecordingHandler {
    pub handled: Arc<Mutex<Vec<Handled>>>,
    pub max_delay_ms: u64,
}

impl RecordingHandler {
    pub fn with_random_delay(max_delay_ms: u64) -> Self {
        Self {
            max_delay_ms,
            ..Self::default()
        }
    }

    pub fn handled(&self) -> Vec<Handled> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        if self.max_delay_ms > 0 {
            let delay: u64 = rand::thread_rng().gen_range(0..=self.max_delay_ms);
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        self.handled.lock().unwrap().push(Handled {
            stream: context.stream.clone(),
            stream_position: context.stream_position,
            global_position: context.global_position,
        });

        Ok(HandlingStatus::Success)
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Read model summing the booked prices, ignoring every other message.
#[derive(Clone, Default)]
pub struct RevenueProjection {
    pub total: Arc<Mutex<u64>>,
}

#[async_trait]
impl EventHandler for RevenueProjection {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        let Some(booked) = context.payload::<RoomBooked>() else {
            return Ok(HandlingStatus::Ignored);
        };

        let mut total = self.total.lock().unwrap();
        *total += booked.price;
        Ok(HandlingStatus::Success)
    }
}

/// Fails on payments. Succeeds on them once `failures` attempts failed.
#[derive(Clone)]
pub struct FlakyPaymentHandler {
    pub failures: u32,
    pub attempts: Arc<AtomicU32>,
    pub retry_counts: Arc<Mutex<Vec<u32>>>,
}

impl FlakyPaymentHandler {
    pub fn new(failures: u32) -> Self {
        Self {
            failures,
            attempts: Arc::new(AtomicU32::new(0)),
            retry_counts: Arc::default(),
        }
    }

    pub fn always_failing() -> Self {
        Self::new(u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyPaymentHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        if context.payload::<PaymentRecorded>().is_none() {
            return Ok(HandlingStatus::Ignored);
        }

        self.retry_counts.lock().unwrap().push(context.retry_count);
        let attempt: u32 = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if attempt <= self.failures {
            Err(HandlerError::failed(ProjectionError(format!("attempt {} failed", attempt))))
        } else {
            Ok(HandlingStatus::Success)
        }
    }

    fn name(&self) -> &'static str {
        "flaky_payment"
    }
}

/// Blocks on the message at `global_position` until released.
#[derive(Clone)]
pub struct GateHandler {
    pub global_position: u64,
    pub gate: Arc<Semaphore>,
}

impl GateHandler {
    pub fn new(global_position: u64) -> Self {
        Self {
            global_position,
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl EventHandler for GateHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        if context.global_position == self.global_position {
            let _permit = self.gate.acquire().await.map_err(HandlerError::failed)?;
        }

        Ok(HandlingStatus::Success)
    }
}

/// Takes over the acknowledgement of every message, leaving it to the test.
#[derive(Clone, Default)]
pub struct DeferringHandler {
    pub acks: Arc<Mutex<Vec<(u64, DeferredAck)>>>,
}

impl DeferringHandler {
    pub fn take_acks(&self) -> Vec<(u64, DeferredAck)> {
        std::mem::take(&mut *self.acks.lock().unwrap())
    }

    pub fn pending(&self) -> usize {
        self.acks.lock().unwrap().len()
    }
}

#[async_trait]
impl EventHandler for DeferringHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        let ack: DeferredAck = context.defer_ack();
        self.acks.lock().unwrap().push((context.global_position, ack));
        Ok(HandlingStatus::Pending)
    }
}

pub struct PanickingHandler;

#[async_trait]
impl EventHandler for PanickingHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        if context.payload::<PaymentRecorded>().is_some() {
            panic!("cannot handle payments");
        }

        Ok(HandlingStatus::Success)
    }

    fn name(&self) -> &'static str {
        "panicking"
    }
}

/// Never returns on payments.
pub struct StuckHandler;

#[async_trait]
impl EventHandler for StuckHandler {
    async fn handle(&self, context: &MessageContext) -> Result<HandlingStatus, HandlerError> {
        if context.payload::<PaymentRecorded>().is_some() {
            std::future::pending::<()>().await;
        }

        Ok(HandlingStatus::Success)
    }

    fn name(&self) -> &'static str {
        "stuck"
    }
}
