use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use eskit::checkpoint::{BatchedCheckpointStore, Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use eskit::metadata::{tags, Metadata};
use eskit::producer::{InMemoryProducer, ProducedMessage};
use eskit::serializer::CONTENT_TYPE_JSON;
use eskit::store::memory::InMemoryEventStore;
use eskit::store::{EventStore, NewEvent};
use eskit::subscription::{
    measure_gap, AllStreamSource, ConsumeMode, EventSource, EventSubscription, EventSubscriptionBuilder,
    HandlerError, ParkingFailureHandler, RetryPolicy, StreamSource, SubscriptionError, SubscriptionGap,
    SubscriptionHandle, SubscriptionOptions, SubscriptionStatus,
};
use eskit::{ExpectedStreamVersion, StreamName};

use crate::booking::{
    booking_service, serializer, BookRoom, DeferringHandler, FlakyPaymentHandler, GateHandler, Handled,
    PanickingHandler, PaymentRecorded, RecordPayment, RecordingHandler, RevenueProjection, StuckHandler,
};
use crate::init_tracing;

const WAIT: Duration = Duration::from_secs(5);

/// Books `count` rooms, numbered from `first`. Each booking is one event.
async fn book_rooms(store: &InMemoryEventStore, first: usize, count: usize) {
    let service = booking_service(store.clone());
    for index in first..first + count {
        let _ = service
            .handle(BookRoom {
                booking_id: format!("b-{}", index),
                price: 100 + index as u64,
            })
            .await
            .unwrap();
    }
}

/// Records `payments` payments of 10 on the booking. Each payment is one event.
async fn pay(store: &InMemoryEventStore, booking_id: &str, payments: usize) {
    let service = booking_service(store.clone());
    for index in 0..payments {
        let _ = service
            .handle(RecordPayment {
                booking_id: booking_id.to_string(),
                payment_id: format!("{}-p-{}", booking_id, index),
                amount: 10,
            })
            .await
            .unwrap();
    }
}

fn options(subscription_id: &str, consume_mode: ConsumeMode) -> SubscriptionOptions {
    SubscriptionOptions::builder()
        .subscription_id(subscription_id)
        .consume_mode(consume_mode)
        .poll_interval(Duration::from_millis(10))
        .build()
}

fn all_stream(
    store: &InMemoryEventStore,
    checkpoints: impl CheckpointStore + 'static,
    options: SubscriptionOptions,
) -> EventSubscriptionBuilder<AllStreamSource<InMemoryEventStore>> {
    EventSubscriptionBuilder::new(AllStreamSource::new(store.clone()), checkpoints, serializer(), options)
}

fn start<S: EventSource + 'static>(subscription: EventSubscription<S>) -> SubscriptionHandle<S> {
    Arc::new(subscription).start()
}

async fn wait_for_checkpoint(checkpoints: &impl CheckpointStore, subscription_id: &str, position: u64) {
    let reached = tokio::time::timeout(WAIT, async {
        loop {
            let checkpoint: Checkpoint = checkpoints.get_last_checkpoint(subscription_id).await.unwrap();
            if checkpoint.position == Some(position) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "checkpoint of {} never reached {}", subscription_id, position);
}

async fn wait_until(condition: impl Fn() -> bool) {
    let reached = tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "condition never met");
}

async fn join_dropped<S: EventSource>(handle: &mut SubscriptionHandle<S>) -> SubscriptionError {
    let result = tokio::time::timeout(WAIT, handle.join()).await.unwrap();
    assert_eq!(handle.status(), SubscriptionStatus::Dropped);
    result.unwrap_err()
}

#[tokio::test]
async fn handles_every_event_and_checkpoints_the_head() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 5).await;
    pay(&store, "b-0", 3).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let projection: RevenueProjection = RevenueProjection::default();
    let recorder: RecordingHandler = RecordingHandler::with_random_delay(5);

    let subscription = all_stream(&store, checkpoints.clone(), options("revenue", ConsumeMode::Concurrent { limit: 8 }))
        .add_event_handler(projection.clone())
        .add_event_handler(recorder.clone())
        .build();
    let handle = start(subscription);

    wait_for_checkpoint(&checkpoints, "revenue", 7).await;
    assert_eq!(handle.status(), SubscriptionStatus::Running);

    let gap: SubscriptionGap = handle.measure_gap().await.unwrap();
    assert_eq!(gap.position_gap, 0);
    assert_eq!(gap.time_gap, Duration::ZERO);

    handle.stop().await.unwrap();

    assert_eq!(*projection.total.lock().unwrap(), 100 + 101 + 102 + 103 + 104);

    let mut positions: Vec<u64> = recorder.handled().iter().map(|handled| handled.global_position).collect();
    positions.sort_unstable();
    assert_eq!(positions, (0..8).collect::<Vec<u64>>());
}

#[tokio::test]
async fn checkpoint_never_moves_past_an_unhandled_event() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 6).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let gate: GateHandler = GateHandler::new(2);
    let recorder: RecordingHandler = RecordingHandler::default();

    let subscription = all_stream(&store, checkpoints.clone(), options("gated", ConsumeMode::Concurrent { limit: 8 }))
        .add_event_handler(gate.clone())
        .add_event_handler(recorder.clone())
        .build();
    let handle = start(subscription);

    wait_until(|| recorder.handled().len() == 5).await;
    wait_for_checkpoint(&checkpoints, "gated", 1).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(checkpoints.get_last_checkpoint("gated").await.unwrap().position, Some(1));
    assert_eq!(handle.subscription().last_committed().map(|committed| committed.position), Some(1));

    gate.release();
    wait_for_checkpoint(&checkpoints, "gated", 5).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn failing_handler_drops_the_subscription_at_the_failed_message() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;
    pay(&store, "b-0", 2).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let subscription = all_stream(&store, checkpoints.clone(), options("failing", ConsumeMode::Concurrent { limit: 1 }))
        .add_event_handler(FlakyPaymentHandler::always_failing())
        .build();
    let mut handle = start(subscription);

    let error: SubscriptionError = join_dropped(&mut handle).await;

    assert!(matches!(
        error,
        SubscriptionError::Handler {
            handler: "flaky_payment",
            position: 1,
            source: HandlerError::Failed(_),
            ..
        }
    ));
    assert_eq!(checkpoints.get_last_checkpoint("failing").await.unwrap().position, Some(0));
}

#[tokio::test]
async fn failed_attempts_are_retried() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;
    pay(&store, "b-0", 1).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let flaky: FlakyPaymentHandler = FlakyPaymentHandler::new(2);
    let retry: RetryPolicy = RetryPolicy::builder()
        .max_retries(3)
        .delay(Duration::from_millis(1))
        .build();

    let subscription = EventSubscriptionBuilder::new(
        AllStreamSource::new(store.clone()),
        checkpoints.clone(),
        serializer(),
        SubscriptionOptions::builder()
            .subscription_id("retrying")
            .poll_interval(Duration::from_millis(10))
            .retry(retry)
            .build(),
    )
    .add_event_handler(flaky.clone())
    .build();
    let handle = start(subscription);

    wait_for_checkpoint(&checkpoints, "retrying", 1).await;
    handle.stop().await.unwrap();

    assert_eq!(flaky.attempts(), 3);
    assert_eq!(*flaky.retry_counts.lock().unwrap(), vec![0, 1, 2]);
}

#[tokio::test]
async fn failure_handler_parks_failed_messages_and_the_subscription_goes_on() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;
    pay(&store, "b-0", 2).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let producer: InMemoryProducer = InMemoryProducer::new();

    let subscription = all_stream(&store, checkpoints.clone(), options("parking", ConsumeMode::default()))
        .add_event_handler(FlakyPaymentHandler::always_failing())
        .with_failure_handler(ParkingFailureHandler::new(producer.clone(), "parked-payments"))
        .build();
    let handle = start(subscription);

    wait_for_checkpoint(&checkpoints, "parking", 2).await;
    handle.stop().await.unwrap();

    let parked: Vec<ProducedMessage> = producer.messages_in(&StreamName::new("parked-payments")).await;
    assert_eq!(parked.len(), 2);

    let first: &ProducedMessage = parked
        .iter()
        .find(|message| message.metadata.get(tags::ORIGINAL_POSITION) == Some("1"))
        .unwrap();
    assert_eq!(first.metadata.get(tags::ORIGINAL_STREAM), Some("booking-b-0"));
    assert!(first.metadata.get(tags::ERROR).is_some());
    assert!(first.metadata.causation_id().is_some());
    assert!(first.message.downcast_ref::<PaymentRecorded>().is_some());
}

#[tokio::test]
async fn deferred_acknowledgements_confirm_positions_in_any_order() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 3).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let deferring: DeferringHandler = DeferringHandler::default();

    let subscription = all_stream(&store, checkpoints.clone(), options("deferred", ConsumeMode::default()))
        .add_event_handler(deferring.clone())
        .build();
    let handle = start(subscription);

    wait_until(|| deferring.pending() == 3).await;

    let mut acks = deferring.take_acks();
    acks.sort_by_key(|(position, _)| std::cmp::Reverse(*position));
    let (first_position, first_ack) = acks.pop().unwrap();
    assert_eq!(first_position, 0);

    for (_, ack) in acks {
        ack.ack();
    }
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(checkpoints.get_last_checkpoint("deferred").await.unwrap().position, None);

    first_ack.ack();
    wait_for_checkpoint(&checkpoints, "deferred", 2).await;

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn negative_acknowledgement_drops_the_subscription() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;

    let deferring: DeferringHandler = DeferringHandler::default();
    let subscription = all_stream(
        &store,
        InMemoryCheckpointStore::new(),
        options("nacked", ConsumeMode::default()),
    )
    .add_event_handler(deferring.clone())
    .build();
    let mut handle = start(subscription);

    wait_until(|| deferring.pending() == 1).await;
    for (_, ack) in deferring.take_acks() {
        ack.nack("downstream rejected the message");
    }

    let error: SubscriptionError = join_dropped(&mut handle).await;
    assert!(matches!(
        error,
        SubscriptionError::Handler {
            source: HandlerError::Nacked(_),
            ..
        }
    ));
}

#[tokio::test]
async fn partitioned_consumption_keeps_the_order_of_each_stream() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 4).await;
    for booking in 0..4 {
        pay(&store, &format!("b-{}", booking), 3).await;
    }

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let recorder: RecordingHandler = RecordingHandler::with_random_delay(5);

    let subscription = all_stream(
        &store,
        checkpoints.clone(),
        options("partitioned", ConsumeMode::partitioned_by_stream(3)),
    )
    .add_event_handler(recorder.clone())
    .build();
    let handle = start(subscription);

    wait_for_checkpoint(&checkpoints, "partitioned", 15).await;
    handle.stop().await.unwrap();

    let handled: Vec<Handled> = recorder.handled();
    assert_eq!(handled.len(), 16);

    for booking in 0..4 {
        let stream: StreamName = StreamName::new(format!("booking-b-{}", booking));
        let positions: Vec<u64> = handled
            .iter()
            .filter(|handled| handled.stream == stream)
            .map(|handled| handled.stream_position)
            .collect();
        assert_eq!(positions, vec![0, 1, 2, 3], "stream {} handled out of order", stream);
    }
}

async fn assert_handled_in_arrival_order(subscription_id: &str, consume_mode: ConsumeMode) {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 3).await;
    for booking in 0..3 {
        pay(&store, &format!("b-{}", booking), 2).await;
    }

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let recorder: RecordingHandler = RecordingHandler::with_random_delay(5);

    let subscription = all_stream(&store, checkpoints.clone(), options(subscription_id, consume_mode))
        .add_event_handler(recorder.clone())
        .build();
    let handle = start(subscription);

    wait_for_checkpoint(&checkpoints, subscription_id, 8).await;
    handle.stop().await.unwrap();

    let positions: Vec<u64> = recorder.handled().iter().map(|handled| handled.global_position).collect();
    assert_eq!(positions, (0..9).collect::<Vec<u64>>());
}

#[tokio::test]
async fn single_partition_handles_events_in_arrival_order() {
    assert_handled_in_arrival_order("single-partition", ConsumeMode::partitioned_by_stream(1)).await;
}

#[tokio::test]
async fn default_consume_mode_handles_events_in_arrival_order() {
    assert_handled_in_arrival_order("sequential", ConsumeMode::default()).await;
}

#[tokio::test]
async fn restart_resumes_after_the_checkpoint() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    book_rooms(&store, 0, 3).await;

    let first: RecordingHandler = RecordingHandler::default();
    let handle = start(
        all_stream(&store, checkpoints.clone(), options("resumable", ConsumeMode::default()))
            .add_event_handler(first.clone())
            .build(),
    );
    wait_for_checkpoint(&checkpoints, "resumable", 2).await;
    handle.stop().await.unwrap();

    book_rooms(&store, 3, 2).await;

    let second: RecordingHandler = RecordingHandler::default();
    let handle = start(
        all_stream(&store, checkpoints.clone(), options("resumable", ConsumeMode::default()))
            .add_event_handler(second.clone())
            .build(),
    );
    wait_for_checkpoint(&checkpoints, "resumable", 4).await;
    handle.stop().await.unwrap();

    assert_eq!(first.handled().len(), 3);

    let mut resumed: Vec<u64> = second.handled().iter().map(|handled| handled.global_position).collect();
    resumed.sort_unstable();
    assert_eq!(resumed, vec![3, 4]);
}

#[tokio::test]
async fn unknown_event_type_drops_the_subscription() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;

    let unknown: NewEvent = NewEvent {
        id: Uuid::new_v4(),
        event_type: "V1.RoomCancelled".to_string(),
        content_type: CONTENT_TYPE_JSON.to_string(),
        payload: b"{}".to_vec(),
        metadata: Metadata::new(),
    };
    let _ = store
        .append_events(&StreamName::new("booking-b-0"), ExpectedStreamVersion::Exact(0), vec![unknown])
        .await
        .unwrap();

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let mut handle = start(
        all_stream(&store, checkpoints.clone(), options("strict", ConsumeMode::default()))
            .add_event_handler(RecordingHandler::default())
            .build(),
    );

    let error: SubscriptionError = join_dropped(&mut handle).await;

    assert!(matches!(error, SubscriptionError::Serialization { position: 1, .. }));
    // The booking may or may not have been handled before the drop, the unknown event never is.
    let checkpoint: Checkpoint = checkpoints.get_last_checkpoint("strict").await.unwrap();
    assert!(checkpoint.position <= Some(0));
}

#[tokio::test]
async fn panicking_handler_drops_the_subscription() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;
    pay(&store, "b-0", 1).await;

    let mut handle = start(
        all_stream(&store, InMemoryCheckpointStore::new(), options("panicking", ConsumeMode::default()))
            .add_event_handler(PanickingHandler)
            .build(),
    );

    let error: SubscriptionError = join_dropped(&mut handle).await;

    match error {
        SubscriptionError::HandlerPanicked { handler, message, .. } => {
            assert_eq!(handler, "panicking");
            assert_eq!(message, "cannot handle payments");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn slow_handler_times_out() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 1).await;
    pay(&store, "b-0", 1).await;

    let options: SubscriptionOptions = SubscriptionOptions::builder()
        .subscription_id("timing-out")
        .poll_interval(Duration::from_millis(10))
        .handler_timeout(Duration::from_millis(50))
        .build();
    let mut handle = start(
        all_stream(&store, InMemoryCheckpointStore::new(), options)
            .add_event_handler(StuckHandler)
            .build(),
    );

    let error: SubscriptionError = join_dropped(&mut handle).await;

    assert!(matches!(
        error,
        SubscriptionError::Handler {
            handler: "stuck",
            source: HandlerError::Timeout(_),
            ..
        }
    ));
}

#[tokio::test]
async fn stop_flushes_batched_checkpoints() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 5).await;

    let memory: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let handle = start(
        all_stream(
            &store,
            BatchedCheckpointStore::new(memory.clone(), 1_000),
            options("batched", ConsumeMode::default()),
        )
        .add_event_handler(RecordingHandler::default())
        .build(),
    );

    wait_until(|| handle.subscription().last_committed().map(|committed| committed.position) == Some(4)).await;
    assert_eq!(memory.get_last_checkpoint("batched").await.unwrap().position, None);

    handle.stop().await.unwrap();

    assert_eq!(memory.get_last_checkpoint("batched").await.unwrap().position, Some(4));
    assert_eq!(memory.writes(), 1);
}

#[tokio::test]
async fn stream_subscription_checkpoints_stream_positions() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    book_rooms(&store, 0, 2).await;
    pay(&store, "b-0", 2).await;
    pay(&store, "b-1", 2).await;

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let recorder: RecordingHandler = RecordingHandler::default();
    let handle = start(
        EventSubscriptionBuilder::new(
            StreamSource::new(store.clone(), "booking-b-1"),
            checkpoints.clone(),
            serializer(),
            options("single-stream", ConsumeMode::default()),
        )
        .add_event_handler(recorder.clone())
        .build(),
    );

    wait_for_checkpoint(&checkpoints, "single-stream", 2).await;
    handle.stop().await.unwrap();

    let handled: Vec<Handled> = recorder.handled();
    assert_eq!(handled.len(), 3);
    assert!(handled
        .iter()
        .all(|handled| handled.stream == StreamName::new("booking-b-1")));
}

#[tokio::test]
async fn gap_is_measured_from_the_stored_checkpoint() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let source: AllStreamSource<InMemoryEventStore> = AllStreamSource::new(store.clone());

    let empty: SubscriptionGap = measure_gap(&source, &checkpoints, "monitored").await.unwrap();
    assert_eq!(empty.position_gap, 0);

    book_rooms(&store, 0, 3).await;
    let never_ran: SubscriptionGap = measure_gap(&source, &checkpoints, "monitored").await.unwrap();
    assert_eq!(never_ran.position_gap, 3);

    let _ = checkpoints
        .store_checkpoint(Checkpoint::new("monitored", Some(0)), true)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    let behind: SubscriptionGap = measure_gap(&source, &checkpoints, "monitored").await.unwrap();
    assert_eq!(behind.position_gap, 2);
    assert!(behind.time_gap >= Duration::from_millis(10));
}

#[tokio::test]
async fn status_follows_the_lifecycle() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    let subscription = Arc::new(
        all_stream(&store, InMemoryCheckpointStore::new(), options("lifecycle", ConsumeMode::default()))
            .add_event_handler(RecordingHandler::default())
            .build(),
    );
    assert_eq!(subscription.status(), SubscriptionStatus::Stopped);

    let mut status = subscription.watch_status();
    let handle = subscription.clone().start();

    let running = tokio::time::timeout(WAIT, status.wait_for(|status| *status == SubscriptionStatus::Running)).await;
    assert!(running.is_ok());
    drop(running);

    handle.stop().await.unwrap();
    assert_eq!(subscription.status(), SubscriptionStatus::Stopped);
}
