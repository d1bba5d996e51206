use std::sync::Arc;
use std::time::Duration;

use eskit::checkpoint::{CheckpointStore, InMemoryCheckpointStore};
use eskit::gateway::{GatewayHandler, GatewayMessage};
use eskit::metadata::Metadata;
use eskit::producer::{EventStoreProducer, InMemoryProducer, ProducedMessage};
use eskit::store::memory::InMemoryEventStore;
use eskit::store::{EventStore, StoreEvent};
use eskit::subscription::{AllStreamSource, EventSubscriptionBuilder, MessageContext, SubscriptionOptions};
use eskit::{Serializer, StreamName, TypeRegistry};

use serde::{Deserialize, Serialize};

use crate::booking::{booking_service, registry, serializer, BookRoom, RecordPayment, RoomBooked};
use crate::init_tracing;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SendConfirmation {
    booking_id: String,
    amount: u64,
}

fn confirmations(context: &MessageContext) -> Option<GatewayMessage> {
    let booked: &RoomBooked = context.payload::<RoomBooked>()?;

    let confirmation = SendConfirmation {
        booking_id: booked.booking_id.clone(),
        amount: booked.price,
    };

    Some(GatewayMessage::new("confirmations", confirmation).with_metadata(Metadata::new().with("channel", "email")))
}

async fn wait_for_checkpoint(checkpoints: &InMemoryCheckpointStore, subscription_id: &str, position: u64) {
    let reached = tokio::time::timeout(Duration::from_secs(5), async {
        while checkpoints.get_last_checkpoint(subscription_id).await.unwrap().position != Some(position) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(reached.is_ok(), "checkpoint never reached {}", position);
}

fn options(subscription_id: &str) -> SubscriptionOptions {
    SubscriptionOptions::builder()
        .subscription_id(subscription_id)
        .poll_interval(Duration::from_millis(10))
        .build()
}

#[tokio::test]
async fn gateway_routes_selected_messages_to_the_producer() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    let service = booking_service(store.clone());
    let metadata: Metadata = Metadata::new().with_correlation_id(uuid::Uuid::new_v4());
    let _ = service
        .handle_with_metadata(
            BookRoom {
                booking_id: "b-1".to_string(),
                price: 120,
            },
            metadata.clone(),
        )
        .await
        .unwrap();
    let _ = service.handle(full_payment("b-1", 120)).await.unwrap();

    let producer: InMemoryProducer = InMemoryProducer::new();
    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let subscription = EventSubscriptionBuilder::new(
        AllStreamSource::new(store.clone()),
        checkpoints.clone(),
        serializer(),
        options("confirmations-gateway"),
    )
    .add_event_handler(GatewayHandler::new(producer.clone(), confirmations))
    .build();
    let handle = Arc::new(subscription).start();

    // Booking, payment and fully paid: only the booking is routed.
    wait_for_checkpoint(&checkpoints, "confirmations-gateway", 2).await;
    handle.stop().await.unwrap();

    let produced: Vec<ProducedMessage> = producer.messages_in(&StreamName::new("confirmations")).await;
    assert_eq!(produced.len(), 1);

    let confirmation: &ProducedMessage = &produced[0];
    assert_eq!(
        confirmation.message.downcast_ref::<SendConfirmation>(),
        Some(&SendConfirmation {
            booking_id: "b-1".to_string(),
            amount: 120,
        })
    );
    assert_eq!(confirmation.metadata.get("channel"), Some("email"));
    assert_eq!(confirmation.metadata.correlation_id(), metadata.correlation_id());

    let booked: Vec<StoreEvent> = store.read_events(&StreamName::new("booking-b-1"), 0, 1).await.unwrap();
    assert_eq!(confirmation.metadata.causation_id(), Some(booked[0].id));
}

#[tokio::test]
async fn gateway_appends_to_an_event_store() {
    init_tracing();
    let source: InMemoryEventStore = InMemoryEventStore::new();
    let service = booking_service(source.clone());
    for booking in 0..3 {
        let _ = service
            .handle(BookRoom {
                booking_id: format!("b-{}", booking),
                price: 100,
            })
            .await
            .unwrap();
    }

    let mut target_registry: TypeRegistry = registry();
    let _ = target_registry.register::<SendConfirmation>("V1.SendConfirmation").unwrap();
    let target: InMemoryEventStore = InMemoryEventStore::new();
    let producer = EventStoreProducer::new(target.clone(), Serializer::new(target_registry));

    let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
    let handle = Arc::new(
        EventSubscriptionBuilder::new(
            AllStreamSource::new(source.clone()),
            checkpoints.clone(),
            serializer(),
            options("store-gateway"),
        )
        .add_event_handler(GatewayHandler::new(producer, confirmations))
        .build(),
    )
    .start();

    wait_for_checkpoint(&checkpoints, "store-gateway", 2).await;
    handle.stop().await.unwrap();

    let appended: Vec<StoreEvent> = target.read_events(&StreamName::new("confirmations"), 0, 10).await.unwrap();
    assert_eq!(appended.len(), 3);
    assert!(appended.iter().all(|event| event.event_type == "V1.SendConfirmation"));
    assert!(appended.iter().all(|event| event.metadata.causation_id().is_some()));
}

#[tokio::test]
async fn redelivered_message_is_produced_with_the_same_id() {
    init_tracing();
    let store: InMemoryEventStore = InMemoryEventStore::new();
    let _ = booking_service(store.clone())
        .handle(BookRoom {
            booking_id: "b-1".to_string(),
            price: 90,
        })
        .await
        .unwrap();

    let producer: InMemoryProducer = InMemoryProducer::new();

    // Fresh checkpoints replay the booking, as after a crash before the checkpoint was stored.
    for _ in 0..2 {
        let checkpoints: InMemoryCheckpointStore = InMemoryCheckpointStore::new();
        let handle = Arc::new(
            EventSubscriptionBuilder::new(
                AllStreamSource::new(store.clone()),
                checkpoints.clone(),
                serializer(),
                options("replayed-gateway"),
            )
            .add_event_handler(GatewayHandler::new(producer.clone(), confirmations))
            .build(),
        )
        .start();

        wait_for_checkpoint(&checkpoints, "replayed-gateway", 0).await;
        handle.stop().await.unwrap();
    }

    let produced: Vec<ProducedMessage> = producer.messages_in(&StreamName::new("confirmations")).await;
    assert_eq!(produced.len(), 2);
    assert_eq!(produced[0].message_id, produced[1].message_id);

    let booked: Vec<StoreEvent> = store.read_events(&StreamName::new("booking-b-1"), 0, 1).await.unwrap();
    assert_ne!(produced[0].message_id, booked[0].id);
}

fn full_payment(booking_id: &str, amount: u64) -> RecordPayment {
    RecordPayment {
        booking_id: booking_id.to_string(),
        payment_id: format!("{}-full", booking_id),
        amount,
    }
}
