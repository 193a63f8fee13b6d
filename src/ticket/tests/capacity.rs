//! Capacity bounds, closed queues and the single-active-ticket rule.

use super::*;
use crate::registry::QueueConfig;

#[tokio::test]
async fn capacity_counts_waiting_called_and_in_service() {
    let engine = TicketEngine::new(registry(2, None));
    let op = operator();

    let first = engine.join(QUEUE, "c1", None).await.unwrap();
    engine.join(QUEUE, "c2", None).await.unwrap();
    assert_eq!(
        engine.join(QUEUE, "c3", None).await.unwrap_err(),
        TicketError::QueueFull
    );

    // CALLED still holds a slot.
    engine.call_next(QUEUE, &op).await.unwrap();
    assert_eq!(
        engine.join(QUEUE, "c3", None).await.unwrap_err(),
        TicketError::QueueFull
    );

    // IN_SERVICE still holds a slot.
    engine
        .advance_status(first.id, TicketStatus::InService, None, &op)
        .await
        .unwrap();
    assert_eq!(
        engine.join(QUEUE, "c3", None).await.unwrap_err(),
        TicketError::QueueFull
    );

    // A terminal transition frees the slot.
    engine
        .advance_status(first.id, TicketStatus::Completed, None, &op)
        .await
        .unwrap();
    assert!(engine.join(QUEUE, "c3", None).await.is_ok());
}

#[tokio::test]
async fn inactive_queue_rejects_joins() {
    let registry = registry(10, None);
    registry.upsert_queue(QueueConfig {
        id: QUEUE.into(),
        business_id: BUSINESS.into(),
        name: "Walk-ins".into(),
        max_size: 10,
        is_active: false,
        avg_service_time_minutes: None,
    });
    let engine = TicketEngine::new(registry);
    assert_eq!(
        engine.join(QUEUE, "c1", None).await.unwrap_err(),
        TicketError::QueueClosed
    );
}

#[tokio::test]
async fn inactive_business_rejects_joins() {
    let registry = registry(10, None);
    registry.upsert_business(crate::registry::Business {
        id: BUSINESS.into(),
        name: "Corner Barbers".into(),
        is_active: false,
    });
    let engine = TicketEngine::new(registry);
    assert_eq!(
        engine.join(QUEUE, "c1", None).await.unwrap_err(),
        TicketError::QueueClosed
    );
}

#[tokio::test]
async fn one_active_ticket_per_customer_per_business() {
    let registry = registry(10, None);
    registry.upsert_queue(QueueConfig {
        id: "q2".into(),
        business_id: BUSINESS.into(),
        name: "Appointments".into(),
        max_size: 10,
        is_active: true,
        avg_service_time_minutes: None,
    });
    let engine = TicketEngine::new(registry);

    let ticket = engine.join(QUEUE, "c1", None).await.unwrap();
    assert_eq!(
        engine.join(QUEUE, "c1", None).await.unwrap_err(),
        TicketError::AlreadyQueued
    );
    // Also across a second queue of the same business.
    assert_eq!(
        engine.join("q2", "c1", None).await.unwrap_err(),
        TicketError::AlreadyQueued
    );

    engine
        .cancel(ticket.id, &Principal::customer("c1"))
        .await
        .unwrap();
    assert!(engine.join("q2", "c1", None).await.is_ok());
}

#[tokio::test]
async fn unknown_queue_is_not_found() {
    let engine = setup();
    assert_eq!(
        engine.join("missing", "c1", None).await.unwrap_err(),
        TicketError::NotFound
    );
    assert_eq!(
        engine.call_next("missing", &operator()).await.unwrap_err(),
        TicketError::NotFound
    );
}

#[tokio::test]
async fn failed_join_leaves_no_reservation() {
    let engine = TicketEngine::new(registry(1, None));
    engine.join(QUEUE, "c1", None).await.unwrap();
    assert_eq!(
        engine.join(QUEUE, "c2", None).await.unwrap_err(),
        TicketError::QueueFull
    );
    // The rejected customer holds no slot and no phantom active ticket.
    assert!(engine.active_ticket_for("c2", BUSINESS).is_none());
}
