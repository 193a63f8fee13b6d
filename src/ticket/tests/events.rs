//! Broadcast fan-out and the periodic sweep.

use super::*;
use crate::protocol::{EventPayload, QueueEvent};

fn topics_of(events: &[QueueEvent]) -> Vec<&str> {
    events.iter().map(|e| e.topic.as_str()).collect()
}

#[tokio::test]
async fn join_fans_out_to_all_interested_topics() {
    let engine = setup();
    let mut rx = engine.subscribe_events();

    engine.join(QUEUE, "c1", None).await.unwrap();

    let mut events = Vec::new();
    for _ in 0..4 {
        events.push(rx.recv().await.unwrap());
    }
    let topics = topics_of(&events);
    assert!(topics.contains(&"customer:c1"));
    assert!(topics.contains(&"queue:q1"));
    assert_eq!(topics.iter().filter(|t| **t == "business:b1").count(), 2);

    let ticket_updates = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::TicketUpdate { .. }))
        .count();
    let summaries = events
        .iter()
        .filter(|e| matches!(e.payload, EventPayload::QueueSummary { .. }))
        .count();
    assert_eq!(ticket_updates, 2);
    assert_eq!(summaries, 2);
}

#[tokio::test]
async fn summary_events_carry_recomputed_counts() {
    let engine = setup();
    engine.join(QUEUE, "c1", None).await.unwrap();

    let mut rx = engine.subscribe_events();
    engine.join(QUEUE, "c2", None).await.unwrap();

    let mut last_summary = None;
    for _ in 0..4 {
        let event = rx.recv().await.unwrap();
        if let EventPayload::QueueSummary { summary } = event.payload {
            last_summary = Some(summary);
        }
    }
    let summary = last_summary.unwrap();
    assert_eq!(summary.waiting, 2);
    assert_eq!(summary.queue_id, QUEUE);
}

#[tokio::test]
async fn renumbering_broadcasts_moved_tickets() {
    let engine = setup();
    let mut tickets = Vec::new();
    for customer in ["c1", "c2", "c3"] {
        tickets.push(engine.join(QUEUE, customer, None).await.unwrap());
    }

    let mut rx = engine.subscribe_events();
    engine
        .cancel(tickets[0].id, &Principal::customer("c1"))
        .await
        .unwrap();

    // Cancelled ticket + two renumbered survivors, on customer and business
    // channels each, plus two summary events.
    let mut updated_positions = Vec::new();
    for _ in 0..8 {
        let event = rx.recv().await.unwrap();
        if let EventPayload::TicketUpdate { ticket } = event.payload {
            if ticket.status == TicketStatus::Waiting && event.topic.starts_with("customer:") {
                updated_positions.push((ticket.customer_id.clone(), ticket.position));
            }
        }
    }
    updated_positions.sort();
    assert_eq!(
        updated_positions,
        [("c2".to_string(), 1), ("c3".to_string(), 2)]
    );
}

#[tokio::test]
async fn sweep_republishes_summaries_without_mutations() {
    let engine = setup();
    engine.join(QUEUE, "c1", None).await.unwrap();

    let mut rx = engine.subscribe_events();
    engine.publish_queue_summaries();

    let event = rx.recv().await.unwrap();
    match event.payload {
        EventPayload::QueueSummary { summary } => {
            assert_eq!(summary.waiting, 1);
            // The sweep's summary matches one computed directly.
            let direct = engine.summary(QUEUE).unwrap();
            assert_eq!(summary.waiting, direct.waiting);
            assert_eq!(summary.called, direct.called);
            assert_eq!(summary.in_service, direct.in_service);
            assert_eq!(summary.avg_wait_minutes, direct.avg_wait_minutes);
        }
        other => panic!("expected queue summary, got {other:?}"),
    }
}

#[tokio::test]
async fn lagged_subscribers_are_not_an_error() {
    let engine = setup();
    // No receiver at all: every publish is dropped on the floor.
    for i in 0..5 {
        engine.join(QUEUE, &format!("c{i}"), None).await.unwrap();
    }
    assert_eq!(engine.summary(QUEUE).unwrap().waiting, 5);
}
