//! Concurrent joins against one queue.

use std::sync::Arc;

use super::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn fifty_concurrent_joins_fill_the_queue_exactly() {
    let engine = TicketEngine::new(registry(50, None));

    let handles: Vec<_> = (0..50)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.join(QUEUE, &format!("c{i}"), None).await })
        })
        .collect();

    let mut positions = Vec::new();
    for handle in handles {
        let ticket = handle.await.unwrap().unwrap();
        positions.push(ticket.position);
    }

    positions.sort_unstable();
    let expected: Vec<u32> = (1..=50).collect();
    assert_eq!(positions, expected);

    // Queue is now exactly full.
    assert_eq!(
        engine.join(QUEUE, "c50", None).await.unwrap_err(),
        TicketError::QueueFull
    );

    let summary = engine.summary(QUEUE).unwrap();
    assert_eq!(summary.waiting, 50);
    assert_eq!(summary.called, 0);
    assert_eq!(summary.in_service, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn racing_joins_for_one_customer_yield_one_ticket() {
    let engine = TicketEngine::new(registry(50, None));

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.join(QUEUE, "c1", None).await })
        })
        .collect();

    let mut ok = 0;
    let mut already = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => ok += 1,
            Err(TicketError::AlreadyQueued) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);
    assert_eq!(already, 9);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_calls_drain_in_position_order() {
    let engine = TicketEngine::new(registry(20, None));
    for i in 0..10 {
        engine.join(QUEUE, &format!("c{i}"), None).await.unwrap();
    }

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.call_next(QUEUE, &operator()).await })
        })
        .collect();

    let mut positions = Vec::new();
    for handle in handles {
        positions.push(handle.await.unwrap().unwrap().position);
    }
    positions.sort_unstable();
    let expected: Vec<u32> = (1..=10).collect();
    assert_eq!(positions, expected);

    assert_eq!(
        engine.call_next(QUEUE, &operator()).await.unwrap_err(),
        TicketError::EmptyQueue
    );
}
