//! ETA behavior observable through the engine.

use super::*;
use crate::ticket::estimator::DEFAULT_WAIT_MINUTES;

#[tokio::test]
async fn eta_uses_default_when_nothing_is_configured() {
    let engine = setup();
    let first = engine.join(QUEUE, "c1", None).await.unwrap();
    let second = engine.join(QUEUE, "c2", None).await.unwrap();

    assert_eq!(first.estimated_wait_minutes, DEFAULT_WAIT_MINUTES);
    assert_eq!(second.estimated_wait_minutes, 2 * DEFAULT_WAIT_MINUTES);
}

#[tokio::test]
async fn eta_scales_with_configured_service_time() {
    let engine = TicketEngine::new(registry(10, Some(10)));
    for (i, customer) in ["c1", "c2", "c3"].iter().enumerate() {
        let ticket = engine.join(QUEUE, customer, None).await.unwrap();
        assert_eq!(ticket.estimated_wait_minutes, 10 * (i as u32 + 1));
    }

    let summary = engine.summary(QUEUE).unwrap();
    assert_eq!(summary.avg_wait_minutes, 10);
    assert_eq!(summary.estimated_wait_minutes, 30);
}

#[tokio::test]
async fn completion_history_overrides_configuration() {
    let engine = TicketEngine::new(registry(10, Some(45)));
    let op = operator();

    let first = engine.join(QUEUE, "c1", None).await.unwrap();
    engine.call_next(QUEUE, &op).await.unwrap();
    complete(&engine, first.id).await;

    // The only sample completed within milliseconds, so the trailing mean
    // rounds to zero and beats the 45-minute configuration.
    let summary = engine.summary(QUEUE).unwrap();
    assert_eq!(summary.avg_wait_minutes, 0);

    let next = engine.join(QUEUE, "c2", None).await.unwrap();
    assert_eq!(next.estimated_wait_minutes, 0);
}

#[tokio::test]
async fn summary_reports_currently_serving_number() {
    let engine = setup();
    let op = operator();
    let ticket = engine.join(QUEUE, "c1", None).await.unwrap();

    assert_eq!(engine.summary(QUEUE).unwrap().currently_serving, None);

    engine.call_next(QUEUE, &op).await.unwrap();
    engine
        .advance_status(ticket.id, TicketStatus::InService, None, &op)
        .await
        .unwrap();

    let summary = engine.summary(QUEUE).unwrap();
    assert_eq!(summary.currently_serving, Some(ticket.number));
    assert_eq!(summary.in_service, 1);
    assert_eq!(summary.waiting, 0);
}
