//! Position assignment and renumbering.

use super::*;

/// Positions of the WAITING set, in stored order.
fn waiting_positions(engine: &TicketEngine, queue: &str) -> Vec<u32> {
    engine
        .next_waiting(queue, usize::MAX)
        .iter()
        .map(|t| t.position)
        .collect()
}

#[tokio::test]
async fn joins_get_dense_positions_in_order() {
    let engine = setup();
    for (i, customer) in ["c1", "c2", "c3", "c4"].iter().enumerate() {
        let ticket = engine.join(QUEUE, customer, None).await.unwrap();
        assert_eq!(ticket.position, i as u32 + 1);
    }
    assert_eq!(waiting_positions(&engine, QUEUE), [1, 2, 3, 4]);
}

#[tokio::test]
async fn cancel_renumbers_later_tickets() {
    let engine = setup();
    let mut tickets = Vec::new();
    for customer in ["c1", "c2", "c3", "c4"] {
        tickets.push(engine.join(QUEUE, customer, None).await.unwrap());
    }

    engine
        .cancel(tickets[1].id, &Principal::customer("c2"))
        .await
        .unwrap();

    // Former positions 3 and 4 moved up; join order is preserved.
    assert_eq!(waiting_positions(&engine, QUEUE), [1, 2, 3]);
    assert_eq!(engine.ticket(tickets[0].id).unwrap().position, 1);
    assert_eq!(engine.ticket(tickets[2].id).unwrap().position, 2);
    assert_eq!(engine.ticket(tickets[3].id).unwrap().position, 3);
    let order: Vec<String> = engine
        .next_waiting(QUEUE, 10)
        .iter()
        .map(|t| t.customer_id.clone())
        .collect();
    assert_eq!(order, ["c1", "c3", "c4"]);
}

#[tokio::test]
async fn call_next_returns_position_order_without_renumbering() {
    let engine = setup();
    let op = operator();
    for customer in ["c1", "c2", "c3", "c4", "c5"] {
        engine.join(QUEUE, customer, None).await.unwrap();
    }

    let mut called_positions = Vec::new();
    for _ in 0..3 {
        let ticket = engine.call_next(QUEUE, &op).await.unwrap();
        assert_eq!(ticket.status, TicketStatus::Called);
        called_positions.push(ticket.position);
    }
    assert_eq!(called_positions, [1, 2, 3]);

    // The survivors keep their already-assigned positions until the next
    // join or terminal transition closes the gap.
    assert_eq!(waiting_positions(&engine, QUEUE), [4, 5]);
}

#[tokio::test]
async fn join_closes_gap_left_by_called_tickets() {
    let engine = setup();
    let op = operator();
    for customer in ["c1", "c2", "c3"] {
        engine.join(QUEUE, customer, None).await.unwrap();
    }
    engine.call_next(QUEUE, &op).await.unwrap();
    assert_eq!(waiting_positions(&engine, QUEUE), [2, 3]);

    let joined = engine.join(QUEUE, "c4", None).await.unwrap();
    assert_eq!(joined.position, 3);
    assert_eq!(waiting_positions(&engine, QUEUE), [1, 2, 3]);
}

#[tokio::test]
async fn terminal_transition_closes_gap() {
    let engine = setup();
    let op = operator();
    for customer in ["c1", "c2", "c3"] {
        engine.join(QUEUE, customer, None).await.unwrap();
    }
    let called = engine.call_next(QUEUE, &op).await.unwrap();
    assert_eq!(waiting_positions(&engine, QUEUE), [2, 3]);

    complete(&engine, called.id).await;
    assert_eq!(waiting_positions(&engine, QUEUE), [1, 2]);
}

#[tokio::test]
async fn density_holds_through_mixed_operations() {
    let engine = setup();
    let op = operator();
    let mut tickets = Vec::new();
    for customer in ["c1", "c2", "c3", "c4", "c5", "c6"] {
        tickets.push(engine.join(QUEUE, customer, None).await.unwrap());
    }

    engine
        .cancel(tickets[2].id, &Principal::customer("c3"))
        .await
        .unwrap();
    let called = engine.call_next(QUEUE, &op).await.unwrap();
    engine
        .advance_status(called.id, TicketStatus::NoShow, None, &op)
        .await
        .unwrap();
    engine.join(QUEUE, "c7", None).await.unwrap();

    let positions = waiting_positions(&engine, QUEUE);
    let expected: Vec<u32> = (1..=positions.len() as u32).collect();
    assert_eq!(positions, expected);
}
