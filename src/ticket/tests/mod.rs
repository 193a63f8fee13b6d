//! Test suite for the ticket engine, organized by concern.

use std::sync::Arc;

use crate::registry::{Business, QueueConfig, QueueRegistry};
use crate::session::Principal;

use super::engine::TicketEngine;
use super::types::{TicketError, TicketStatus};

pub const BUSINESS: &str = "b1";
pub const QUEUE: &str = "q1";

/// Registry with one active business and one queue.
pub fn registry(max_size: u32, avg_service_time_minutes: Option<u32>) -> Arc<QueueRegistry> {
    let registry = Arc::new(QueueRegistry::new());
    registry.upsert_business(Business {
        id: BUSINESS.into(),
        name: "Corner Barbers".into(),
        is_active: true,
    });
    registry.upsert_queue(QueueConfig {
        id: QUEUE.into(),
        business_id: BUSINESS.into(),
        name: "Walk-ins".into(),
        max_size,
        is_active: true,
        avg_service_time_minutes,
    });
    registry
}

/// Engine over a ten-slot queue with no configured service time.
pub fn setup() -> Arc<TicketEngine> {
    TicketEngine::new(registry(10, None))
}

pub fn operator() -> Principal {
    Principal::business("owner1", BUSINESS)
}

/// Walk a ticket from WAITING all the way to COMPLETED.
pub async fn complete(engine: &TicketEngine, ticket_id: u64) {
    let op = operator();
    engine
        .advance_status(ticket_id, TicketStatus::InService, None, &op)
        .await
        .unwrap();
    engine
        .advance_status(ticket_id, TicketStatus::Completed, None, &op)
        .await
        .unwrap();
}

// Position assignment and renumbering
mod allocator;

// Capacity, closed queues, single-active-ticket
mod capacity;

// Concurrent joins
mod concurrent;


// ETA behavior at the engine level
mod eta;

// Broadcast fan-out and the periodic sweep
mod events;
