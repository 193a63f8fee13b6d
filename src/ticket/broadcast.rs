//! Broadcast coordinator.
//!
//! One `tokio::sync::broadcast` channel carries every event; each envelope
//! names its topic channel and subscribers (WebSocket/SSE handlers) filter on
//! it. Delivery is fire-and-forget: a send with no receivers, or a receiver
//! that lagged past the ring buffer, is not an error. The periodic sweep and
//! the resync handshake heal any missed event.

use tokio::sync::broadcast;

use crate::protocol::{EventPayload, QueueEvent, QueueSummary, Topic};

use super::types::{now_ms, Ticket};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

pub struct Broadcaster {
    tx: broadcast::Sender<QueueEvent>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn publish(&self, topic: Topic, payload: EventPayload) {
        let _ = self.tx.send(QueueEvent {
            topic: topic.as_channel(),
            at: now_ms(),
            payload,
        });
    }

    /// Ticket-level update: owning customer's channel plus the operating
    /// business channel.
    pub fn publish_ticket(&self, ticket: &Ticket) {
        self.publish(
            Topic::Customer(ticket.customer_id.clone()),
            EventPayload::TicketUpdate {
                ticket: ticket.clone(),
            },
        );
        self.publish(
            Topic::Business(ticket.business_id.clone()),
            EventPayload::TicketUpdate {
                ticket: ticket.clone(),
            },
        );
    }

    /// Queue aggregate: queue channel plus the operating business channel.
    pub fn publish_summary(&self, summary: &QueueSummary) {
        self.publish(
            Topic::Queue(summary.queue_id.clone()),
            EventPayload::QueueSummary {
                summary: summary.clone(),
            },
        );
        self.publish(
            Topic::Business(summary.business_id.clone()),
            EventPayload::QueueSummary {
                summary: summary.clone(),
            },
        );
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}
