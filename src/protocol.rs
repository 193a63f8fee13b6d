//! Wire types shared by the HTTP/WS surface and the broadcast coordinator.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::ticket::{Ticket, TicketId};

/// Process-wide ticket id generator.
static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

#[inline(always)]
pub fn next_ticket_id() -> TicketId {
    ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Set the id counter after recovery from the durable store.
pub fn set_ticket_id_counter(value: u64) {
    ID_COUNTER.store(value, Ordering::Relaxed);
}

// ============== Topics ==============

/// Broadcast topics. Serialized as `customer:{id}`, `business:{id}` and
/// `queue:{id}` channel strings on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Customer(String),
    Business(String),
    Queue(String),
}

impl Topic {
    pub fn as_channel(&self) -> String {
        match self {
            Topic::Customer(id) => format!("customer:{id}"),
            Topic::Business(id) => format!("business:{id}"),
            Topic::Queue(id) => format!("queue:{id}"),
        }
    }

    pub fn parse(channel: &str) -> Option<Topic> {
        let (kind, id) = channel.split_once(':')?;
        if id.is_empty() {
            return None;
        }
        match kind {
            "customer" => Some(Topic::Customer(id.to_string())),
            "business" => Some(Topic::Business(id.to_string())),
            "queue" => Some(Topic::Queue(id.to_string())),
            _ => None,
        }
    }
}

// ============== Events ==============

/// Aggregate view of a queue, recomputed on every mutation and by the
/// periodic sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueSummary {
    pub queue_id: String,
    pub business_id: String,
    pub waiting: usize,
    pub called: usize,
    pub in_service: usize,
    /// Per-customer estimate in minutes.
    pub avg_wait_minutes: u32,
    /// Expected wait for a new joiner at the back of the line.
    pub estimated_wait_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currently_serving: Option<String>,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventPayload {
    TicketUpdate { ticket: Ticket },
    QueueSummary { summary: QueueSummary },
}

/// Envelope published on the broadcast channel. Subscribers filter by the
/// `topic` channel string.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    pub topic: String,
    pub at: u64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

// ============== WebSocket subscription protocol ==============

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ClientFrame {
    /// Subscribe to topic channels; answered with `subscribed` + `snapshot`.
    Subscribe { topics: Vec<String> },
    Unsubscribe { topics: Vec<String> },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ServerFrame {
    /// Ack listing the topics that were accepted and those rejected by
    /// authorization or parsing.
    Subscribed {
        topics: Vec<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        rejected: Vec<String>,
    },
    /// Resync payload for freshly subscribed topics: the same events a live
    /// mutation would have produced, computed from current state.
    Snapshot { events: Vec<QueueEvent> },
    Event(QueueEvent),
    Pong,
    Error { message: String },
}

// ============== Stats ==============

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub total_joined: u64,
    pub total_called: u64,
    pub total_completed: u64,
    pub total_cancelled: u64,
    pub total_no_show: u64,
    pub avg_completed_wait_ms: f64,
    pub open_tickets: usize,
}
