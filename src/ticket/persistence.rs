//! Spawned persistence helpers.
//!
//! The in-memory store stays authoritative; the PostgreSQL mirror is written
//! on spawned tasks with bounded retry so a slow or flapping database never
//! stalls the per-queue critical section.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

use super::engine::TicketEngine;
use super::types::Ticket;

const PERSIST_ATTEMPTS: u32 = 3;
const PERSIST_BASE_BACKOFF_MS: u64 = 50;

impl TicketEngine {
    /// Mirror one ticket. Fire-and-forget with bounded retry.
    pub(crate) fn persist_ticket(&self, ticket: &Ticket) {
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        let storage = Arc::clone(storage);
        let ticket = ticket.clone();
        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(PERSIST_BASE_BACKOFF_MS);
            for attempt in 1..=PERSIST_ATTEMPTS {
                match storage.upsert_ticket(&ticket).await {
                    Ok(()) => return,
                    Err(e) if attempt < PERSIST_ATTEMPTS => {
                        warn!(ticket = ticket.id, attempt, error = %e, "ticket mirror write failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    Err(e) => {
                        error!(ticket = ticket.id, error = %e, "giving up on ticket mirror write");
                    }
                }
            }
        });
    }

    /// Mirror a renumbered batch in one transaction.
    pub(crate) fn persist_tickets(&self, tickets: &[Ticket]) {
        if tickets.is_empty() {
            return;
        }
        let Some(storage) = self.storage.as_ref() else {
            return;
        };
        let storage = Arc::clone(storage);
        let tickets = tickets.to_vec();
        tokio::spawn(async move {
            let mut backoff = Duration::from_millis(PERSIST_BASE_BACKOFF_MS);
            for attempt in 1..=PERSIST_ATTEMPTS {
                match storage.upsert_tickets(&tickets).await {
                    Ok(()) => return,
                    Err(e) if attempt < PERSIST_ATTEMPTS => {
                        warn!(count = tickets.len(), attempt, error = %e, "batch mirror write failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                    Err(e) => {
                        error!(count = tickets.len(), error = %e, "giving up on batch mirror write");
                    }
                }
            }
        });
    }
}
