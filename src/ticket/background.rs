//! Periodic sweeps.
//!
//! The summary sweep is a first-class consistency mechanism: every active
//! queue's summary is recomputed from authoritative state and republished on
//! a fixed interval, so a subscriber that missed an event converges without
//! any event replay. The cleanup sweep bounds memory by dropping terminal
//! tickets and stale completion samples.

use std::sync::Arc;

use tokio::time::{interval, Duration};
use tracing::debug;

use super::engine::TicketEngine;
use super::estimator::TRAILING_WINDOW_MS;
use super::types::{now_ms, TicketId};

/// Cadence of the queue-summary republish.
pub const SUMMARY_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Terminal tickets older than this are dropped from memory.
const TERMINAL_RETENTION_MS: u64 = 24 * 60 * 60 * 1000;

impl TicketEngine {
    pub(crate) async fn background_tasks(self: Arc<Self>) {
        let mut summary_ticker = interval(SUMMARY_SWEEP_INTERVAL);
        let mut cleanup_ticker = interval(CLEANUP_INTERVAL);
        // The first tick of a tokio interval fires immediately; skip it so a
        // fresh engine does not publish empty summaries before anyone joined.
        summary_ticker.tick().await;
        cleanup_ticker.tick().await;

        loop {
            if self.is_shutdown() {
                break;
            }
            tokio::select! {
                _ = summary_ticker.tick() => {
                    self.publish_queue_summaries();
                }
                _ = cleanup_ticker.tick() => {
                    self.cleanup();
                }
            }
        }
    }

    /// Recompute and republish the summary of every active queue.
    pub(crate) fn publish_queue_summaries(&self) {
        let mut published = 0usize;
        for config in self.registry.active_queues() {
            if let Some(summary) = self.summary(&config.id) {
                self.broadcaster.publish_summary(&summary);
                published += 1;
            }
        }
        if published > 0 {
            debug!(queues = published, "periodic summary sweep");
        }
    }

    /// Drop terminal tickets past retention and prune estimator samples.
    /// Reads and prunes only; never touches non-terminal state.
    pub(crate) fn cleanup(&self) {
        let now = now_ms();
        let mut dropped: Vec<TicketId> = Vec::new();

        for entry in self.lines.iter() {
            let mut line = entry.value().lock();
            line.prune_completions(now, TRAILING_WINDOW_MS);

            let cutoff = now.saturating_sub(TERMINAL_RETENTION_MS);
            let stale: Vec<TicketId> = line
                .tickets
                .iter()
                .filter(|(_, t)| {
                    t.status.is_terminal() && t.completed_at.unwrap_or(t.created_at) < cutoff
                })
                .map(|(id, _)| *id)
                .collect();
            for id in stale {
                line.tickets.remove(&id);
                dropped.push(id);
            }
        }

        for id in &dropped {
            self.ticket_index.remove(id);
        }
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "dropped terminal tickets past retention");
        }
    }
}
