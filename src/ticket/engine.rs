//! Core `TicketEngine` struct, constructors and read-side helpers.
//!
//! The mutating operations live in `ops.rs`, persistence helpers in
//! `persistence.rs` and the periodic sweeps in `background.rs`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::notify::Notifier;
use crate::protocol::{set_ticket_id_counter, EngineStats, QueueEvent, QueueSummary};
use crate::registry::{QueueConfig, QueueRegistry};

use super::broadcast::Broadcaster;
use super::estimator;
use super::postgres::PostgresStorage;
use super::types::{now_ms, EngineMetrics, LineState, Ticket, TicketId};

/// Per-business ticket-number sequence, reset on day rollover.
pub(crate) struct DayCounter {
    pub date: String,
    pub last_seq: u32,
}

pub struct TicketEngine {
    pub(crate) registry: Arc<QueueRegistry>,
    /// One lock per queue. All ticket mutation for a queue happens inside it;
    /// operations on different queues never contend.
    pub(crate) lines: DashMap<String, Arc<Mutex<LineState>>>,
    /// O(1) ticket -> owning queue lookup.
    pub(crate) ticket_index: DashMap<TicketId, String>,
    /// (customer, business) -> active ticket. The entry API is the atomic
    /// check-and-reserve that enforces one active ticket per pair across all
    /// of a business's queues.
    pub(crate) active_index: DashMap<(String, String), TicketId>,
    day_counters: DashMap<String, DayCounter>,
    pub(crate) broadcaster: Broadcaster,
    pub(crate) storage: Option<Arc<PostgresStorage>>,
    pub(crate) notifier: Notifier,
    pub(crate) metrics: EngineMetrics,
    shutdown: AtomicBool,
}

impl TicketEngine {
    /// In-memory engine without a durable mirror.
    pub fn new(registry: Arc<QueueRegistry>) -> Arc<Self> {
        Self::create(registry, None, Notifier::new(None))
    }

    /// Engine with a PostgreSQL mirror; recovers open tickets on startup.
    /// Falls back to memory-only when the connection fails, matching the
    /// server's degrade-don't-die startup behavior.
    pub async fn with_postgres(
        registry: Arc<QueueRegistry>,
        database_url: &str,
        notifier: Notifier,
    ) -> Arc<Self> {
        match PostgresStorage::new(database_url).await {
            Ok(storage) => {
                if let Err(e) = storage.migrate().await {
                    error!(error = %e, "failed to run ticket store migrations");
                }
                let storage = Arc::new(storage);
                let engine = Self::create(registry, Some(Arc::clone(&storage)), notifier);
                engine.recover(&storage).await;
                engine
            }
            Err(e) => {
                error!(error = %e, "failed to connect to PostgreSQL, running without persistence");
                Self::create(registry, None, notifier)
            }
        }
    }

    pub fn with_notifier(registry: Arc<QueueRegistry>, notifier: Notifier) -> Arc<Self> {
        Self::create(registry, None, notifier)
    }

    fn create(
        registry: Arc<QueueRegistry>,
        storage: Option<Arc<PostgresStorage>>,
        notifier: Notifier,
    ) -> Arc<Self> {
        let has_storage = storage.is_some();
        let engine = Arc::new(Self {
            registry,
            lines: DashMap::new(),
            ticket_index: DashMap::new(),
            active_index: DashMap::new(),
            day_counters: DashMap::new(),
            broadcaster: Broadcaster::new(),
            storage,
            notifier,
            metrics: EngineMetrics::new(),
            shutdown: AtomicBool::new(false),
        });

        let sweeper = Arc::clone(&engine);
        tokio::spawn(async move {
            sweeper.background_tasks().await;
        });

        if has_storage {
            info!("PostgreSQL ticket mirror enabled");
        }
        engine
    }

    // ============== Lookups ==============

    pub(crate) fn line(&self, queue_id: &str) -> Arc<Mutex<LineState>> {
        self.lines
            .entry(queue_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(LineState::new())))
            .clone()
    }

    pub fn ticket(&self, ticket_id: TicketId) -> Option<Ticket> {
        let queue_id = self.ticket_index.get(&ticket_id)?.clone();
        let line = self.line(&queue_id);
        let line = line.lock();
        line.tickets.get(&ticket_id).cloned()
    }

    /// The customer's non-terminal ticket at a business, if any.
    pub fn active_ticket_for(&self, customer_id: &str, business_id: &str) -> Option<Ticket> {
        let id = *self
            .active_index
            .get(&(customer_id.to_string(), business_id.to_string()))?;
        self.ticket(id)
    }

    /// All active tickets held by a customer, across businesses. Used by the
    /// resync handshake for the customer's own channel.
    pub fn active_tickets_for_customer(&self, customer_id: &str) -> Vec<Ticket> {
        let ids: Vec<TicketId> = self
            .active_index
            .iter()
            .filter(|entry| entry.key().0 == customer_id)
            .map(|entry| *entry.value())
            .collect();
        ids.into_iter().filter_map(|id| self.ticket(id)).collect()
    }

    // ============== Summaries ==============

    pub(crate) fn summary_from_line(
        &self,
        line: &LineState,
        config: &QueueConfig,
        now: u64,
    ) -> QueueSummary {
        let per = estimator::per_customer_minutes(line, config, now);
        let currently_serving = line
            .in_service
            .first()
            .and_then(|id| line.tickets.get(id))
            .map(|t| t.number.clone());
        QueueSummary {
            queue_id: config.id.clone(),
            business_id: config.business_id.clone(),
            waiting: line.waiting.len(),
            called: line.called.len(),
            in_service: line.in_service.len(),
            avg_wait_minutes: per,
            estimated_wait_minutes: estimator::eta_minutes(line.waiting.len() as u32, per),
            currently_serving,
            updated_at: now,
        }
    }

    /// Compute a queue's summary from current state. `None` for unknown queues.
    pub fn summary(&self, queue_id: &str) -> Option<QueueSummary> {
        let config = self.registry.queue(queue_id)?;
        let line = self.line(queue_id);
        let now = now_ms();
        let line = line.lock();
        Some(self.summary_from_line(&line, &config, now))
    }

    /// The next waiting tickets of a queue in position order (operator board).
    pub fn next_waiting(&self, queue_id: &str, limit: usize) -> Vec<Ticket> {
        let line = self.line(queue_id);
        let line = line.lock();
        line.waiting
            .iter()
            .take(limit)
            .filter_map(|id| line.tickets.get(id).cloned())
            .collect()
    }

    // ============== Events ==============

    pub fn subscribe_events(&self) -> broadcast::Receiver<QueueEvent> {
        self.broadcaster.subscribe()
    }

    // ============== Ticket numbers ==============

    /// Next date-scoped ticket number for a business: `YYYYMMDD-NNN`.
    /// The dashmap entry guard makes the sequence atomic across queues.
    pub(crate) fn next_ticket_number(&self, business_id: &str, now: u64) -> String {
        let today = format_day(now);
        let mut counter = self
            .day_counters
            .entry(business_id.to_string())
            .or_insert_with(|| DayCounter {
                date: today.clone(),
                last_seq: 0,
            });
        if counter.date != today {
            counter.date = today.clone();
            counter.last_seq = 0;
        }
        counter.last_seq += 1;
        format!("{}-{:03}", today, counter.last_seq)
    }

    // ============== Stats / lifecycle ==============

    pub fn stats(&self) -> EngineStats {
        let count = self.metrics.wait_ms_count.load(Ordering::Relaxed);
        let avg_wait = if count > 0 {
            self.metrics.wait_ms_sum.load(Ordering::Relaxed) as f64 / count as f64
        } else {
            0.0
        };
        EngineStats {
            total_joined: self.metrics.total_joined.load(Ordering::Relaxed),
            total_called: self.metrics.total_called.load(Ordering::Relaxed),
            total_completed: self.metrics.total_completed.load(Ordering::Relaxed),
            total_cancelled: self.metrics.total_cancelled.load(Ordering::Relaxed),
            total_no_show: self.metrics.total_no_show.load(Ordering::Relaxed),
            avg_completed_wait_ms: avg_wait,
            open_tickets: self.active_index.len(),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    // ============== Recovery ==============

    /// Rebuild in-memory state from the durable mirror on startup.
    async fn recover(&self, storage: &PostgresStorage) {
        match storage.max_ticket_id().await {
            Ok(max_id) if max_id > 0 => {
                set_ticket_id_counter(max_id + 1);
                info!(next_id = max_id + 1, "synced ticket id counter");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "failed to recover max ticket id"),
        }

        let open = match storage.load_open_tickets().await {
            Ok(tickets) => tickets,
            Err(e) => {
                error!(error = %e, "failed to load open tickets");
                return;
            }
        };

        let mut recovered = 0usize;
        for ticket in open {
            let id = ticket.id;
            let line = self.line(&ticket.queue_id);
            let mut line = line.lock();
            match ticket.status {
                super::types::TicketStatus::Waiting => line.waiting.push(id),
                super::types::TicketStatus::Called => line.called.push(id),
                super::types::TicketStatus::InService => line.in_service.push(id),
                _ => continue,
            }
            self.ticket_index.insert(id, ticket.queue_id.clone());
            self.active_index.insert(
                (ticket.customer_id.clone(), ticket.business_id.clone()),
                id,
            );
            line.tickets.insert(id, ticket);
            recovered += 1;
        }

        // Waiting order must follow positions, not load order.
        for entry in self.lines.iter() {
            let mut line = entry.value().lock();
            let positions: Vec<(TicketId, u32)> = line
                .waiting
                .iter()
                .filter_map(|id| line.tickets.get(id).map(|t| (*id, t.position)))
                .collect();
            let mut ordered = positions;
            ordered.sort_by_key(|(_, position)| *position);
            line.waiting = ordered.into_iter().map(|(id, _)| id).collect();
        }

        // Day counters continue after today's highest issued number, terminal
        // tickets included, so recovered servers never reissue a number.
        if let Some(day_start) = day_start_ms(now_ms()) {
            match storage.load_day_numbers(day_start).await {
                Ok(numbers) => {
                    for (business_id, number) in numbers {
                        if let Some((date, seq)) = split_number(&number) {
                            let mut counter = self
                                .day_counters
                                .entry(business_id)
                                .or_insert_with(|| DayCounter {
                                    date: date.to_string(),
                                    last_seq: 0,
                                });
                            if counter.date == date && counter.last_seq < seq {
                                counter.last_seq = seq;
                            }
                        }
                    }
                }
                Err(e) => error!(error = %e, "failed to recover ticket-number counters"),
            }
        }

        if recovered > 0 {
            info!(count = recovered, "recovered open tickets from PostgreSQL");
        }
    }
}

fn format_day(now_ms: u64) -> String {
    DateTime::<Utc>::from_timestamp_millis(now_ms as i64)
        .map(|dt| dt.format("%Y%m%d").to_string())
        .unwrap_or_else(|| "19700101".to_string())
}

/// Epoch ms of today's UTC midnight.
fn day_start_ms(now_ms: u64) -> Option<u64> {
    let dt = DateTime::<Utc>::from_timestamp_millis(now_ms as i64)?;
    let midnight = dt.date_naive().and_hms_opt(0, 0, 0)?;
    Some(midnight.and_utc().timestamp_millis() as u64)
}

fn split_number(number: &str) -> Option<(&str, u32)> {
    let (date, seq) = number.split_once('-')?;
    seq.parse().ok().map(|seq| (date, seq))
}
