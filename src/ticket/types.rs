use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type TicketId = u64;

/// Current timestamp in epoch milliseconds.
#[inline(always)]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ============== Ticket Status ==============

/// Lifecycle states of a ticket.
///
/// `Completed`, `Cancelled` and `NoShow` are terminal: a ticket that reaches
/// one of them never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Waiting,
    Called,
    InService,
    Completed,
    Cancelled,
    NoShow,
}

impl TicketStatus {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TicketStatus::Completed | TicketStatus::Cancelled | TicketStatus::NoShow
        )
    }

    /// Legal transitions of the state machine. Everything else is rejected
    /// with `TicketError::IllegalTransition`.
    #[inline]
    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        use TicketStatus::*;
        matches!(
            (self, next),
            (Waiting, Called)
                | (Called, InService)
                | (InService, Completed)
                | (Waiting, Cancelled)
                | (Called, Cancelled)
                | (Waiting, NoShow)
                | (Called, NoShow)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TicketStatus::Waiting => "WAITING",
            TicketStatus::Called => "CALLED",
            TicketStatus::InService => "IN_SERVICE",
            TicketStatus::Completed => "COMPLETED",
            TicketStatus::Cancelled => "CANCELLED",
            TicketStatus::NoShow => "NO_SHOW",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WAITING" => Some(TicketStatus::Waiting),
            "CALLED" => Some(TicketStatus::Called),
            "IN_SERVICE" => Some(TicketStatus::InService),
            "COMPLETED" => Some(TicketStatus::Completed),
            "CANCELLED" => Some(TicketStatus::Cancelled),
            "NO_SHOW" => Some(TicketStatus::NoShow),
            _ => None,
        }
    }
}

// ============== Ticket ==============

/// One customer's claim on a queue slot.
#[derive(Debug, Clone, Serialize)]
pub struct Ticket {
    pub id: TicketId,
    pub queue_id: String,
    pub business_id: String,
    pub customer_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_id: Option<String>,
    /// Date-scoped `YYYYMMDD-NNN` number, unique per business per day.
    pub number: String,
    /// 1-based ordinal among WAITING tickets. Keeps its last value once the
    /// ticket leaves the waiting set.
    pub position: u32,
    pub status: TicketStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub called_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub served_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<u64>,
    pub estimated_wait_minutes: u32,
}

// ============== Errors ==============

/// Business-rule outcomes of ticket operations. Surfaced to the caller
/// verbatim, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TicketError {
    #[error("customer already holds an active ticket for this business")]
    AlreadyQueued,
    #[error("queue is not accepting new tickets")]
    QueueClosed,
    #[error("queue is at capacity")]
    QueueFull,
    #[error("no waiting tickets in queue")]
    EmptyQueue,
    #[error("transition from {from:?} to {to:?} is not allowed")]
    IllegalTransition {
        from: TicketStatus,
        to: TicketStatus,
    },
    #[error("ticket or queue not found")]
    NotFound,
    #[error("requester is not allowed to perform this operation")]
    Forbidden,
    #[error("{0}")]
    InvalidInput(String),
}

// ============== Line State ==============

/// A completed service used by the wait-time estimator.
#[derive(Debug, Clone, Copy)]
pub struct Completion {
    pub completed_at: u64,
    pub waited_ms: u64,
}

/// Authoritative per-queue state. Guarded by a per-queue mutex in the engine;
/// everything in here is only touched inside that critical section.
pub struct LineState {
    /// WAITING tickets in join order. Positions are dense `1..=N` over this
    /// vector at every renumbering point.
    pub waiting: Vec<TicketId>,
    /// CALLED tickets in call order.
    pub called: Vec<TicketId>,
    /// IN_SERVICE tickets in service-start order.
    pub in_service: Vec<TicketId>,
    /// Every ticket seen by this queue, terminal ones included until the
    /// cleanup sweep drops them.
    pub tickets: FxHashMap<TicketId, Ticket>,
    /// Trailing completion samples for the estimator, newest at the back.
    pub completions: VecDeque<Completion>,
}

impl LineState {
    pub fn new() -> Self {
        Self {
            waiting: Vec::new(),
            called: Vec::new(),
            in_service: Vec::new(),
            tickets: FxHashMap::with_capacity_and_hasher(32, Default::default()),
            completions: VecDeque::new(),
        }
    }

    /// Count of tickets holding a slot against `max_size`.
    #[inline]
    pub fn active_count(&self) -> usize {
        self.waiting.len() + self.called.len() + self.in_service.len()
    }

    /// Reassign dense positions `1..=N` over the waiting vector, preserving
    /// join order. Returns the ids whose position actually changed so the
    /// caller can broadcast and persist only those.
    pub fn renumber_waiting(&mut self) -> Vec<TicketId> {
        let mut changed = Vec::new();
        for (idx, id) in self.waiting.iter().enumerate() {
            let want = idx as u32 + 1;
            if let Some(ticket) = self.tickets.get_mut(id) {
                if ticket.position != want {
                    ticket.position = want;
                    changed.push(*id);
                }
            }
        }
        changed
    }

    /// Record a completion sample and drop samples that fell out of `window_ms`.
    pub fn record_completion(&mut self, sample: Completion, window_ms: u64) {
        self.completions.push_back(sample);
        self.prune_completions(sample.completed_at, window_ms);
    }

    pub fn prune_completions(&mut self, now: u64, window_ms: u64) {
        let cutoff = now.saturating_sub(window_ms);
        while let Some(front) = self.completions.front() {
            if front.completed_at < cutoff {
                self.completions.pop_front();
            } else {
                break;
            }
        }
    }

    /// Remove an id from whichever non-terminal list currently holds it.
    pub fn detach(&mut self, id: TicketId, status: TicketStatus) {
        let list = match status {
            TicketStatus::Waiting => &mut self.waiting,
            TicketStatus::Called => &mut self.called,
            TicketStatus::InService => &mut self.in_service,
            _ => return,
        };
        if let Some(pos) = list.iter().position(|t| *t == id) {
            list.remove(pos);
        }
    }
}

impl Default for LineState {
    fn default() -> Self {
        Self::new()
    }
}

// ============== Engine Metrics ==============

pub struct EngineMetrics {
    pub total_joined: AtomicU64,
    pub total_called: AtomicU64,
    pub total_completed: AtomicU64,
    pub total_cancelled: AtomicU64,
    pub total_no_show: AtomicU64,
    pub wait_ms_sum: AtomicU64,
    pub wait_ms_count: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            total_joined: AtomicU64::new(0),
            total_called: AtomicU64::new(0),
            total_completed: AtomicU64::new(0),
            total_cancelled: AtomicU64::new(0),
            total_no_show: AtomicU64::new(0),
            wait_ms_sum: AtomicU64::new(0),
            wait_ms_count: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn record_join(&self) {
        self.total_joined.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_called(&self) {
        self.total_called.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_terminal(&self, status: TicketStatus, waited_ms: Option<u64>) {
        match status {
            TicketStatus::Completed => {
                self.total_completed.fetch_add(1, Ordering::Relaxed);
                if let Some(ms) = waited_ms {
                    self.wait_ms_sum.fetch_add(ms, Ordering::Relaxed);
                    self.wait_ms_count.fetch_add(1, Ordering::Relaxed);
                }
            }
            TicketStatus::Cancelled => {
                self.total_cancelled.fetch_add(1, Ordering::Relaxed);
            }
            TicketStatus::NoShow => {
                self.total_no_show.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod status_tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_outgoing_transitions() {
        use TicketStatus::*;
        let all = [Waiting, Called, InService, Completed, Cancelled, NoShow];
        for terminal in [Completed, Cancelled, NoShow] {
            for next in all {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn happy_path_is_legal() {
        use TicketStatus::*;
        assert!(Waiting.can_transition_to(Called));
        assert!(Called.can_transition_to(InService));
        assert!(InService.can_transition_to(Completed));
    }

    #[test]
    fn side_branches() {
        use TicketStatus::*;
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(Called.can_transition_to(Cancelled));
        assert!(Waiting.can_transition_to(NoShow));
        assert!(Called.can_transition_to(NoShow));
        assert!(!InService.can_transition_to(Cancelled));
        assert!(!InService.can_transition_to(NoShow));
        assert!(!Waiting.can_transition_to(InService));
        assert!(!Waiting.can_transition_to(Completed));
    }

    #[test]
    fn status_string_round_trip() {
        use TicketStatus::*;
        for s in [Waiting, Called, InService, Completed, Cancelled, NoShow] {
            assert_eq!(TicketStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(TicketStatus::parse("SERVED"), None);
    }
}
