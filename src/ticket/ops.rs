//! Ticket state machine and position allocator.
//!
//! Every mutating operation follows the same shape: validate inputs, enter
//! the per-queue critical section, mutate the line state, snapshot what the
//! outside world needs, release the lock, then run the side effects
//! (metrics, persistence, broadcast, notification) against the snapshots.
//! Nothing inside the lock blocks.

use dashmap::mapref::entry::Entry;
use tracing::info;

use crate::notify::{status_message, IntentKind, NotificationIntent};
use crate::protocol::{next_ticket_id, QueueSummary};
use crate::registry::QueueConfig;
use crate::session::{Principal, PrincipalKind};

use super::engine::TicketEngine;
use super::estimator;
use super::types::{
    now_ms, Completion, LineState, Ticket, TicketError, TicketId, TicketStatus,
};

const MAX_ID_LENGTH: usize = 128;

/// Identifiers travel in URLs and topic channels; keep them to the same safe
/// alphabet the rest of the system assumes.
fn validate_id(kind: &str, value: &str) -> Result<(), TicketError> {
    if value.is_empty() {
        return Err(TicketError::InvalidInput(format!(
            "{kind} id cannot be empty"
        )));
    }
    if value.len() > MAX_ID_LENGTH {
        return Err(TicketError::InvalidInput(format!(
            "{kind} id too long (max {MAX_ID_LENGTH} chars)"
        )));
    }
    if !value
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(TicketError::InvalidInput(format!(
            "{kind} id must contain only alphanumeric characters, underscores, hyphens, or dots"
        )));
    }
    Ok(())
}

/// Everything a committed transition produces for the world outside the lock.
struct TransitionOutcome {
    ticket: Ticket,
    renumbered: Vec<Ticket>,
    summary: QueueSummary,
    waited_ms: Option<u64>,
}

impl TicketEngine {
    // ============== Join ==============

    /// Create a WAITING ticket at the back of the line.
    pub async fn join(
        &self,
        queue_id: &str,
        customer_id: &str,
        service_id: Option<String>,
    ) -> Result<Ticket, TicketError> {
        validate_id("queue", queue_id)?;
        validate_id("customer", customer_id)?;
        if let Some(ref service) = service_id {
            validate_id("service", service)?;
        }

        let config = self.registry.queue(queue_id).ok_or(TicketError::NotFound)?;
        let business = self
            .registry
            .business(&config.business_id)
            .ok_or(TicketError::NotFound)?;
        if !business.is_active || !config.is_active {
            return Err(TicketError::QueueClosed);
        }

        let now = now_ms();
        let line_arc = self.line(queue_id);
        let (ticket, renumbered, summary) = {
            let mut line = line_arc.lock();

            if line.active_count() >= config.max_size as usize {
                return Err(TicketError::QueueFull);
            }

            // Atomic one-active-ticket reservation across all of the
            // business's queues. Released on terminal transition.
            let id = next_ticket_id();
            match self
                .active_index
                .entry((customer_id.to_string(), config.business_id.clone()))
            {
                Entry::Occupied(_) => return Err(TicketError::AlreadyQueued),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }

            // Close any gap left by called tickets, then append.
            let renumbered_ids = line.renumber_waiting();
            let position = line.waiting.len() as u32 + 1;
            let per = estimator::per_customer_minutes(&line, &config, now);

            let ticket = Ticket {
                id,
                queue_id: queue_id.to_string(),
                business_id: config.business_id.clone(),
                customer_id: customer_id.to_string(),
                service_id,
                number: self.next_ticket_number(&config.business_id, now),
                position,
                status: TicketStatus::Waiting,
                notes: None,
                created_at: now,
                called_at: None,
                served_at: None,
                completed_at: None,
                estimated_wait_minutes: estimator::eta_minutes(position, per),
            };

            line.waiting.push(id);
            line.tickets.insert(id, ticket.clone());
            self.ticket_index.insert(id, queue_id.to_string());

            let renumbered: Vec<Ticket> = renumbered_ids
                .iter()
                .filter_map(|rid| line.tickets.get(rid).cloned())
                .collect();
            let summary = self.summary_from_line(&line, &config, now);
            (ticket, renumbered, summary)
        };

        self.metrics.record_join();
        self.persist_ticket(&ticket);
        self.persist_tickets(&renumbered);
        for moved in &renumbered {
            self.broadcaster.publish_ticket(moved);
        }
        self.broadcaster.publish_ticket(&ticket);
        self.broadcaster.publish_summary(&summary);
        info!(
            queue = %queue_id,
            ticket = ticket.id,
            number = %ticket.number,
            position = ticket.position,
            "customer joined queue"
        );
        Ok(ticket)
    }

    // ============== Call next ==============

    /// Transition the lowest-position WAITING ticket to CALLED.
    pub async fn call_next(
        &self,
        queue_id: &str,
        actor: &Principal,
    ) -> Result<Ticket, TicketError> {
        validate_id("queue", queue_id)?;
        let config = self.registry.queue(queue_id).ok_or(TicketError::NotFound)?;
        if !actor.operates(&config.business_id) {
            return Err(TicketError::Forbidden);
        }

        let now = now_ms();
        let line_arc = self.line(queue_id);
        let outcome = {
            let mut line = line_arc.lock();
            let id = match line.waiting.first() {
                Some(&id) => id,
                None => return Err(TicketError::EmptyQueue),
            };
            self.apply_transition(&mut line, &config, id, TicketStatus::Called, None, now)?
        };

        self.finish_transition(queue_id, &outcome, now);
        Ok(outcome.ticket)
    }

    // ============== Advance ==============

    /// Move a ticket along the state machine (business actors only).
    pub async fn advance_status(
        &self,
        ticket_id: TicketId,
        new_status: TicketStatus,
        notes: Option<String>,
        actor: &Principal,
    ) -> Result<Ticket, TicketError> {
        let queue_id = self
            .ticket_index
            .get(&ticket_id)
            .ok_or(TicketError::NotFound)?
            .clone();
        let config = self
            .registry
            .queue(&queue_id)
            .ok_or(TicketError::NotFound)?;
        if !actor.operates(&config.business_id) {
            return Err(TicketError::Forbidden);
        }

        let now = now_ms();
        let line_arc = self.line(&queue_id);
        let outcome = {
            let mut line = line_arc.lock();
            self.apply_transition(&mut line, &config, ticket_id, new_status, notes, now)?
        };

        self.finish_transition(&queue_id, &outcome, now);
        Ok(outcome.ticket)
    }

    // ============== Cancel ==============

    /// Cancel a WAITING or CALLED ticket. Permitted for the owning customer
    /// and for business actors of the owning business.
    pub async fn cancel(
        &self,
        ticket_id: TicketId,
        requester: &Principal,
    ) -> Result<Ticket, TicketError> {
        let queue_id = self
            .ticket_index
            .get(&ticket_id)
            .ok_or(TicketError::NotFound)?
            .clone();
        let config = self
            .registry
            .queue(&queue_id)
            .ok_or(TicketError::NotFound)?;

        let now = now_ms();
        let line_arc = self.line(&queue_id);
        let outcome = {
            let mut line = line_arc.lock();
            let owner = line
                .tickets
                .get(&ticket_id)
                .map(|t| t.customer_id.clone())
                .ok_or(TicketError::NotFound)?;
            let allowed = match requester.kind {
                PrincipalKind::Customer => requester.id == owner,
                PrincipalKind::Business => requester.operates(&config.business_id),
            };
            if !allowed {
                return Err(TicketError::Forbidden);
            }
            self.apply_transition(
                &mut line,
                &config,
                ticket_id,
                TicketStatus::Cancelled,
                None,
                now,
            )?
        };

        self.finish_transition(&queue_id, &outcome, now);
        Ok(outcome.ticket)
    }

    // ============== Shared transition core ==============

    /// Apply one status transition inside the critical section. Stamps
    /// timestamps, maintains the waiting/called/in-service lists, runs the
    /// gap-closing renumber on terminal transitions and releases the
    /// (customer, business) active slot.
    fn apply_transition(
        &self,
        line: &mut LineState,
        config: &QueueConfig,
        ticket_id: TicketId,
        to: TicketStatus,
        notes: Option<String>,
        now: u64,
    ) -> Result<TransitionOutcome, TicketError> {
        let from = line
            .tickets
            .get(&ticket_id)
            .map(|t| t.status)
            .ok_or(TicketError::NotFound)?;
        if !from.can_transition_to(to) {
            return Err(TicketError::IllegalTransition { from, to });
        }

        line.detach(ticket_id, from);

        let (snapshot, waited_ms) = {
            let ticket = line
                .tickets
                .get_mut(&ticket_id)
                .ok_or(TicketError::NotFound)?;
            ticket.status = to;
            if notes.is_some() {
                ticket.notes = notes;
            }
            match to {
                TicketStatus::Called => ticket.called_at = Some(now),
                TicketStatus::InService => ticket.served_at = Some(now),
                TicketStatus::Completed | TicketStatus::Cancelled | TicketStatus::NoShow => {
                    ticket.completed_at = Some(now)
                }
                TicketStatus::Waiting => {}
            }
            let waited = match (to, ticket.served_at) {
                (TicketStatus::Completed, Some(served)) => {
                    Some(served.saturating_sub(ticket.created_at))
                }
                _ => None,
            };
            (ticket.clone(), waited)
        };

        match to {
            TicketStatus::Called => line.called.push(ticket_id),
            TicketStatus::InService => line.in_service.push(ticket_id),
            _ => {}
        }

        let mut renumbered = Vec::new();
        if to.is_terminal() {
            if let Some(waited) = waited_ms {
                line.record_completion(
                    Completion {
                        completed_at: now,
                        waited_ms: waited,
                    },
                    estimator::TRAILING_WINDOW_MS,
                );
            }
            let changed = line.renumber_waiting();
            renumbered = changed
                .iter()
                .filter_map(|id| line.tickets.get(id).cloned())
                .collect();
            self.active_index
                .remove(&(snapshot.customer_id.clone(), snapshot.business_id.clone()));
        }

        let summary = self.summary_from_line(line, config, now);
        Ok(TransitionOutcome {
            ticket: snapshot,
            renumbered,
            summary,
            waited_ms,
        })
    }

    /// Side effects of a committed transition, all outside the lock.
    fn finish_transition(&self, queue_id: &str, outcome: &TransitionOutcome, now: u64) {
        let to = outcome.ticket.status;
        if to == TicketStatus::Called {
            self.metrics.record_called();
        }
        if to.is_terminal() {
            self.metrics.record_terminal(to, outcome.waited_ms);
        }

        self.persist_ticket(&outcome.ticket);
        self.persist_tickets(&outcome.renumbered);

        self.broadcaster.publish_ticket(&outcome.ticket);
        for moved in &outcome.renumbered {
            self.broadcaster.publish_ticket(moved);
        }
        self.broadcaster.publish_summary(&outcome.summary);

        self.notifier.dispatch(NotificationIntent {
            kind: if to == TicketStatus::Called {
                IntentKind::TicketCalled
            } else {
                IntentKind::StatusChanged
            },
            customer_id: outcome.ticket.customer_id.clone(),
            business_id: outcome.ticket.business_id.clone(),
            ticket_number: outcome.ticket.number.clone(),
            status: to,
            message: status_message(to),
            at: now,
        });

        info!(
            queue = %queue_id,
            ticket = outcome.ticket.id,
            status = to.as_str(),
            "ticket transitioned"
        );
    }
}
