//! Ticket assignment engine
//!
//! The engine validates a request against the state machine, applies it with
//! one conditional store mutation, and only then publishes the change and
//! writes the audit record. Neither side effect can fail or undo a committed
//! transition.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use crate::archive::{self, ArchiveError, ArchiveRecord, ArchiveSink};
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::invariants::assert_queue_order;
use crate::lifecycle::{self, TicketEvent};
use crate::models::{
    AssistantId, CallerIdentity, ClosedReason, NewTicket, Ticket, TicketId, TicketStatus,
};
use crate::notify::{EventKind, EventPublisher, QueueEvent};
use crate::reminders::{self, Digest};
use crate::storage::Storage;

/// Tuning knobs for the claim loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Rounds of re-reading the pool before `claim_next` gives up. Also bounds
    /// how often resolve and return re-read a ticket that keeps changing.
    pub claim_attempts: u32,
    /// Oldest candidates tried per round
    pub candidate_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            claim_attempts: 3,
            candidate_window: 16,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.claim_attempts == 0 {
            return Err(Error::InvalidArgument(
                "claim_attempts must be at least 1".into(),
            ));
        }
        if self.candidate_window == 0 {
            return Err(Error::InvalidArgument(
                "candidate_window must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Entry point for every ticket operation
pub struct AssignmentEngine {
    store: Arc<dyn Storage>,
    publisher: Arc<dyn EventPublisher>,
    archive: Arc<dyn ArchiveSink>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    archive_failures: AtomicU64,
    publish_failures: AtomicU64,
}

impl AssignmentEngine {
    pub fn new(
        store: Arc<dyn Storage>,
        publisher: Arc<dyn EventPublisher>,
        archive: Arc<dyn ArchiveSink>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            publisher,
            archive,
            clock,
            config,
            archive_failures: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Archive appends that failed since start
    pub fn archive_failures(&self) -> u64 {
        self.archive_failures.load(Ordering::Relaxed)
    }

    /// Event publishes that failed since start
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // Mutations
    // ---------------------------------------------------------------------

    /// Put a new help request in the queue
    #[instrument(skip(self))]
    pub fn submit_ticket(&self, student_name: &str, course: &str, location: &str) -> Result<Ticket> {
        let new_ticket = NewTicket::new(student_name, course, location)?;
        let ticket = self.store.insert_ticket(&new_ticket, self.clock.now())?;

        info!(ticket_id = %ticket.id, course = %ticket.course, "Ticket submitted");
        self.emit(EventKind::Created, &ticket);
        Ok(ticket)
    }

    /// Claim the oldest unassigned ticket for the caller
    #[instrument(skip(self), fields(assistant_id = %caller.id))]
    pub fn claim_next(&self, caller: &CallerIdentity) -> Result<Ticket> {
        self.require_assistant(caller.id)?;
        let event = TicketEvent::Claim {
            assistant: caller.id,
        };

        for round in 1..=self.config.claim_attempts {
            let candidates = self.store.oldest_unassigned(self.config.candidate_window)?;
            assert_queue_order(&candidates);
            if candidates.is_empty() {
                return Err(Error::NotFound("no unassigned tickets".into()));
            }

            for candidate in &candidates {
                lifecycle::check(candidate, caller, event)?;
                if let Some(ticket) = self.store.try_claim(candidate.id, caller.id)? {
                    info!(ticket_id = %ticket.id, round, "Ticket claimed");
                    self.emit(EventKind::Claimed, &ticket);
                    return Ok(ticket);
                }
                debug!(ticket_id = %candidate.id, round, "Lost claim race");
            }
        }

        warn!(
            attempts = self.config.claim_attempts,
            "Gave up claiming under contention"
        );
        Err(Error::NotFound(
            "no unassigned ticket could be claimed".into(),
        ))
    }

    /// Assign one specific ticket to `assignee`
    #[instrument(skip(self), fields(caller_id = %caller.id))]
    pub fn claim_specific(
        &self,
        caller: &CallerIdentity,
        ticket_id: TicketId,
        assignee: AssistantId,
    ) -> Result<Ticket> {
        let event = TicketEvent::Claim {
            assistant: assignee,
        };
        let current = self.load(ticket_id)?;
        lifecycle::authorize(&current, caller, event)?;
        self.require_assistant(assignee)?;

        if let Err(e) = lifecycle::next_status(&current, event) {
            debug!(ticket_id = %ticket_id, error = %e, "Ticket not claimable");
            return Err(claim_conflict(&current));
        }

        if let Some(ticket) = self.store.try_claim(ticket_id, assignee)? {
            info!(ticket_id = %ticket.id, assistant_id = %assignee, "Ticket assigned");
            self.emit(EventKind::Claimed, &ticket);
            return Ok(ticket);
        }

        // Lost a race since the read above
        match self.store.find_ticket(ticket_id)? {
            Some(latest) => {
                debug!(ticket_id = %ticket_id, holder = ?latest.assigned_to, "Lost claim race");
                Err(claim_conflict(&latest))
            }
            None => Err(Error::NotFound(format!("ticket {}", ticket_id))),
        }
    }

    /// Close an in-progress ticket as helped, no-show or duplicate
    #[instrument(skip(self), fields(caller_id = %caller.id))]
    pub fn resolve(
        &self,
        caller: &CallerIdentity,
        ticket_id: TicketId,
        reason: ClosedReason,
        party_size: Option<u32>,
    ) -> Result<Ticket> {
        let party_size = party_size.unwrap_or(1);
        let event = TicketEvent::Resolve { reason };
        for _ in 0..self.config.claim_attempts {
            let current = self.load(ticket_id)?;
            lifecycle::check(&current, caller, event)?;
            if party_size < 1 {
                return Err(Error::InvalidArgument(
                    "party_size must be at least 1".into(),
                ));
            }
            let holder = current_holder(&current)?;

            let resolved = self.store.try_resolve(
                ticket_id,
                holder,
                reason,
                party_size,
                self.clock.now(),
            )?;
            if let Some(ticket) = resolved {
                info!(ticket_id = %ticket.id, reason = %reason, party_size, "Ticket resolved");
                self.emit(EventKind::Resolved, &ticket);
                self.record(&ticket);
                return Ok(ticket);
            }
            debug!(ticket_id = %ticket_id, "Ticket changed before resolve, re-reading");
        }

        Err(contended(ticket_id))
    }

    /// Hand an in-progress ticket back to the queue at its original position
    #[instrument(skip(self), fields(caller_id = %caller.id))]
    pub fn return_to_queue(&self, caller: &CallerIdentity, ticket_id: TicketId) -> Result<Ticket> {
        for _ in 0..self.config.claim_attempts {
            let current = self.load(ticket_id)?;
            lifecycle::check(&current, caller, TicketEvent::ReturnToQueue)?;
            let holder = current_holder(&current)?;

            if let Some(ticket) = self.store.try_release(ticket_id, holder)? {
                info!(ticket_id = %ticket.id, former = %holder, "Ticket returned to queue");
                self.emit(EventKind::Returned, &ticket);
                return Ok(ticket);
            }
            debug!(ticket_id = %ticket_id, "Ticket changed before return, re-reading");
        }

        Err(contended(ticket_id))
    }

    /// Close every open ticket. Admin only.
    #[instrument(skip(self), fields(caller_id = %caller.id))]
    pub fn flush_all(&self, caller: &CallerIdentity) -> Result<usize> {
        lifecycle::authorize_flush(caller)?;

        let closed = self.store.close_all_open(self.clock.now())?;
        info!(count = closed.len(), "Queue flushed");

        for ticket in &closed {
            self.emit(EventKind::Flushed, ticket);
            self.record(ticket);
        }
        Ok(closed.len())
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    /// Live tickets, oldest first
    pub fn list_unassigned(&self) -> Result<Vec<Ticket>> {
        let tickets = self.store.list_by_status(TicketStatus::Live)?;
        assert_queue_order(&tickets);
        Ok(tickets)
    }

    /// Claimed tickets, oldest first
    pub fn list_in_progress(&self) -> Result<Vec<Ticket>> {
        self.store.list_by_status(TicketStatus::InProgress)
    }

    /// Terminal tickets closed within `[since, until]`, by close time
    pub fn list_terminal(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Ticket>> {
        if since > until {
            return Err(Error::InvalidArgument(format!(
                "range start {} is after end {}",
                since, until
            )));
        }
        self.store.list_terminal(since, until)
    }

    pub fn get_ticket(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.load(ticket_id)
    }

    /// Every open ticket, for a queue display's full refresh
    pub fn open_tickets(&self) -> Result<Vec<Ticket>> {
        let mut tickets = self.list_unassigned()?;
        tickets.extend(self.list_in_progress()?);
        tickets.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(tickets)
    }

    /// Stream the date-range export as CSV
    pub fn export_terminal<W: Write>(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        writer: W,
    ) -> std::result::Result<usize, ArchiveError> {
        archive::export_terminal(self.store.as_ref(), since, until, writer)
    }

    /// Reminder digests due right now
    pub fn compose_digests(&self) -> Result<Vec<Digest>> {
        reminders::compose_digests(self.store.as_ref())
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn load(&self, ticket_id: TicketId) -> Result<Ticket> {
        self.store
            .find_ticket(ticket_id)?
            .ok_or_else(|| Error::NotFound(format!("ticket {}", ticket_id)))
    }

    fn require_assistant(&self, id: AssistantId) -> Result<()> {
        match self.store.find_assistant(id)? {
            Some(_) => Ok(()),
            None => Err(Error::NotFound(format!("assistant {}", id))),
        }
    }

    fn emit(&self, kind: EventKind, ticket: &Ticket) {
        let event = QueueEvent::new(kind, ticket, self.clock.now());
        if let Err(e) = self.publisher.publish(event) {
            self.publish_failures.fetch_add(1, Ordering::Relaxed);
            warn!(ticket_id = %ticket.id, kind = kind.as_str(), error = %e, "Failed to publish queue event");
        }
    }

    fn record(&self, ticket: &Ticket) {
        let result = ArchiveRecord::from_ticket(ticket).and_then(|r| self.archive.append(&r));
        if let Err(e) = result {
            self.archive_failures.fetch_add(1, Ordering::Relaxed);
            error!(ticket_id = %ticket.id, error = %e, "Failed to archive terminal ticket");
        }
    }
}

fn current_holder(ticket: &Ticket) -> Result<AssistantId> {
    ticket.assigned_to.ok_or_else(|| {
        Error::InvalidTransition(format!("ticket {} has no assignee", ticket.id))
    })
}

/// Why a ticket that failed its claim guard cannot be claimed
fn claim_conflict(ticket: &Ticket) -> Error {
    match ticket.status {
        TicketStatus::InProgress | TicketStatus::Live => Error::AlreadyClaimed(ticket.id),
        TicketStatus::Resolved | TicketStatus::Closed => {
            Error::NotFound(format!("ticket {}", ticket.id))
        }
    }
}

fn contended(ticket_id: TicketId) -> Error {
    Error::InvalidTransition(format!(
        "ticket {} kept changing concurrently",
        ticket_id
    ))
}
