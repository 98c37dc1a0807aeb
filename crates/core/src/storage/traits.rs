//! Storage repository traits
//!
//! These traits are the engine's only view of persistence, allowing for
//! different implementations (SQLite, mock, a server-side database).
//! Conditional mutations return `None` when their guard no longer holds.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    Assistant, AssistantId, ClosedReason, NewTicket, Ticket, TicketId, TicketStatus,
};

/// Ticket repository operations
pub trait TicketRepository {
    /// Create a live ticket
    fn insert_ticket(&self, ticket: &NewTicket, created_at: DateTime<Utc>) -> Result<Ticket>;

    /// Find ticket by ID
    fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>>;

    /// Up to `limit` live, unassigned tickets ordered by `created_at` then id
    fn oldest_unassigned(&self, limit: usize) -> Result<Vec<Ticket>>;

    /// Tickets in one status, oldest first
    fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>>;

    /// Terminal tickets closed within `[since, until]`
    fn list_terminal(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Ticket>>;

    /// live + unassigned -> in_progress held by `assistant`
    fn try_claim(&self, id: TicketId, assistant: AssistantId) -> Result<Option<Ticket>>;

    /// in_progress held by `holder` -> live
    fn try_release(&self, id: TicketId, holder: AssistantId) -> Result<Option<Ticket>>;

    /// in_progress held by `holder` -> resolved
    fn try_resolve(
        &self,
        id: TicketId,
        holder: AssistantId,
        reason: ClosedReason,
        party_size: u32,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Ticket>>;

    /// Every non-terminal ticket -> closed/flushed, all or nothing
    fn close_all_open(&self, closed_at: DateTime<Utc>) -> Result<Vec<Ticket>>;
}

/// Read-only view of the assistant directory
pub trait AssistantDirectory {
    /// Find assistant by ID
    fn find_assistant(&self, id: AssistantId) -> Result<Option<Assistant>>;

    /// All assistants flagged as admins
    fn list_admins(&self) -> Result<Vec<Assistant>>;
}

/// Combined storage interface shared across request workers
pub trait Storage: TicketRepository + AssistantDirectory + Send + Sync {}

// Blanket implementation: any type implementing all traits implements Storage
impl<T> Storage for T where T: TicketRepository + AssistantDirectory + Send + Sync {}
