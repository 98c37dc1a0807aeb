//! Ticket storage operations
//!
//! Every mutation here is a single conditional statement. The `WHERE` clause
//! is the guard and `RETURNING` hands back the post-update row, so a caller
//! that gets `None` knows its guard lost against a concurrent writer.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use tracing::instrument;

use super::parse::{
    assistant_opt, parse_micros, parse_micros_opt, parse_reason_opt, parse_status, to_micros,
    OptionalExt,
};
use crate::error::Result;
use crate::invariants::assert_ticket_invariants;
use crate::models::{AssistantId, ClosedReason, NewTicket, Ticket, TicketId, TicketStatus};

const TICKET_COLUMNS: &str = "id, student_name, course, location, status, assigned_to, \
     created_at, closed_at, closed_reason, party_size, closed_by";

pub struct TicketStore<'a> {
    conn: &'a Connection,
}

impl<'a> TicketStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert a new live ticket
    #[instrument(skip(self, ticket), fields(student = %ticket.student_name))]
    pub fn insert(&self, ticket: &NewTicket, created_at: DateTime<Utc>) -> Result<Ticket> {
        let sql = format!(
            "INSERT INTO tickets (student_name, course, location, status, created_at, party_size)
             VALUES (?1, ?2, ?3, 'live', ?4, 1)
             RETURNING {}",
            TICKET_COLUMNS
        );
        let ticket = self.conn.query_row(
            &sql,
            params![
                ticket.student_name,
                ticket.course,
                ticket.location,
                to_micros(created_at)
            ],
            ticket_from_row,
        )?;
        assert_ticket_invariants(&ticket);
        Ok(ticket)
    }

    /// Find ticket by ID
    pub fn find_by_id(&self, id: TicketId) -> Result<Option<Ticket>> {
        let sql = format!("SELECT {} FROM tickets WHERE id = ?1", TICKET_COLUMNS);
        let ticket = self
            .conn
            .query_row(&sql, params![id.0], ticket_from_row)
            .optional()?;
        Ok(ticket)
    }

    /// Oldest unassigned live tickets, queue order
    pub fn oldest_unassigned(&self, limit: usize) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets
             WHERE status = 'live' AND assigned_to IS NULL
             ORDER BY created_at ASC, id ASC
             LIMIT ?1",
            TICKET_COLUMNS
        );
        self.query_list(&sql, params![limit as i64])
    }

    /// All tickets in a status, oldest first
    pub fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            TICKET_COLUMNS
        );
        self.query_list(&sql, params![status.as_str()])
    }

    /// Terminal tickets whose `closed_at` falls in `[since, until]`
    pub fn list_terminal(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Ticket>> {
        let sql = format!(
            "SELECT {} FROM tickets
             WHERE status IN ('resolved', 'closed') AND closed_at >= ?1 AND closed_at <= ?2
             ORDER BY closed_at ASC, id ASC",
            TICKET_COLUMNS
        );
        self.query_list(&sql, params![to_micros(since), to_micros(until)])
    }

    /// Claim a ticket if and only if it is still live and unassigned
    #[instrument(skip(self))]
    pub fn try_claim(&self, id: TicketId, assistant: AssistantId) -> Result<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'in_progress', assigned_to = ?2
             WHERE id = ?1 AND status = 'live' AND assigned_to IS NULL
             RETURNING {}",
            TICKET_COLUMNS
        );
        self.query_guarded(&sql, params![id.0, assistant.0])
    }

    /// Put a ticket back in the queue if `holder` still holds it
    #[instrument(skip(self))]
    pub fn try_release(&self, id: TicketId, holder: AssistantId) -> Result<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'live', assigned_to = NULL
             WHERE id = ?1 AND status = 'in_progress' AND assigned_to = ?2
             RETURNING {}",
            TICKET_COLUMNS
        );
        self.query_guarded(&sql, params![id.0, holder.0])
    }

    /// Resolve a ticket if `holder` still holds it.
    ///
    /// `closed_at` is bumped to one microsecond after creation when the clock
    /// has not moved past `created_at`.
    #[instrument(skip(self))]
    pub fn try_resolve(
        &self,
        id: TicketId,
        holder: AssistantId,
        reason: ClosedReason,
        party_size: u32,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'resolved', assigned_to = NULL, closed_by = assigned_to,
                 closed_reason = ?3, party_size = ?4, closed_at = MAX(?5, created_at + 1)
             WHERE id = ?1 AND status = 'in_progress' AND assigned_to = ?2
             RETURNING {}",
            TICKET_COLUMNS
        );
        self.query_guarded(
            &sql,
            params![id.0, holder.0, reason.as_str(), party_size, to_micros(closed_at)],
        )
    }

    /// Close every non-terminal ticket in one statement
    #[instrument(skip(self))]
    pub fn close_all_open(&self, closed_at: DateTime<Utc>) -> Result<Vec<Ticket>> {
        let sql = format!(
            "UPDATE tickets SET status = 'closed', assigned_to = NULL, closed_by = assigned_to,
                 closed_reason = 'flushed', closed_at = MAX(?1, created_at + 1)
             WHERE status IN ('live', 'in_progress')
             RETURNING {}",
            TICKET_COLUMNS
        );
        let mut closed = self.query_list(&sql, params![to_micros(closed_at)])?;
        closed.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        Ok(closed)
    }

    fn query_guarded(&self, sql: &str, params: impl rusqlite::Params) -> Result<Option<Ticket>> {
        let ticket = self.conn.query_row(sql, params, ticket_from_row).optional()?;
        if let Some(ticket) = &ticket {
            assert_ticket_invariants(ticket);
        }
        Ok(ticket)
    }

    fn query_list(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<Ticket>> {
        let mut stmt = self.conn.prepare(sql)?;
        let tickets = stmt
            .query_map(params, ticket_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(tickets)
    }
}

fn ticket_from_row(row: &Row<'_>) -> rusqlite::Result<Ticket> {
    Ok(Ticket {
        id: TicketId(row.get(0)?),
        student_name: row.get(1)?,
        course: row.get(2)?,
        location: row.get(3)?,
        status: parse_status(4, &row.get::<_, String>(4)?)?,
        assigned_to: assistant_opt(row.get(5)?),
        created_at: parse_micros(6, row.get(6)?)?,
        closed_at: parse_micros_opt(7, row.get(7)?)?,
        closed_reason: parse_reason_opt(8, row.get(8)?)?,
        party_size: row.get(9)?,
        closed_by: assistant_opt(row.get(10)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;
    use chrono::Duration;

    fn seeded() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_assistant(AssistantId(7), "Grace", false).unwrap();
        db.upsert_assistant(AssistantId(9), "Alan", false).unwrap();
        db
    }

    fn new_ticket(name: &str) -> NewTicket {
        NewTicket::new(name, "PHYS 1250", "Table 1").unwrap()
    }

    #[test]
    fn test_insert_and_find() {
        let db = seeded();
        let now = Utc::now();
        let created = db.with_conn(|c| TicketStore::new(c).insert(&new_ticket("Ada"), now)).unwrap();

        assert_eq!(created.status, TicketStatus::Live);
        assert_eq!(created.party_size, 1);
        assert_eq!(created.created_at.timestamp_micros(), now.timestamp_micros());

        let found = db
            .with_conn(|c| TicketStore::new(c).find_by_id(created.id))
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
    }

    #[test]
    fn test_second_claim_loses() {
        let db = seeded();
        let t = db
            .with_conn(|c| TicketStore::new(c).insert(&new_ticket("Ada"), Utc::now()))
            .unwrap();

        let first = db.with_conn(|c| TicketStore::new(c).try_claim(t.id, AssistantId(7))).unwrap();
        let second = db.with_conn(|c| TicketStore::new(c).try_claim(t.id, AssistantId(9))).unwrap();

        assert_eq!(first.unwrap().assigned_to, Some(AssistantId(7)));
        assert!(second.is_none());
    }

    #[test]
    fn test_release_requires_current_holder() {
        let db = seeded();
        let t = db
            .with_conn(|c| TicketStore::new(c).insert(&new_ticket("Ada"), Utc::now()))
            .unwrap();
        db.with_conn(|c| TicketStore::new(c).try_claim(t.id, AssistantId(7))).unwrap();

        let wrong = db.with_conn(|c| TicketStore::new(c).try_release(t.id, AssistantId(9))).unwrap();
        assert!(wrong.is_none());

        let released = db
            .with_conn(|c| TicketStore::new(c).try_release(t.id, AssistantId(7)))
            .unwrap()
            .unwrap();
        assert_eq!(released.status, TicketStatus::Live);
        assert_eq!(released.assigned_to, None);
        assert_eq!(released.created_at, t.created_at);
    }

    #[test]
    fn test_resolve_keeps_close_after_creation() {
        let db = seeded();
        let now = Utc::now();
        let t = db.with_conn(|c| TicketStore::new(c).insert(&new_ticket("Ada"), now)).unwrap();
        db.with_conn(|c| TicketStore::new(c).try_claim(t.id, AssistantId(7))).unwrap();

        // Clock did not move between creation and resolution
        let resolved = db
            .with_conn(|c| {
                TicketStore::new(c).try_resolve(t.id, AssistantId(7), ClosedReason::Helped, 3, now)
            })
            .unwrap()
            .unwrap();

        assert_eq!(resolved.status, TicketStatus::Resolved);
        assert!(resolved.closed_at.unwrap() > resolved.created_at);
        assert_eq!(resolved.closed_by, Some(AssistantId(7)));
        assert_eq!(resolved.assigned_to, None);
        assert_eq!(resolved.party_size, 3);
    }

    #[test]
    fn test_queue_order_and_terminal_range() {
        let db = seeded();
        let base = Utc::now();
        let store_insert = |name: &str, offset: i64| {
            db.with_conn(|c| {
                TicketStore::new(c).insert(&new_ticket(name), base + Duration::seconds(offset))
            })
            .unwrap()
        };
        let late = store_insert("Late", 30);
        let early = store_insert("Early", 10);
        let middle = store_insert("Middle", 20);

        let queue = db.with_conn(|c| TicketStore::new(c).oldest_unassigned(10)).unwrap();
        let ids: Vec<_> = queue.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![early.id, middle.id, late.id]);

        let closed = db
            .with_conn(|c| TicketStore::new(c).close_all_open(base + Duration::seconds(60)))
            .unwrap();
        assert_eq!(closed.len(), 3);

        let window = db
            .with_conn(|c| {
                TicketStore::new(c).list_terminal(base, base + Duration::seconds(60))
            })
            .unwrap();
        assert_eq!(window.len(), 3);

        let before = db
            .with_conn(|c| TicketStore::new(c).list_terminal(base, base + Duration::seconds(59)))
            .unwrap();
        assert!(before.is_empty());
    }
}
