//! SQLite storage layer for Wormhole

mod assistants;
mod migrations;
mod parse;
mod tickets;
mod traits;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::{error, instrument};

use crate::error::Result;
use crate::models::{
    Assistant, AssistantId, ClosedReason, NewTicket, Ticket, TicketId, TicketStatus,
};

pub use assistants::AssistantStore;
pub use tickets::TicketStore;
pub use traits::{AssistantDirectory, Storage, TicketRepository};

/// How long a writer waits on a locked file database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Main database handle.
///
/// Safe to share between request workers; each repository call holds the
/// connection for exactly one statement.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create database at the given path
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Open in-memory database (for testing)
    #[instrument]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()?;
        Ok(db)
    }

    /// Initialize database schema via migrations
    fn init(&self) -> Result<()> {
        self.with_conn(migrations::run_migrations)
    }

    /// Get current schema version
    pub fn schema_version(&self) -> Result<u32> {
        self.with_conn(migrations::get_current_version)
    }

    /// Run `f` with exclusive use of the connection
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                error!("Database mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&conn)
    }

    /// Insert or update a directory entry (roster import, user management)
    pub fn upsert_assistant(&self, id: AssistantId, display_name: &str, is_admin: bool) -> Result<()> {
        self.with_conn(|c| AssistantStore::new(c).upsert(id, display_name, is_admin))
    }
}

impl TicketRepository for Database {
    fn insert_ticket(&self, ticket: &NewTicket, created_at: DateTime<Utc>) -> Result<Ticket> {
        self.with_conn(|c| TicketStore::new(c).insert(ticket, created_at))
    }

    fn find_ticket(&self, id: TicketId) -> Result<Option<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).find_by_id(id))
    }

    fn oldest_unassigned(&self, limit: usize) -> Result<Vec<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).oldest_unassigned(limit))
    }

    fn list_by_status(&self, status: TicketStatus) -> Result<Vec<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).list_by_status(status))
    }

    fn list_terminal(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<Vec<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).list_terminal(since, until))
    }

    fn try_claim(&self, id: TicketId, assistant: AssistantId) -> Result<Option<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).try_claim(id, assistant))
    }

    fn try_release(&self, id: TicketId, holder: AssistantId) -> Result<Option<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).try_release(id, holder))
    }

    fn try_resolve(
        &self,
        id: TicketId,
        holder: AssistantId,
        reason: ClosedReason,
        party_size: u32,
        closed_at: DateTime<Utc>,
    ) -> Result<Option<Ticket>> {
        self.with_conn(|c| {
            TicketStore::new(c).try_resolve(id, holder, reason, party_size, closed_at)
        })
    }

    fn close_all_open(&self, closed_at: DateTime<Utc>) -> Result<Vec<Ticket>> {
        self.with_conn(|c| TicketStore::new(c).close_all_open(closed_at))
    }
}

impl AssistantDirectory for Database {
    fn find_assistant(&self, id: AssistantId) -> Result<Option<Assistant>> {
        self.with_conn(|c| AssistantStore::new(c).find_by_id(id))
    }

    fn list_admins(&self) -> Result<Vec<Assistant>> {
        self.with_conn(|c| AssistantStore::new(c).list_admins())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_file_database_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wormhole.db");

        let id = {
            let db = Database::open(&path).unwrap();
            let ticket = NewTicket::new("Ada", "PHYS 1250", "Table 3").unwrap();
            db.insert_ticket(&ticket, Utc::now()).unwrap().id
        };

        let db = Database::open(&path).unwrap();
        let found = db.find_ticket(id).unwrap().unwrap();
        assert_eq!(found.student_name, "Ada");
        assert_eq!(found.status, TicketStatus::Live);
        assert!(db.schema_version().unwrap() >= 1);
    }

    #[test]
    fn test_directory_through_trait() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_assistant(AssistantId(1), "Admin", true).unwrap();

        let directory: &dyn AssistantDirectory = &db;
        assert!(directory.find_assistant(AssistantId(1)).unwrap().is_some());
        assert_eq!(directory.list_admins().unwrap().len(), 1);
    }
}
