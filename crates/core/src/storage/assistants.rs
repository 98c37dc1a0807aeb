//! Assistant directory storage
//!
//! The engine only reads this table. `upsert` exists for the roster import
//! and for whatever user-management layer owns the accounts.

use rusqlite::{params, Connection, Row};

use super::parse::OptionalExt;
use crate::error::Result;
use crate::models::{Assistant, AssistantId};

pub struct AssistantStore<'a> {
    conn: &'a Connection,
}

impl<'a> AssistantStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Insert or update an assistant record
    pub fn upsert(&self, id: AssistantId, display_name: &str, is_admin: bool) -> Result<()> {
        self.conn.execute(
            "INSERT INTO assistants (id, display_name, is_admin) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                display_name = excluded.display_name,
                is_admin = excluded.is_admin",
            params![id.0, display_name, is_admin as i32],
        )?;
        Ok(())
    }

    /// Find assistant by ID
    pub fn find_by_id(&self, id: AssistantId) -> Result<Option<Assistant>> {
        let assistant = self
            .conn
            .query_row(
                "SELECT id, display_name, is_admin FROM assistants WHERE id = ?1",
                params![id.0],
                assistant_from_row,
            )
            .optional()?;
        Ok(assistant)
    }

    /// All admins, by id
    pub fn list_admins(&self) -> Result<Vec<Assistant>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, display_name, is_admin FROM assistants WHERE is_admin = 1 ORDER BY id",
        )?;
        let admins = stmt
            .query_map([], assistant_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(admins)
    }
}

fn assistant_from_row(row: &Row<'_>) -> rusqlite::Result<Assistant> {
    Ok(Assistant {
        id: AssistantId(row.get(0)?),
        display_name: row.get(1)?,
        is_admin: row.get::<_, i32>(2)? != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    #[test]
    fn test_upsert_and_lookup() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_assistant(AssistantId(7), "Grace", false).unwrap();
        db.upsert_assistant(AssistantId(7), "Grace H.", true).unwrap();

        let found = db
            .with_conn(|c| AssistantStore::new(c).find_by_id(AssistantId(7)))
            .unwrap()
            .unwrap();
        assert_eq!(found.display_name, "Grace H.");
        assert!(found.is_admin);

        let missing = db
            .with_conn(|c| AssistantStore::new(c).find_by_id(AssistantId(8)))
            .unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_list_admins() {
        let db = Database::open_in_memory().unwrap();
        db.upsert_assistant(AssistantId(3), "Ada", true).unwrap();
        db.upsert_assistant(AssistantId(7), "Grace", false).unwrap();
        db.upsert_assistant(AssistantId(1), "Alan", true).unwrap();

        let admins: Vec<_> = db
            .with_conn(|c| AssistantStore::new(c).list_admins())
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(admins, vec![AssistantId(1), AssistantId(3)]);
    }
}
