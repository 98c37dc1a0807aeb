//! Database migration system
//!
//! Tracks schema versions and applies migrations in order.

use rusqlite::Connection;
use tracing::{info, instrument};

use crate::error::Result;

/// A database migration
pub struct Migration {
    /// Version number (must be sequential starting from 1)
    pub version: u32,
    /// Description of what this migration does
    pub description: &'static str,
    /// SQL to run for this migration
    pub sql: &'static str,
}

/// All migrations in order
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "Initial schema",
        sql: r#"
            -- Assistant directory (filled by user management, read by the engine)
            CREATE TABLE IF NOT EXISTS assistants (
                id INTEGER PRIMARY KEY,
                display_name TEXT NOT NULL,
                is_admin INTEGER NOT NULL DEFAULT 0
            );

            -- Tickets; timestamps are microseconds since the Unix epoch
            CREATE TABLE IF NOT EXISTS tickets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                student_name TEXT NOT NULL,
                course TEXT NOT NULL,
                location TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'live'
                    CHECK (status IN ('live', 'in_progress', 'resolved', 'closed')),
                assigned_to INTEGER REFERENCES assistants(id),
                created_at INTEGER NOT NULL,
                closed_at INTEGER,
                closed_reason TEXT
                    CHECK (closed_reason IN ('helped', 'no_show', 'duplicate', 'flushed')),
                party_size INTEGER NOT NULL DEFAULT 1 CHECK (party_size >= 1),
                closed_by INTEGER,
                CHECK ((assigned_to IS NOT NULL) = (status = 'in_progress')),
                CHECK ((closed_at IS NOT NULL) = (status IN ('resolved', 'closed'))),
                CHECK ((closed_reason IS NOT NULL) = (status IN ('resolved', 'closed'))),
                CHECK (closed_at IS NULL OR closed_at > created_at)
            );
        "#,
    },
    Migration {
        version: 2,
        description: "Queue and export indexes",
        sql: r#"
            -- Oldest-first scan of the unassigned pool
            CREATE INDEX IF NOT EXISTS idx_tickets_queue
                ON tickets(status, created_at, id);

            -- Date-range export of terminal tickets
            CREATE INDEX IF NOT EXISTS idx_tickets_closed_at
                ON tickets(closed_at);

            CREATE INDEX IF NOT EXISTS idx_tickets_assigned_to
                ON tickets(assigned_to);
        "#,
    },
];

/// Initialize the migrations table
fn init_migrations_table(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version
pub(crate) fn get_current_version(conn: &Connection) -> Result<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_migrations", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}

/// Record that a migration was applied
fn record_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    conn.execute(
        "INSERT INTO schema_migrations (version, description, applied_at) VALUES (?1, ?2, ?3)",
        rusqlite::params![
            migration.version,
            migration.description,
            chrono::Utc::now().to_rfc3339()
        ],
    )?;
    Ok(())
}

/// Run all pending migrations, each in its own transaction
#[instrument(skip(conn))]
pub fn run_migrations(conn: &Connection) -> Result<()> {
    init_migrations_table(conn)?;

    let current_version = get_current_version(conn)?;
    info!(current_version, "Checking for pending migrations");

    for migration in MIGRATIONS {
        if migration.version > current_version {
            info!(
                version = migration.version,
                description = migration.description,
                "Applying migration"
            );

            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(migration.sql)?;
            record_migration(&tx, migration)?;
            tx.commit()?;

            info!(version = migration.version, "Migration complete");
        }
    }

    let new_version = get_current_version(conn)?;
    if new_version > current_version {
        info!(
            from = current_version,
            to = new_version,
            "Database schema updated"
        );
    }

    Ok(())
}
