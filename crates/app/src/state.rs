//! Application state management

use std::sync::Arc;

use tracing::info;
use wormhole_core::{
    AssignmentEngine, AssistantId, CsvArchive, Database, QueueBroadcaster, SystemClock,
};

use crate::config::{Config, RosterEntry};
use crate::error::Result;

/// Everything the running service shares between tasks
pub struct AppState {
    pub config: Config,
    pub db: Arc<Database>,
    pub engine: Arc<AssignmentEngine>,
    pub broadcaster: QueueBroadcaster,
    pub archive: Arc<CsvArchive>,
}

impl AppState {
    /// Open the store and archive named by `config` and wire the engine
    pub fn open(config: Config) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = Arc::new(Database::open(&config.database_path)?);
        import_roster(&db, &config.roster)?;

        let archive = Arc::new(CsvArchive::open(&config.archive_path)?);
        let broadcaster = QueueBroadcaster::default();

        let engine = AssignmentEngine::new(
            db.clone(),
            Arc::new(broadcaster.clone()),
            archive.clone(),
            Arc::new(SystemClock),
            config.engine_config(),
        )?;

        info!(
            database = %config.database_path.display(),
            archive = %config.archive_path.display(),
            "Application state ready"
        );

        Ok(Self {
            config,
            db,
            engine: Arc::new(engine),
            broadcaster,
            archive,
        })
    }
}

/// Make the directory match the configured roster entries
fn import_roster(db: &Database, roster: &[RosterEntry]) -> Result<()> {
    for entry in roster {
        db.upsert_assistant(AssistantId(entry.id), &entry.display_name, entry.is_admin)?;
    }
    if !roster.is_empty() {
        info!(count = roster.len(), "Imported assistant roster");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wormhole_core::{AssistantDirectory, CallerIdentity, ClosedReason};

    fn config_in(dir: &std::path::Path) -> Config {
        let mut config = Config::from_toml(
            r#"
            [[roster]]
            id = 1
            display_name = "Head TA"
            is_admin = true

            [[roster]]
            id = 7
            display_name = "Grace"
            "#,
        )
        .unwrap();
        config.database_path = dir.join("data").join("wormhole.db");
        config.archive_path = dir.join("data").join("archive.csv");
        config
    }

    #[test]
    fn test_open_creates_files_and_roster() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(config_in(dir.path())).unwrap();

        assert!(state.config.database_path.exists());
        assert!(state.archive.path().exists());

        let admins = state.db.list_admins().unwrap();
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0].display_name, "Head TA");
        assert!(state.db.find_assistant(AssistantId(7)).unwrap().is_some());
    }

    #[test]
    fn test_engine_writes_archive() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(config_in(dir.path())).unwrap();
        let grace = CallerIdentity::assistant(7);

        let ticket = state.engine.submit_ticket("Ada", "PHYS 1250", "Table 2").unwrap();
        state.engine.claim_next(&grace).unwrap();
        state
            .engine
            .resolve(&grace, ticket.id, ClosedReason::Helped, None)
            .unwrap();

        let records = state.archive.read_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ticket_id, ticket.id);
        assert_eq!(records[0].assignee, Some(AssistantId(7)));
    }

    #[test]
    fn test_reopen_keeps_tickets() {
        let dir = tempfile::tempdir().unwrap();
        let id = {
            let state = AppState::open(config_in(dir.path())).unwrap();
            state.engine.submit_ticket("Ada", "PHYS 1250", "Table 2").unwrap().id
        };

        let state = AppState::open(config_in(dir.path())).unwrap();
        let unassigned = state.engine.list_unassigned().unwrap();
        assert_eq!(unassigned.len(), 1);
        assert_eq!(unassigned[0].id, id);
    }
}
