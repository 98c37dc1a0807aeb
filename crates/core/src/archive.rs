//! Audit archive of terminal tickets
//!
//! Every transition into `resolved` or `closed` appends one record to an
//! append-only log. Appends happen after the store commit and their failure
//! never reaches the caller of the engine.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::models::{AssistantId, ClosedReason, Ticket, TicketId};
use crate::storage::TicketRepository;

/// Column order of the archive log
pub const ARCHIVE_HEADER: [&str; 9] = [
    "ticket_id",
    "student_name",
    "course",
    "location",
    "created_at",
    "closed_at",
    "closed_reason",
    "assignee",
    "party_size",
];

/// Column order of the date-range export
pub const EXPORT_HEADER: [&str; 8] = [
    "ticket_id",
    "student_name",
    "course",
    "location",
    "created_at",
    "closed_at",
    "closed_reason",
    "assignee",
];

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Store error: {0}")]
    Store(#[from] crate::error::Error),

    #[error("Ticket {0} is not terminal")]
    NotTerminal(TicketId),
}

/// One immutable line of the audit log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub ticket_id: TicketId,
    pub student_name: String,
    pub course: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
    pub closed_reason: ClosedReason,
    pub assignee: Option<AssistantId>,
    pub party_size: u32,
}

impl ArchiveRecord {
    /// Build the record for a ticket that has just become terminal
    pub fn from_ticket(ticket: &Ticket) -> Result<Self, ArchiveError> {
        match (ticket.closed_at, ticket.closed_reason) {
            (Some(closed_at), Some(closed_reason)) => Ok(Self {
                ticket_id: ticket.id,
                student_name: ticket.student_name.clone(),
                course: ticket.course.clone(),
                location: ticket.location.clone(),
                created_at: ticket.created_at,
                closed_at,
                closed_reason,
                assignee: ticket.closed_by,
                party_size: ticket.party_size,
            }),
            _ => Err(ArchiveError::NotTerminal(ticket.id)),
        }
    }
}

/// Append-only destination for archive records
pub trait ArchiveSink: Send + Sync {
    /// Append one complete record in a single write
    fn append(&self, record: &ArchiveRecord) -> Result<(), ArchiveError>;
}

/// Archive log kept as a CSV file
pub struct CsvArchive {
    path: PathBuf,
    file: Mutex<File>,
}

impl CsvArchive {
    /// Open the log for appending, writing the header if the file is new
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            let mut wtr = csv::WriterBuilder::new().from_writer(Vec::new());
            wtr.write_record(ARCHIVE_HEADER)?;
            file.write_all(&finish(wtr)?)?;
            debug!("Created archive log");
        }

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every record back from the log
    pub fn read_records(&self) -> Result<Vec<ArchiveRecord>, ArchiveError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(&self.path)?;
        let records = rdr
            .deserialize()
            .collect::<Result<Vec<ArchiveRecord>, csv::Error>>()?;
        Ok(records)
    }
}

impl ArchiveSink for CsvArchive {
    fn append(&self, record: &ArchiveRecord) -> Result<(), ArchiveError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        wtr.serialize(record)?;
        let line = finish(wtr)?;

        let mut file = self
            .file
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        file.write_all(&line)?;
        Ok(())
    }
}

fn finish(wtr: csv::Writer<Vec<u8>>) -> Result<Vec<u8>, ArchiveError> {
    wtr.into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error()))
}

fn rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Write terminal tickets closed within `[since, until]` as CSV.
///
/// Returns the number of data rows written.
#[instrument(skip(repo, writer))]
pub fn export_terminal<R, W>(
    repo: &R,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    writer: W,
) -> Result<usize, ArchiveError>
where
    R: TicketRepository + ?Sized,
    W: Write,
{
    let tickets = repo.list_terminal(since, until)?;

    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(EXPORT_HEADER)?;
    for ticket in &tickets {
        let closed_at = ticket.closed_at.map(rfc3339).unwrap_or_default();
        let reason = ticket
            .closed_reason
            .map(|r| r.as_str().to_string())
            .unwrap_or_default();
        let assignee = ticket
            .closed_by
            .map(|a| a.to_string())
            .unwrap_or_default();
        wtr.write_record([
            ticket.id.to_string(),
            ticket.student_name.clone(),
            ticket.course.clone(),
            ticket.location.clone(),
            rfc3339(ticket.created_at),
            closed_at,
            reason,
            assignee,
        ])?;
    }
    wtr.flush()?;

    debug!(rows = tickets.len(), "Exported terminal tickets");
    Ok(tickets.len())
}
