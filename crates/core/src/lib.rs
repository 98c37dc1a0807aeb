//! Wormhole Core Library
//!
//! Ticket models, the lifecycle state machine, the assignment engine, and
//! the storage, notification and archive layers it drives.

pub mod archive;
pub mod clock;
pub mod engine;
pub mod error;
pub mod invariants;
pub mod lifecycle;
pub mod models;
pub mod notify;
pub mod reminders;
pub mod storage;

pub use archive::{export_terminal, ArchiveError, ArchiveRecord, ArchiveSink, CsvArchive};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{AssignmentEngine, EngineConfig};
pub use error::{Error, Result};
pub use lifecycle::TicketEvent;
pub use models::*;
pub use notify::{
    EventKind, EventPublisher, NullPublisher, PublishError, QueueBroadcaster, QueueEvent,
    TicketSnapshot,
};
pub use reminders::{compose_digests, Digest};
pub use storage::{AssistantDirectory, Database, Storage, TicketRepository};
