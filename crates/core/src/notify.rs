//! Queue change notifications
//!
//! The engine emits one [`QueueEvent`] per state change after the store has
//! committed it. Delivery is best-effort: a subscriber that misses an event
//! recovers through its own full-state poll.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{Ticket, TicketId, TicketStatus};

/// Default capacity of the in-process broadcast channel
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// What happened to the ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Claimed,
    Resolved,
    Returned,
    Flushed,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Claimed => "claimed",
            Self::Resolved => "resolved",
            Self::Returned => "returned",
            Self::Flushed => "flushed",
        }
    }
}

/// The part of a ticket a queue display needs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    pub id: TicketId,
    pub status: TicketStatus,
    pub student_name: String,
    pub course: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl From<&Ticket> for TicketSnapshot {
    fn from(ticket: &Ticket) -> Self {
        Self {
            id: ticket.id,
            status: ticket.status,
            student_name: ticket.student_name.clone(),
            course: ticket.course.clone(),
            location: ticket.location.clone(),
            created_at: ticket.created_at,
            closed_at: ticket.closed_at,
        }
    }
}

/// A committed ticket state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEvent {
    pub kind: EventKind,
    pub ticket: TicketSnapshot,
    pub emitted_at: DateTime<Utc>,
}

impl QueueEvent {
    pub fn new(kind: EventKind, ticket: &Ticket, emitted_at: DateTime<Utc>) -> Self {
        Self {
            kind,
            ticket: TicketSnapshot::from(ticket),
            emitted_at,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Publisher closed")]
    Closed,
}

/// Sink for queue events. Must never block the caller.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: QueueEvent) -> Result<(), PublishError>;
}

/// In-process fan-out over a bounded broadcast channel.
///
/// Slow receivers lag and lose the oldest events; the sender never waits.
#[derive(Debug, Clone)]
pub struct QueueBroadcaster {
    sender: broadcast::Sender<QueueEvent>,
}

impl QueueBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for QueueBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventPublisher for QueueBroadcaster {
    fn publish(&self, event: QueueEvent) -> Result<(), PublishError> {
        // No receivers: nothing is watching the queue, drop it
        if self.sender.send(event).is_err() {
            trace!("No queue subscribers, event dropped");
        }
        Ok(())
    }
}

/// Publisher that discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPublisher;

impl EventPublisher for NullPublisher {
    fn publish(&self, _event: QueueEvent) -> Result<(), PublishError> {
        Ok(())
    }
}
