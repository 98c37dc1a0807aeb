//! Forwards engine events to the live queue server

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};
use wormhole_core::{AssignmentEngine, EventKind, QueueEvent, TicketSnapshot, TicketStatus};
use wormhole_net::{NetEventKind, NetStatus, NetTicket, QueueServer, SnapshotSource};

/// Serves the server's snapshots from the engine's open tickets
pub struct EngineSnapshot {
    engine: Arc<AssignmentEngine>,
}

impl EngineSnapshot {
    pub fn new(engine: Arc<AssignmentEngine>) -> Self {
        Self { engine }
    }
}

impl SnapshotSource for EngineSnapshot {
    fn snapshot(&self) -> wormhole_net::Result<Vec<NetTicket>> {
        let tickets = self
            .engine
            .open_tickets()
            .map_err(|e| wormhole_net::Error::Snapshot(e.to_string()))?;
        Ok(tickets
            .iter()
            .map(|t| net_ticket(&TicketSnapshot::from(t)))
            .collect())
    }
}

pub fn net_status(status: TicketStatus) -> NetStatus {
    match status {
        TicketStatus::Live => NetStatus::Live,
        TicketStatus::InProgress => NetStatus::InProgress,
        TicketStatus::Resolved => NetStatus::Resolved,
        TicketStatus::Closed => NetStatus::Closed,
    }
}

pub fn net_kind(kind: EventKind) -> NetEventKind {
    match kind {
        EventKind::Created => NetEventKind::Created,
        EventKind::Claimed => NetEventKind::Claimed,
        EventKind::Resolved => NetEventKind::Resolved,
        EventKind::Returned => NetEventKind::Returned,
        EventKind::Flushed => NetEventKind::Flushed,
    }
}

pub fn net_ticket(ticket: &TicketSnapshot) -> NetTicket {
    NetTicket {
        id: ticket.id.0,
        status: net_status(ticket.status),
        student_name: ticket.student_name.clone(),
        course: ticket.course.clone(),
        location: ticket.location.clone(),
        created_at: ticket.created_at,
        closed_at: ticket.closed_at,
    }
}

/// Relay events until the engine side closes or shutdown is signalled.
///
/// A lagged receiver has lost events, so observers get a full snapshot
/// instead of a gap.
pub async fn run(
    mut events: broadcast::Receiver<QueueEvent>,
    server: Arc<QueueServer>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(event) => {
                    let sequence = server
                        .publish(net_kind(event.kind), net_ticket(&event.ticket))
                        .await;
                    debug!(ticket_id = %event.ticket.id, kind = event.kind.as_str(), sequence, "Relayed ticket change");
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "Event relay lagged, pushing snapshot");
                    if let Err(e) = server.push_snapshot().await {
                        warn!("Failed to push snapshot: {}", e);
                    }
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.changed() => break,
        }
    }
    info!("Event relay stopped");
}
