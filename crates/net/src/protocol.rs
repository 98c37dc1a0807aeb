//! Network protocol message types
//!
//! All messages are JSON-serialized and length-prefixed on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ticket status transmitted over the network (mirrors the core status but decoupled)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetStatus {
    Live,
    InProgress,
    Resolved,
    Closed,
}

/// Kind of change carried by `TicketChanged`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetEventKind {
    Created,
    Claimed,
    Resolved,
    Returned,
    Flushed,
}

/// A ticket as shown on a queue display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetTicket {
    pub id: i64,
    pub status: NetStatus,
    pub student_name: String,
    pub course: String,
    pub location: String,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Network protocol messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Message {
    /// Observer asks to follow a queue topic
    Subscribe { observer_id: Uuid, topic: String },

    /// Server accepts the subscription with the current open tickets
    Subscribed {
        topic: String,
        sequence: u64,
        tickets: Vec<NetTicket>,
    },

    /// Server rejects the subscription
    SubscribeRejected { reason: String },

    /// One committed ticket change
    TicketChanged {
        sequence: u64,
        kind: NetEventKind,
        ticket: NetTicket,
    },

    /// Observer asks for the full open-ticket list
    SnapshotRequest,

    /// Full open-ticket list, as of `sequence`
    Snapshot {
        sequence: u64,
        tickets: Vec<NetTicket>,
    },

    /// Ping to keep connection alive
    Ping,

    /// Pong response to ping
    Pong,

    /// Server liveness beacon carrying the latest sequence
    Heartbeat {
        timestamp: DateTime<Utc>,
        sequence: u64,
    },

    /// Server is shutting down
    ServerShutdown,
}

impl Message {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticket_changed_wire_shape() {
        let msg = Message::TicketChanged {
            sequence: 12,
            kind: NetEventKind::Claimed,
            ticket: NetTicket {
                id: 3,
                status: NetStatus::InProgress,
                student_name: "Ada".to_string(),
                course: "PHYS 1250".to_string(),
                location: "Table 2".to_string(),
                created_at: Utc::now(),
                closed_at: None,
            },
        };

        let bytes = msg.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["type"], "TicketChanged");
        assert_eq!(json["kind"], "claimed");
        assert_eq!(json["ticket"]["status"], "in_progress");

        match Message::from_bytes(&bytes).unwrap() {
            Message::TicketChanged { sequence, ticket, .. } => {
                assert_eq!(sequence, 12);
                assert_eq!(ticket.student_name, "Ada");
            }
            _ => panic!("Wrong message type"),
        }
    }
}
