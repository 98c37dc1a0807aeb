//! Ticket model

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AssistantId;
use crate::error::{Error, Result};

/// Maximum accepted length of a student name
pub const MAX_STUDENT_NAME_LEN: usize = 100;
/// Maximum accepted length of a course label
pub const MAX_COURSE_LEN: usize = 50;
/// Maximum accepted length of a location / table label
pub const MAX_LOCATION_LEN: usize = 50;

/// Store-assigned ticket identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub i64);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a ticket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    /// Waiting in the queue
    Live,
    /// Claimed by an assistant
    InProgress,
    /// Helped to completion (terminal)
    Resolved,
    /// Closed administratively (terminal)
    Closed,
}

impl TicketStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "live" => Some(Self::Live),
            "in_progress" => Some(Self::InProgress),
            "resolved" => Some(Self::Resolved),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }

    /// Terminal states accept no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Closed)
    }
}

impl fmt::Display for TicketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a ticket reached a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosedReason {
    Helped,
    NoShow,
    Duplicate,
    /// Reserved for the administrative bulk flush
    Flushed,
}

impl ClosedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Helped => "helped",
            Self::NoShow => "no_show",
            Self::Duplicate => "duplicate",
            Self::Flushed => "flushed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "helped" => Some(Self::Helped),
            "no_show" | "no-show" => Some(Self::NoShow),
            "duplicate" => Some(Self::Duplicate),
            "flushed" => Some(Self::Flushed),
            _ => None,
        }
    }

    /// Parse a caller-supplied reason, rejecting unknown values
    pub fn parse(s: &str) -> Result<Self> {
        Self::from_str(s.trim())
            .ok_or_else(|| Error::InvalidArgument(format!("unrecognized reason '{}'", s)))
    }

    /// Whether an assistant may pick this reason when resolving a ticket
    pub fn is_resolution(&self) -> bool {
        !matches!(self, Self::Flushed)
    }
}

impl fmt::Display for ClosedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A help request moving through the queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub student_name: String,
    pub course: String,
    pub location: String,
    pub status: TicketStatus,
    pub assigned_to: Option<AssistantId>,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub closed_reason: Option<ClosedReason>,
    pub party_size: u32,
    /// Assignee at the moment the ticket became terminal
    pub closed_by: Option<AssistantId>,
}

impl Ticket {
    pub fn is_unassigned(&self) -> bool {
        self.status == TicketStatus::Live && self.assigned_to.is_none()
    }

    /// Whether `assistant` currently holds this ticket
    pub fn is_held_by(&self, assistant: AssistantId) -> bool {
        self.status == TicketStatus::InProgress && self.assigned_to == Some(assistant)
    }
}

/// Validated payload of a new help request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub student_name: String,
    pub course: String,
    pub location: String,
}

impl NewTicket {
    pub fn new(student_name: &str, course: &str, location: &str) -> Result<Self> {
        Ok(Self {
            student_name: required("student_name", student_name, MAX_STUDENT_NAME_LEN)?,
            course: required("course", course, MAX_COURSE_LEN)?,
            location: required("location", location, MAX_LOCATION_LEN)?,
        })
    }
}

fn required(field: &str, value: &str, max_len: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::InvalidArgument(format!("{} is required", field)));
    }
    if value.chars().count() > max_len {
        return Err(Error::InvalidArgument(format!(
            "{} exceeds {} characters",
            field, max_len
        )));
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        for status in [
            TicketStatus::Live,
            TicketStatus::InProgress,
            TicketStatus::Resolved,
            TicketStatus::Closed,
        ] {
            assert_eq!(TicketStatus::from_str(status.as_str()), Some(status));
        }
        assert_eq!(TicketStatus::from_str("current"), None);
        assert!(TicketStatus::Closed.is_terminal());
        assert!(!TicketStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_reason_parsing() {
        assert_eq!(ClosedReason::parse("helped").unwrap(), ClosedReason::Helped);
        assert_eq!(ClosedReason::parse(" no-show ").unwrap(), ClosedReason::NoShow);
        assert!(matches!(
            ClosedReason::parse("gave_up"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(!ClosedReason::Flushed.is_resolution());
        assert!(ClosedReason::Duplicate.is_resolution());
    }

    #[test]
    fn test_new_ticket_trims_and_validates() {
        let t = NewTicket::new("  Ada ", "PHYS 1250", "Table 4").unwrap();
        assert_eq!(t.student_name, "Ada");

        assert!(matches!(
            NewTicket::new("", "PHYS 1250", "Table 4"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            NewTicket::new("Ada", "PHYS 1250", "   "),
            Err(Error::InvalidArgument(_))
        ));

        let long_name = "x".repeat(MAX_STUDENT_NAME_LEN + 1);
        assert!(NewTicket::new(&long_name, "PHYS 1250", "4").is_err());
        let long_course = "c".repeat(MAX_COURSE_LEN + 1);
        assert!(NewTicket::new("Ada", &long_course, "4").is_err());
    }
}
