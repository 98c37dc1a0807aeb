//! Reminder digests
//!
//! Built purely from the read queries; delivery belongs to whoever owns the
//! mail (or chat, or log) channel.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::Result;
use crate::models::{Assistant, AssistantId, Ticket, TicketStatus};
use crate::storage::{AssistantDirectory, TicketRepository};

/// One notification to deliver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Digest {
    /// An assistant's own in-progress tickets
    Assignee {
        assistant: Assistant,
        tickets: Vec<Ticket>,
    },
    /// Tickets nobody has claimed, addressed to every admin
    Unassigned {
        admins: Vec<Assistant>,
        tickets: Vec<Ticket>,
    },
}

impl Digest {
    pub fn recipients(&self) -> Vec<AssistantId> {
        match self {
            Self::Assignee { assistant, .. } => vec![assistant.id],
            Self::Unassigned { admins, .. } => admins.iter().map(|a| a.id).collect(),
        }
    }

    pub fn tickets(&self) -> &[Ticket] {
        match self {
            Self::Assignee { tickets, .. } | Self::Unassigned { tickets, .. } => tickets,
        }
    }

    pub fn subject(&self) -> &'static str {
        match self {
            Self::Assignee { .. } => "Action Required: Unclosed Wormhole Tickets",
            Self::Unassigned { .. } => "Alert: New Tickets in Queue",
        }
    }

    pub fn body(&self) -> String {
        match self {
            Self::Assignee { tickets, .. } => {
                let list = tickets
                    .iter()
                    .map(|t| format!("- {} ({})", t.student_name, t.course))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "Hello,\n\nYou have {} tickets still in progress:\n{}\n\n\
                     Please resolve them once help is finished.",
                    tickets.len(),
                    list
                )
            }
            Self::Unassigned { tickets, .. } => {
                let list = tickets
                    .iter()
                    .map(|t| format!("- {} (Course: {})", t.student_name, t.course))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "Hello,\n\nThere are {} tickets currently waiting in the live queue:\n{}\n\n\
                     Please review the queue and ensure these students are helped.",
                    tickets.len(),
                    list
                )
            }
        }
    }
}

/// Compose every digest that is due right now.
///
/// Assignee digests come first, ordered by assistant id. Tickets held by an
/// id missing from the directory are skipped.
pub fn compose_digests<S>(store: &S) -> Result<Vec<Digest>>
where
    S: TicketRepository + AssistantDirectory + ?Sized,
{
    let mut by_assignee: BTreeMap<AssistantId, Vec<Ticket>> = BTreeMap::new();
    for ticket in store.list_by_status(TicketStatus::InProgress)? {
        if let Some(assistant) = ticket.assigned_to {
            by_assignee.entry(assistant).or_default().push(ticket);
        }
    }

    let mut digests = Vec::new();
    for (id, tickets) in by_assignee {
        match store.find_assistant(id)? {
            Some(assistant) => digests.push(Digest::Assignee { assistant, tickets }),
            None => warn!(assistant_id = %id, "Tickets held by unknown assistant"),
        }
    }

    let unassigned = store.list_by_status(TicketStatus::Live)?;
    if !unassigned.is_empty() {
        let admins = store.list_admins()?;
        if !admins.is_empty() {
            digests.push(Digest::Unassigned {
                admins,
                tickets: unassigned,
            });
        }
    }

    Ok(digests)
}
