//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible ticket states during development.
//! These checks are compiled out in release builds.

use crate::models::{Ticket, TicketStatus};

/// Validate that a ticket's state is internally consistent
pub fn assert_ticket_invariants(ticket: &Ticket) {
    // Only an in-progress ticket has an assignee, and it always has one
    debug_assert!(
        ticket.assigned_to.is_some() == (ticket.status == TicketStatus::InProgress),
        "Ticket {} is {} with assignee {:?}",
        ticket.id,
        ticket.status,
        ticket.assigned_to
    );

    let terminal = ticket.status.is_terminal();
    debug_assert!(
        ticket.closed_at.is_some() == terminal,
        "Ticket {} is {} with closed_at {:?}",
        ticket.id,
        ticket.status,
        ticket.closed_at
    );

    debug_assert!(
        ticket.closed_reason.is_some() == terminal,
        "Ticket {} is {} with closed_reason {:?}",
        ticket.id,
        ticket.status,
        ticket.closed_reason
    );

    if let Some(closed_at) = ticket.closed_at {
        debug_assert!(
            closed_at > ticket.created_at,
            "Ticket {} closed at {} before it was created at {}",
            ticket.id,
            closed_at,
            ticket.created_at
        );
    }

    debug_assert!(ticket.party_size >= 1, "Ticket {} has empty party", ticket.id);
}

/// Validate that a queue listing is in claim order
pub fn assert_queue_order(tickets: &[Ticket]) {
    debug_assert!(
        tickets
            .windows(2)
            .all(|w| (w[0].created_at, w[0].id) <= (w[1].created_at, w[1].id)),
        "Queue listing is not ordered by creation time"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AssistantId, ClosedReason, TicketId};
    use chrono::{Duration, Utc};

    fn make_ticket() -> Ticket {
        Ticket {
            id: TicketId(1),
            student_name: "Ada".to_string(),
            course: "PHYS 1250".to_string(),
            location: "Table 2".to_string(),
            status: TicketStatus::Live,
            assigned_to: None,
            created_at: Utc::now(),
            closed_at: None,
            closed_reason: None,
            party_size: 1,
            closed_by: None,
        }
    }

    #[test]
    fn test_valid_live_ticket() {
        assert_ticket_invariants(&make_ticket());
    }

    #[test]
    fn test_valid_resolved_ticket() {
        let mut ticket = make_ticket();
        ticket.status = TicketStatus::Resolved;
        ticket.closed_at = Some(ticket.created_at + Duration::minutes(5));
        ticket.closed_reason = Some(ClosedReason::Helped);
        ticket.closed_by = Some(AssistantId(7));
        assert_ticket_invariants(&ticket);
    }

    #[test]
    #[should_panic(expected = "with assignee")]
    fn test_live_ticket_with_assignee() {
        let mut ticket = make_ticket();
        ticket.assigned_to = Some(AssistantId(7));
        assert_ticket_invariants(&ticket);
    }

    #[test]
    #[should_panic(expected = "before it was created")]
    fn test_closed_before_created() {
        let mut ticket = make_ticket();
        ticket.status = TicketStatus::Closed;
        ticket.closed_at = Some(ticket.created_at);
        ticket.closed_reason = Some(ClosedReason::Flushed);
        assert_ticket_invariants(&ticket);
    }

    #[test]
    fn test_queue_order() {
        let first = make_ticket();
        let mut second = make_ticket();
        second.id = TicketId(2);
        second.created_at = first.created_at + Duration::seconds(1);
        assert_queue_order(&[first, second]);
    }
}
