//! Ticket state machine
//!
//! Every mutation the engine performs is first checked here. The table:
//!
//! | From                  | Event             | To            |
//! |-----------------------|-------------------|---------------|
//! | `live`                | claim             | `in_progress` |
//! | `in_progress`         | return to queue   | `live`        |
//! | `in_progress`         | resolve           | `resolved`    |
//! | `live`, `in_progress` | flush             | `closed`      |
//!
//! `resolved` and `closed` are terminal. Flush acts on the whole queue in one
//! statement whose guard selects the open tickets, so only the caller is
//! checked here ([`authorize_flush`]).

use crate::error::{Error, Result};
use crate::models::{AssistantId, CallerIdentity, ClosedReason, Ticket, TicketStatus};

/// A requested lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketEvent {
    Claim { assistant: AssistantId },
    ReturnToQueue,
    Resolve { reason: ClosedReason },
}

impl TicketEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Claim { .. } => "claim",
            Self::ReturnToQueue => "return_to_queue",
            Self::Resolve { .. } => "resolve",
        }
    }
}

/// Compute the state a ticket moves to, or reject the transition
pub fn next_status(ticket: &Ticket, event: TicketEvent) -> Result<TicketStatus> {
    let from = ticket.status;
    if from.is_terminal() {
        return Err(rejected(ticket, event));
    }

    match (from, event) {
        (TicketStatus::Live, TicketEvent::Claim { .. }) if ticket.is_unassigned() => {
            Ok(TicketStatus::InProgress)
        }
        (TicketStatus::InProgress, TicketEvent::ReturnToQueue) => Ok(TicketStatus::Live),
        (TicketStatus::InProgress, TicketEvent::Resolve { reason }) => {
            if reason.is_resolution() {
                Ok(TicketStatus::Resolved)
            } else {
                Err(Error::InvalidTransition(format!(
                    "'{}' is not a resolution reason",
                    reason
                )))
            }
        }
        _ => Err(rejected(ticket, event)),
    }
}

/// Check that `caller` may apply `event` to `ticket`
pub fn authorize(ticket: &Ticket, caller: &CallerIdentity, event: TicketEvent) -> Result<()> {
    let allowed = match event {
        // Assigning on behalf of someone else is an admin action
        TicketEvent::Claim { assistant } => assistant == caller.id || caller.is_admin,
        TicketEvent::ReturnToQueue | TicketEvent::Resolve { .. } => {
            caller.is_admin || ticket.is_held_by(caller.id)
        }
    };

    if allowed {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "assistant {} may not {} ticket {}",
            caller.id,
            event.name(),
            ticket.id
        )))
    }
}

/// Check that `caller` may close every open ticket at once
pub fn authorize_flush(caller: &CallerIdentity) -> Result<()> {
    if caller.is_admin {
        Ok(())
    } else {
        Err(Error::Unauthorized(format!(
            "assistant {} may not flush the queue",
            caller.id
        )))
    }
}

/// Full guard: legal transition first, then caller rights
pub fn check(ticket: &Ticket, caller: &CallerIdentity, event: TicketEvent) -> Result<TicketStatus> {
    let to = next_status(ticket, event)?;
    authorize(ticket, caller, event)?;
    Ok(to)
}

fn rejected(ticket: &Ticket, event: TicketEvent) -> Error {
    Error::InvalidTransition(format!(
        "cannot {} ticket {} in state {}",
        event.name(),
        ticket.id,
        ticket.status
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TicketId;
    use chrono::Utc;

    fn ticket(status: TicketStatus, assigned_to: Option<i64>) -> Ticket {
        Ticket {
            id: TicketId(1),
            student_name: "Ada".to_string(),
            course: "PHYS 1250".to_string(),
            location: "Table 2".to_string(),
            status,
            assigned_to: assigned_to.map(AssistantId),
            created_at: Utc::now(),
            closed_at: None,
            closed_reason: None,
            party_size: 1,
            closed_by: None,
        }
    }

    #[test]
    fn test_claim_only_from_unassigned_live() {
        let claim = TicketEvent::Claim {
            assistant: AssistantId(7),
        };
        assert_eq!(
            next_status(&ticket(TicketStatus::Live, None), claim).unwrap(),
            TicketStatus::InProgress
        );
        assert!(matches!(
            next_status(&ticket(TicketStatus::InProgress, Some(3)), claim),
            Err(Error::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_live_cannot_be_resolved_directly() {
        let resolve = TicketEvent::Resolve {
            reason: ClosedReason::Helped,
        };
        assert!(matches!(
            next_status(&ticket(TicketStatus::Live, None), resolve),
            Err(Error::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_terminal_states_reject_everything() {
        let events = [
            TicketEvent::Claim {
                assistant: AssistantId(1),
            },
            TicketEvent::ReturnToQueue,
            TicketEvent::Resolve {
                reason: ClosedReason::Helped,
            },
        ];
        for status in [TicketStatus::Resolved, TicketStatus::Closed] {
            for event in events {
                assert!(matches!(
                    next_status(&ticket(status, None), event),
                    Err(Error::InvalidTransition(_))
                ));
            }
        }
    }

    #[test]
    fn test_flushed_is_not_a_resolution() {
        let resolve = TicketEvent::Resolve {
            reason: ClosedReason::Flushed,
        };
        assert!(matches!(
            next_status(&ticket(TicketStatus::InProgress, Some(7)), resolve),
            Err(Error::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_resolve_requires_assignee_or_admin() {
        let t = ticket(TicketStatus::InProgress, Some(7));
        let resolve = TicketEvent::Resolve {
            reason: ClosedReason::Helped,
        };

        assert!(check(&t, &CallerIdentity::assistant(7), resolve).is_ok());
        assert!(check(&t, &CallerIdentity::admin(1), resolve).is_ok());
        assert!(matches!(
            check(&t, &CallerIdentity::assistant(9), resolve),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_flush_is_admin_only() {
        assert!(matches!(
            authorize_flush(&CallerIdentity::assistant(7)),
            Err(Error::Unauthorized(_))
        ));
        assert!(authorize_flush(&CallerIdentity::admin(1)).is_ok());
    }

    #[test]
    fn test_claim_needs_live_and_unassigned() {
        // Live but still carrying an assignee is not claimable
        let mut t = ticket(TicketStatus::Live, Some(3));
        let claim = TicketEvent::Claim {
            assistant: AssistantId(7),
        };
        assert!(matches!(
            next_status(&t, claim),
            Err(Error::InvalidTransition(_))
        ));
        t.assigned_to = None;
        assert!(next_status(&t, claim).is_ok());
    }

    #[test]
    fn test_claim_for_someone_else_needs_admin() {
        let t = ticket(TicketStatus::Live, None);
        let for_nine = TicketEvent::Claim {
            assistant: AssistantId(9),
        };
        assert!(matches!(
            check(&t, &CallerIdentity::assistant(7), for_nine),
            Err(Error::Unauthorized(_))
        ));
        assert!(check(&t, &CallerIdentity::admin(1), for_nine).is_ok());
    }
}
