//! Assistant and caller identity models

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a wormhole assistant, owned by the user directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssistantId(pub i64);

impl fmt::Display for AssistantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A staff member who can claim tickets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: AssistantId,
    pub display_name: String,
    pub is_admin: bool,
}

/// The authenticated caller of a mutating operation.
///
/// Built by the auth layer before it calls into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub id: AssistantId,
    pub is_admin: bool,
}

impl CallerIdentity {
    pub fn assistant(id: i64) -> Self {
        Self {
            id: AssistantId(id),
            is_admin: false,
        }
    }

    pub fn admin(id: i64) -> Self {
        Self {
            id: AssistantId(id),
            is_admin: true,
        }
    }
}

impl From<&Assistant> for CallerIdentity {
    fn from(assistant: &Assistant) -> Self {
        Self {
            id: assistant.id,
            is_admin: assistant.is_admin,
        }
    }
}
