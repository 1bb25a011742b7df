#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::domain::ids::{ConversationId, MessageId, PendingId, UserId};
use serde::{Deserialize, Serialize};

/// Events driving the swarm lifecycle. Closed sum: every variant
/// carries its own strongly typed payload and is handled by exhaustive
/// matching.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwarmEvent {
    SwarmStarted {
        conversation_id: ConversationId,
        acted_by: UserId,
        goal: String,
        initial_message: String,
    },
    ExternalMessage {
        conversation_id: ConversationId,
        acted_by: UserId,
        message_id: MessageId,
    },
    ToolApproved {
        conversation_id: ConversationId,
        acted_by: UserId,
        pending_id: PendingId,
    },
    ToolRejected {
        conversation_id: ConversationId,
        acted_by: UserId,
        pending_id: PendingId,
        reason: Option<String>,
    },
}

impl SwarmEvent {
    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        match self {
            Self::SwarmStarted {
                conversation_id, ..
            }
            | Self::ExternalMessage {
                conversation_id, ..
            }
            | Self::ToolApproved {
                conversation_id, ..
            }
            | Self::ToolRejected {
                conversation_id, ..
            } => conversation_id,
        }
    }

    #[must_use]
    pub const fn acted_by(&self) -> &UserId {
        match self {
            Self::SwarmStarted { acted_by, .. }
            | Self::ExternalMessage { acted_by, .. }
            | Self::ToolApproved { acted_by, .. }
            | Self::ToolRejected { acted_by, .. } => acted_by,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::SwarmStarted { .. } => "swarm_started",
            Self::ExternalMessage { .. } => "external_message_created",
            Self::ToolApproved { .. } => "approved_tool_execution_request",
            Self::ToolRejected { .. } => "rejected_tool_execution_request",
        }
    }
}
