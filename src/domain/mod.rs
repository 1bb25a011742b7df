#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

mod conversation;
mod event;
mod ids;
mod message;
mod pending;

pub use conversation::{
    ApprovalRule, BotParticipant, BotRole, ChatConfig, ConversationState, PerResponseLimits,
    SchedulingPolicy, Subtask, SubtaskStatus, SwarmLimits, SwarmStats,
};
pub use event::SwarmEvent;
pub use ids::{AccountId, BotId, ConversationId, MessageId, PendingId, UserId};
pub use message::{
    AuthorId, MessageConfig, MessageRole, MessageState, ToolCallDisposition, ToolCallRecord,
};
pub use pending::{PendingStatus, PendingToolCallEntry};
