#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::domain::ids::{BotId, MessageId, PendingId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

impl MessageRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Author of a message: a bot participant or a human user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorId {
    Bot(BotId),
    Human(UserId),
}

/// How one tool call inside a turn was resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallDisposition {
    Executed { success: bool },
    Deferred { pending_id: PendingId },
}

/// Record of one tool call attempted during a turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub disposition: ToolCallDisposition,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageConfig {
    pub role: Option<MessageRole>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
}

/// One turn's input or output unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageState {
    pub id: MessageId,
    pub created_at: DateTime<Utc>,
    pub config: MessageConfig,
    pub text: String,
    pub language: Option<String>,
    /// Weak reference: id only, no ownership.
    pub parent: Option<MessageId>,
    pub user: AuthorId,
}

impl MessageState {
    /// Synthetic single-message wrapper for a standalone text prompt.
    pub fn standalone_prompt(text: impl Into<String>, author: AuthorId) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: Utc::now(),
            config: MessageConfig {
                role: Some(MessageRole::User),
                tool_calls: Vec::new(),
            },
            text: text.into(),
            language: None,
            parent: None,
            user: author,
        }
    }

    /// System announcement, e.g. the swarm-started kick-off message.
    pub fn system_announcement(text: impl Into<String>, author: AuthorId) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: Utc::now(),
            config: MessageConfig {
                role: Some(MessageRole::System),
                tool_calls: Vec::new(),
            },
            text: text.into(),
            language: None,
            parent: None,
            user: author,
        }
    }

    /// Tool-result message fed back into the model's next iteration.
    pub fn tool_result(
        caller: &BotId,
        parent: Option<MessageId>,
        payload: &serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: Utc::now(),
            config: MessageConfig {
                role: Some(MessageRole::Tool),
                tool_calls: Vec::new(),
            },
            text: payload.to_string(),
            language: None,
            parent,
            user: AuthorId::Bot(caller.clone()),
        }
    }

    /// The bot's final reply for one turn, carrying every tool call
    /// attempted during the loop.
    pub fn bot_reply(bot_id: &BotId, text: String, tool_calls: Vec<ToolCallRecord>) -> Self {
        Self {
            id: MessageId::generate(),
            created_at: Utc::now(),
            config: MessageConfig {
                role: Some(MessageRole::Assistant),
                tool_calls,
            },
            text,
            language: None,
            parent: None,
            user: AuthorId::Bot(bot_id.clone()),
        }
    }
}
