#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Collaborator ports consumed by the orchestration core.
//!
//! The core never talks to a model endpoint, tool backend, store or
//! notifier directly; everything external sits behind one of these
//! narrow traits and is injected at construction time.

use crate::cancel::CancellationContext;
use crate::domain::{
    AccountId, BotId, BotParticipant, ChatConfig, ConversationId, ConversationState, MessageId,
    MessageState, PendingId, PendingToolCallEntry, UserId,
};
use crate::error::Result;
use futures_util::Stream;
use std::future::Future;
use std::pin::Pin;

pub type PortFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Ordered stream of model events for one model call.
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent>> + Send>>;

/// Session data for the human on whose behalf a turn runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSession {
    pub user_id: UserId,
    pub meta: serde_json::Value,
}

/// Schema of one tool as presented to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
    pub tools: Vec<ToolDefinition>,
    pub system_message: Option<String>,
}

/// Bounded prompt window assembled by the context builder
#[derive(Debug, Clone)]
pub struct ContextWindow {
    pub messages: Vec<MessageState>,
}

/// One event from the model stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelEvent {
    Message {
        delta: String,
        response_id: Option<String>,
    },
    Reasoning {
        delta: String,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    Done {
        credits_used: i128,
        response_id: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub previous_response_id: Option<String>,
    pub input: Vec<MessageState>,
    pub tools: Vec<ToolDefinition>,
    pub parallel_tool_calls: bool,
    pub system_message: String,
    pub session: Option<UserSession>,
    /// Effective credit ceiling for this single call.
    pub max_credits: i128,
    pub cancel: CancellationContext,
}

/// Outcome of one tool execution. Failure is data fed back to the
/// model, never an error of the port itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRunOutcome {
    Succeeded {
        output: serde_json::Value,
        credits_used: i128,
    },
    Failed {
        code: String,
        message: String,
        credits_used: i128,
    },
}

impl ToolRunOutcome {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    #[must_use]
    pub const fn credits_used(&self) -> i128 {
        match self {
            Self::Succeeded { credits_used, .. } | Self::Failed { credits_used, .. } => {
                *credits_used
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolContext {
    pub conversation_id: ConversationId,
    pub caller_bot_id: BotId,
    pub session: Option<UserSession>,
    pub cancel: CancellationContext,
}

/// Bot status updates surfaced on the live channel for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotStatusKind {
    ToolCalling,
    ToolCompleted,
    ToolFailed,
    ReengagementFailed,
}

impl BotStatusKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ToolCalling => "tool_calling",
            Self::ToolCompleted => "tool_completed",
            Self::ToolFailed => "tool_failed",
            Self::ReengagementFailed => "reengagement_failed",
        }
    }
}

/// Named events emitted on a conversation's live channel
#[derive(Debug, Clone)]
pub enum LiveEvent {
    Typing {
        bot_id: BotId,
        active: bool,
    },
    ResponseStream {
        bot_id: BotId,
        delta: String,
    },
    ReasoningStream {
        bot_id: BotId,
        delta: String,
    },
    BotStatus {
        bot_id: BotId,
        status: BotStatusKind,
        detail: serde_json::Value,
    },
    ToolApprovalRequired {
        entry: PendingToolCallEntry,
    },
    ToolApprovalRejected {
        pending_id: PendingId,
        reason: Option<String>,
    },
    StreamError {
        bot_id: Option<BotId>,
        code: String,
        message: String,
    },
}

/// Best-effort out-of-band notification payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
}

/// Billing event published for credits consumed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BillingDebit {
    pub id: String,
    pub account_id: AccountId,
    /// Negative decimal string.
    pub delta: String,
    pub entry_type: String,
    pub source: String,
    pub meta: serde_json::Value,
}

impl BillingDebit {
    #[must_use]
    pub fn for_credits(
        account_id: AccountId,
        credits: i128,
        source: impl Into<String>,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            account_id,
            delta: format!("-{credits}"),
            entry_type: "debit".to_string(),
            source: source.into(),
            meta,
        }
    }
}

pub trait ContextBuilder {
    /// Assemble a bounded prompt window starting from a stored message.
    fn build_context<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        bot: &'a BotParticipant,
        model_hint: &'a str,
        start_message: &'a MessageId,
        opts: ContextOptions,
    ) -> PortFuture<'a, ContextWindow>;
}

pub trait ModelRouter {
    fn open_stream(&self, request: ModelRequest) -> PortFuture<'_, ModelStream>;
}

pub trait ToolRunner {
    fn run_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
        context: ToolContext,
    ) -> PortFuture<'a, ToolRunOutcome>;
}

pub trait ToolRegistry {
    fn tool_definition(&self, name: &str) -> Option<ToolDefinition>;
    fn built_in_definitions(&self) -> Vec<ToolDefinition>;
    fn swarm_tool_definitions(&self) -> Vec<ToolDefinition>;
}

pub trait ConversationStore {
    fn get_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> PortFuture<'a, Option<ConversationState>>;

    fn update_config<'a>(
        &'a self,
        id: &'a ConversationId,
        config: &'a ChatConfig,
    ) -> PortFuture<'a, ()>;
}

pub trait MessageStore {
    fn get_message<'a>(&'a self, id: &'a MessageId) -> PortFuture<'a, Option<MessageState>>;

    fn add_message<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        message: &'a MessageState,
    ) -> PortFuture<'a, ()>;
}

pub trait ResponderStrategy {
    /// Which agents should act for this trigger message. The selection
    /// algorithm itself is pluggable and out of scope here.
    fn select_responders<'a>(
        &'a self,
        state: &'a ConversationState,
        trigger: &'a MessageState,
    ) -> PortFuture<'a, Vec<BotParticipant>>;
}

pub trait AccountDirectory {
    fn billing_account<'a>(
        &'a self,
        state: &'a ConversationState,
    ) -> PortFuture<'a, Option<AccountId>>;
}

pub trait BillingBus {
    fn publish_billing(&self, debit: BillingDebit) -> PortFuture<'_, ()>;
}

pub trait LiveChannel {
    /// Fire-and-forget emit scoped to one conversation.
    fn emit_live<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        event: LiveEvent,
    ) -> PortFuture<'a, ()>;

    fn has_active_connection<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> PortFuture<'a, bool>;
}

pub trait PushNotifier {
    fn push_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        notification: PushNotification,
    ) -> PortFuture<'a, ()>;
}

/// Everything one turn needs.
pub trait TurnPorts:
    ContextBuilder + ModelRouter + ToolRunner + ToolRegistry + BillingBus + LiveChannel + PushNotifier
{
}

impl<T> TurnPorts for T where
    T: ContextBuilder
        + ModelRouter
        + ToolRunner
        + ToolRegistry
        + BillingBus
        + LiveChannel
        + PushNotifier
{
}

/// Everything a dispatch round needs on top of the turn ports.
pub trait DispatchPorts:
    TurnPorts + ConversationStore + MessageStore + ResponderStrategy + AccountDirectory
{
}

impl<T> DispatchPorts for T where
    T: TurnPorts + ConversationStore + MessageStore + ResponderStrategy + AccountDirectory
{
}
