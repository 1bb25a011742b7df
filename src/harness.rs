#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! In-process collaborators: scripted model router, echo tool runner
//! and in-memory stores behind the full port surface. This is what the
//! demo binary and the integration tests run the orchestrator against;
//! none of it talks to a real model or database.

use crate::domain::{
    AccountId, BotParticipant, ChatConfig, ConversationId, ConversationState, MessageId,
    MessageState, UserId,
};
use crate::error::{Result, SwarmError};
use crate::ports::{
    AccountDirectory, BillingBus, BillingDebit, ContextBuilder, ContextOptions, ContextWindow,
    ConversationStore, LiveChannel, LiveEvent, MessageStore, ModelEvent, ModelRequest,
    ModelRouter, ModelStream, PortFuture, PushNotification, PushNotifier, ResponderStrategy,
    ToolContext, ToolDefinition, ToolRegistry, ToolRunOutcome, ToolRunner,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// One canned model response: optional text, optional tool call, and
/// the credits the "model" charges for producing it.
#[derive(Debug, Clone)]
pub struct ScriptedReply {
    pub text: String,
    pub tool_call: Option<(String, serde_json::Value)>,
    pub credits: i128,
}

impl ScriptedReply {
    #[must_use]
    pub fn text(text: impl Into<String>, credits: i128) -> Self {
        Self {
            text: text.into(),
            tool_call: None,
            credits,
        }
    }

    #[must_use]
    pub fn tool_call(tool: impl Into<String>, arguments: serde_json::Value, credits: i128) -> Self {
        Self {
            text: String::new(),
            tool_call: Some((tool.into(), arguments)),
            credits,
        }
    }
}

/// Scripted, in-memory implementation of every orchestrator port.
///
/// Model replies are keyed by the model string of the requesting agent,
/// so concurrent turns stay deterministic: give each participant its
/// own model name and script them independently.
#[derive(Clone, Default)]
pub struct InProcessPorts {
    conversations: Arc<Mutex<HashMap<ConversationId, ConversationState>>>,
    messages: Arc<Mutex<HashMap<MessageId, MessageState>>>,
    transcript: Arc<Mutex<Vec<MessageState>>>,
    scripts: Arc<Mutex<HashMap<String, VecDeque<ScriptedReply>>>>,
    debits: Arc<Mutex<Vec<BillingDebit>>>,
    live_events: Arc<Mutex<Vec<LiveEvent>>>,
    notifications: Arc<Mutex<Vec<(UserId, PushNotification)>>>,
    account: Arc<Mutex<Option<AccountId>>>,
    connected: Arc<Mutex<bool>>,
}

impl InProcessPorts {
    #[must_use]
    pub fn new() -> Self {
        Self {
            connected: Arc::new(Mutex::new(true)),
            ..Self::default()
        }
    }

    pub async fn insert_conversation(&self, state: ConversationState) {
        let mut conversations = self.conversations.lock().await;
        conversations.insert(state.id.clone(), state);
    }

    pub async fn set_account(&self, account: AccountId) {
        let mut current = self.account.lock().await;
        *current = Some(account);
    }

    pub async fn set_connected(&self, connected: bool) {
        let mut current = self.connected.lock().await;
        *current = connected;
    }

    /// Append canned replies for the agent whose model string is `model`.
    pub async fn script_for(&self, model: impl Into<String>, replies: Vec<ScriptedReply>) {
        let mut scripts = self.scripts.lock().await;
        scripts.entry(model.into()).or_default().extend(replies);
    }

    /// Every message persisted so far, in insertion order.
    pub async fn transcript(&self) -> Vec<MessageState> {
        self.transcript.lock().await.clone()
    }

    pub async fn billing_debits(&self) -> Vec<BillingDebit> {
        self.debits.lock().await.clone()
    }

    pub async fn live_events(&self) -> Vec<LiveEvent> {
        self.live_events.lock().await.clone()
    }

    pub async fn notifications(&self) -> Vec<(UserId, PushNotification)> {
        self.notifications.lock().await.clone()
    }

    pub async fn conversation(&self, id: &ConversationId) -> Option<ConversationState> {
        self.conversations.lock().await.get(id).cloned()
    }
}

impl ContextBuilder for InProcessPorts {
    fn build_context<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        _bot: &'a BotParticipant,
        _model_hint: &'a str,
        start_message: &'a MessageId,
        _opts: ContextOptions,
    ) -> PortFuture<'a, ContextWindow> {
        Box::pin(async move {
            let store = self.messages.lock().await;
            let trigger = store.get(start_message).cloned().ok_or_else(|| {
                SwarmError::StoreError(format!("context start message not found: {start_message}"))
            })?;
            Ok(ContextWindow {
                messages: vec![trigger],
            })
        })
    }
}

impl ModelRouter for InProcessPorts {
    fn open_stream(&self, request: ModelRequest) -> PortFuture<'_, ModelStream> {
        Box::pin(async move {
            let reply = {
                let mut scripts = self.scripts.lock().await;
                scripts
                    .get_mut(&request.model)
                    .and_then(VecDeque::pop_front)
            };

            // Out of script means the agent has nothing more to say.
            let mut events: Vec<Result<ModelEvent>> = Vec::new();
            if let Some(reply) = reply {
                if !reply.text.is_empty() {
                    events.push(Ok(ModelEvent::Message {
                        delta: reply.text,
                        response_id: None,
                    }));
                }
                if let Some((name, arguments)) = reply.tool_call {
                    events.push(Ok(ModelEvent::FunctionCall {
                        call_id: uuid::Uuid::new_v4().to_string(),
                        name,
                        arguments: arguments.to_string(),
                    }));
                }
                events.push(Ok(ModelEvent::Done {
                    credits_used: reply.credits,
                    response_id: None,
                }));
            } else {
                debug!(model = %request.model, "Script exhausted, closing stream");
            }

            let stream: ModelStream = Box::pin(futures_util::stream::iter(events));
            Ok(stream)
        })
    }
}

impl ToolRunner for InProcessPorts {
    fn run_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
        _context: ToolContext,
    ) -> PortFuture<'a, ToolRunOutcome> {
        Box::pin(async move {
            Ok(ToolRunOutcome::Succeeded {
                output: json!({"tool": tool_name, "echo": arguments}),
                credits_used: 1,
            })
        })
    }
}

impl ToolRegistry for InProcessPorts {
    fn tool_definition(&self, name: &str) -> Option<ToolDefinition> {
        self.built_in_definitions()
            .into_iter()
            .find(|d| d.name == name)
    }

    fn built_in_definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "echo".to_string(),
            description: "Echo the given arguments back to the caller".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"message": {"type": "string"}},
            }),
        }]
    }

    fn swarm_tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

impl BillingBus for InProcessPorts {
    fn publish_billing(&self, debit: BillingDebit) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let mut debits = self.debits.lock().await;
            debits.push(debit);
            Ok(())
        })
    }
}

impl LiveChannel for InProcessPorts {
    fn emit_live<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        event: LiveEvent,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut events = self.live_events.lock().await;
            events.push(event);
            Ok(())
        })
    }

    fn has_active_connection<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
    ) -> PortFuture<'a, bool> {
        Box::pin(async move { Ok(*self.connected.lock().await) })
    }
}

impl PushNotifier for InProcessPorts {
    fn push_notify<'a>(
        &'a self,
        user_id: &'a UserId,
        notification: PushNotification,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut pushed = self.notifications.lock().await;
            pushed.push((user_id.clone(), notification));
            Ok(())
        })
    }
}

impl ConversationStore for InProcessPorts {
    fn get_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> PortFuture<'a, Option<ConversationState>> {
        Box::pin(async move {
            let conversations = self.conversations.lock().await;
            Ok(conversations.get(id).cloned())
        })
    }

    fn update_config<'a>(
        &'a self,
        id: &'a ConversationId,
        config: &'a ChatConfig,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut conversations = self.conversations.lock().await;
            let state = conversations.get_mut(id).ok_or_else(|| {
                SwarmError::ConversationNotFound(id.value().to_string())
            })?;
            state.config = config.clone();
            Ok(())
        })
    }
}

impl MessageStore for InProcessPorts {
    fn get_message<'a>(&'a self, id: &'a MessageId) -> PortFuture<'a, Option<MessageState>> {
        Box::pin(async move {
            let store = self.messages.lock().await;
            Ok(store.get(id).cloned())
        })
    }

    fn add_message<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        message: &'a MessageState,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut store = self.messages.lock().await;
            store.insert(message.id.clone(), message.clone());
            drop(store);
            let mut transcript = self.transcript.lock().await;
            transcript.push(message.clone());
            Ok(())
        })
    }
}

impl ResponderStrategy for InProcessPorts {
    /// Everyone responds; real responder selection is a pluggable
    /// concern outside this harness.
    fn select_responders<'a>(
        &'a self,
        state: &'a ConversationState,
        _trigger: &'a MessageState,
    ) -> PortFuture<'a, Vec<BotParticipant>> {
        Box::pin(async move { Ok(state.participants.clone()) })
    }
}

impl AccountDirectory for InProcessPorts {
    fn billing_account<'a>(
        &'a self,
        _state: &'a ConversationState,
    ) -> PortFuture<'a, Option<AccountId>> {
        Box::pin(async move { Ok(self.account.lock().await.clone()) })
    }
}
