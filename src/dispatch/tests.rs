#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use super::{DispatchService, RespondRequest};
use crate::config::OrchestratorConfig;
use crate::domain::{
    AccountId, AuthorId, BotId, BotParticipant, BotRole, ChatConfig, ConversationId,
    ConversationState, MessageId, MessageRole, MessageState, PendingStatus, PendingToolCallEntry,
    SwarmEvent, UserId,
};
use crate::error::SwarmError;
use crate::ports::{
    AccountDirectory, BillingBus, BillingDebit, ContextBuilder, ContextOptions, ContextWindow, ConversationStore,
    DispatchPorts, LiveChannel, LiveEvent, MessageStore, ModelEvent, ModelRequest, ModelRouter,
    ModelStream, PortFuture, PushNotification, PushNotifier, ResponderStrategy, ToolContext,
    ToolDefinition, ToolRegistry, ToolRunOutcome, ToolRunner,
};
use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone, Default)]
struct FakePorts {
    conversation: Arc<Mutex<Option<ConversationState>>>,
    messages: Arc<Mutex<HashMap<MessageId, MessageState>>>,
    added_messages: Arc<Mutex<Vec<MessageState>>>,
    updated_configs: Arc<Mutex<Vec<ChatConfig>>>,
    responders: Arc<Mutex<Vec<BotParticipant>>>,
    account: Arc<Mutex<Option<AccountId>>>,
    scripts: Arc<Mutex<VecDeque<Vec<ModelEvent>>>>,
    model_requests: Arc<Mutex<Vec<ModelRequest>>>,
    fail_streams: Arc<Mutex<bool>>,
    tool_outcome: Arc<Mutex<Option<ToolRunOutcome>>>,
    tool_calls: Arc<Mutex<Vec<(String, serde_json::Value)>>>,
    debits: Arc<Mutex<Vec<BillingDebit>>>,
    live_events: Arc<Mutex<Vec<LiveEvent>>>,
}

impl FakePorts {
    fn new() -> Self {
        Self::default()
    }

    async fn with_conversation(self, state: ConversationState) -> Self {
        let mut current = self.conversation.lock().await;
        *current = Some(state);
        drop(current);
        self
    }

    async fn with_account(self, account: AccountId) -> Self {
        let mut current = self.account.lock().await;
        *current = Some(account);
        drop(current);
        self
    }

    async fn with_responders(self, responders: Vec<BotParticipant>) -> Self {
        let mut current = self.responders.lock().await;
        *current = responders;
        drop(current);
        self
    }

    async fn with_message(self, message: MessageState) -> Self {
        let mut store = self.messages.lock().await;
        store.insert(message.id.clone(), message);
        drop(store);
        self
    }

    async fn with_script(self, events: Vec<ModelEvent>) -> Self {
        let mut scripts = self.scripts.lock().await;
        scripts.push_back(events);
        drop(scripts);
        self
    }

    async fn with_stream_failure(self, fail: bool) -> Self {
        let mut current = self.fail_streams.lock().await;
        *current = fail;
        drop(current);
        self
    }

    async fn with_tool_outcome(self, outcome: ToolRunOutcome) -> Self {
        let mut current = self.tool_outcome.lock().await;
        *current = Some(outcome);
        drop(current);
        self
    }
}

impl ContextBuilder for FakePorts {
    fn build_context<'a>(
        &'a self,
        _conversation_id: &'a ConversationId,
        bot: &'a BotParticipant,
        _model_hint: &'a str,
        start_message: &'a MessageId,
        _opts: ContextOptions,
    ) -> PortFuture<'a, ContextWindow> {
        Box::pin(async move {
            let store = self.messages.lock().await;
            let trigger = store.get(start_message).cloned();
            drop(store);
            Ok(ContextWindow {
                messages: vec![trigger.unwrap_or_else(|| {
                    MessageState::standalone_prompt(
                        "empty window",
                        AuthorId::Bot(bot.id.clone()),
                    )
                })],
            })
        })
    }
}

impl ModelRouter for FakePorts {
    fn open_stream(&self, request: ModelRequest) -> PortFuture<'_, ModelStream> {
        Box::pin(async move {
            if *self.fail_streams.lock().await {
                return Err(SwarmError::ModelError("simulated stream failure".to_string()));
            }
            let mut requests = self.model_requests.lock().await;
            requests.push(request);
            drop(requests);

            let mut scripts = self.scripts.lock().await;
            let events = scripts.pop_front().unwrap_or_default();
            drop(scripts);

            let stream: ModelStream =
                Box::pin(futures_util::stream::iter(events.into_iter().map(Ok)));
            Ok(stream)
        })
    }
}

impl ToolRunner for FakePorts {
    fn run_tool<'a>(
        &'a self,
        tool_name: &'a str,
        arguments: serde_json::Value,
        _context: ToolContext,
    ) -> PortFuture<'a, ToolRunOutcome> {
        Box::pin(async move {
            let mut calls = self.tool_calls.lock().await;
            calls.push((tool_name.to_string(), arguments));
            drop(calls);
            let outcome = self.tool_outcome.lock().await.clone();
            Ok(outcome.unwrap_or(ToolRunOutcome::Succeeded {
                output: json!({"ok": true}),
                credits_used: 0,
            }))
        })
    }
}

impl ToolRegistry for FakePorts {
    fn tool_definition(&self, name: &str) -> Option<ToolDefinition> {
        (name != "vanished_tool").then(|| ToolDefinition {
            name: name.to_string(),
            description: format!("fake tool {name}"),
            parameters: json!({"type": "object"}),
        })
    }

    fn built_in_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }

    fn swarm_tool_definitions(&self) -> Vec<ToolDefinition> {
        Vec::new()
    }
}

impl BillingBus for FakePorts {
    fn publish_billing(&self, debit: BillingDebit) -> PortFuture<'_, ()> {
        Box::pin(async move {
            let mut debits = self.debits.lock().await;
            debits.push(debit);
            Ok(())
        })
    }
}

impl LiveChannel for FakePorts {
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
        Box::pin(async move { Ok(true) })
    }
}

impl PushNotifier for FakePorts {
    fn push_notify<'a>(
        &'a self,
        _user_id: &'a UserId,
        _notification: PushNotification,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move { Ok(()) })
    }
}

impl ConversationStore for FakePorts {
    fn get_conversation<'a>(
        &'a self,
        id: &'a ConversationId,
    ) -> PortFuture<'a, Option<ConversationState>> {
        Box::pin(async move {
            let current = self.conversation.lock().await;
            Ok(current.clone().filter(|s| &s.id == id))
        })
    }

    fn update_config<'a>(
        &'a self,
        _id: &'a ConversationId,
        config: &'a ChatConfig,
    ) -> PortFuture<'a, ()> {
        Box::pin(async move {
            let mut updates = self.updated_configs.lock().await;
            updates.push(config.clone());
            drop(updates);
            let mut current = self.conversation.lock().await;
            if let Some(state) = current.as_mut() {
                state.config = config.clone();
            }
            Ok(())
        })
    }
}

impl MessageStore for FakePorts {
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
            let mut added = self.added_messages.lock().await;
            added.push(message.clone());
            Ok(())
        })
    }
}

impl ResponderStrategy for FakePorts {
    fn select_responders<'a>(
        &'a self,
        _state: &'a ConversationState,
        _trigger: &'a MessageState,
    ) -> PortFuture<'a, Vec<BotParticipant>> {
        Box::pin(async move { Ok(self.responders.lock().await.clone()) })
    }
}

impl AccountDirectory for FakePorts {
    fn billing_account<'a>(
        &'a self,
        _state: &'a ConversationState,
    ) -> PortFuture<'a, Option<AccountId>> {
        Box::pin(async move { Ok(self.account.lock().await.clone()) })
    }
}

fn assert_ports_contract<T: DispatchPorts>() {}

fn leader() -> BotParticipant {
    assert_ports_contract::<FakePorts>();
    BotParticipant::new(BotId::new("bot-leader"), "Leader", BotRole::Leader)
}

fn worker() -> BotParticipant {
    BotParticipant::new(BotId::new("bot-worker"), "Worker", BotRole::Worker)
}

fn conversation_with(participants: Vec<BotParticipant>) -> ConversationState {
    ConversationState {
        id: ConversationId::new("conv-1"),
        participants,
        available_tools: vec!["search".to_string()],
        config: ChatConfig::for_goal("ship the feature"),
        initial_leader_system_message: None,
    }
}

fn user() -> UserId {
    UserId::new("user-1")
}

fn message_script(text: &str, credits: i128) -> Vec<ModelEvent> {
    vec![
        ModelEvent::Message {
            delta: text.to_string(),
            response_id: None,
        },
        ModelEvent::Done {
            credits_used: credits,
            response_id: None,
        },
    ]
}

fn service(ports: FakePorts) -> DispatchService<FakePorts> {
    DispatchService::new(Arc::new(ports), OrchestratorConfig::default())
}

fn trigger_message() -> MessageState {
    MessageState::standalone_prompt("please start", AuthorId::Human(user()))
}

#[tokio::test]
async fn respond_fails_when_conversation_is_missing() {
    let ports = FakePorts::new();
    let svc = service(ports);

    let result = svc
        .respond(RespondRequest {
            conversation_id: ConversationId::new("conv-missing"),
            message_id: MessageId::generate(),
            acted_by: user(),
        })
        .await;

    assert!(matches!(result, Err(SwarmError::ConversationNotFound(_))));
}

#[tokio::test]
async fn respond_fails_hard_without_a_billing_account() {
    let trigger = trigger_message();
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader()]))
        .await
        .with_message(trigger.clone())
        .await
        .with_responders(vec![leader()])
        .await;
    let svc = service(ports.clone());

    let result = svc
        .respond(RespondRequest {
            conversation_id: ConversationId::new("conv-1"),
            message_id: trigger.id,
            acted_by: user(),
        })
        .await;

    assert!(matches!(result, Err(SwarmError::BillingAccountMissing(_))));
    assert!(ports.model_requests.lock().await.is_empty());
}

#[tokio::test]
async fn respond_with_no_responders_is_a_quiet_no_op() {
    let trigger = trigger_message();
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader()]))
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_message(trigger.clone())
        .await;
    let svc = service(ports.clone());

    svc.respond(RespondRequest {
        conversation_id: ConversationId::new("conv-1"),
        message_id: trigger.id,
        acted_by: user(),
    })
    .await
    .expect("empty round should succeed");

    assert!(ports.model_requests.lock().await.is_empty());
    assert!(ports.added_messages.lock().await.is_empty());
}

#[tokio::test]
async fn respond_persists_one_reply_per_responder_and_aggregates_stats() {
    let trigger = trigger_message();
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader(), worker()]))
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_responders(vec![leader(), worker()])
        .await
        .with_message(trigger.clone())
        .await
        .with_script(message_script("On it.", 10))
        .await
        .with_script(message_script("Starting now.", 15))
        .await;
    let svc = service(ports.clone());

    svc.respond(RespondRequest {
        conversation_id: ConversationId::new("conv-1"),
        message_id: trigger.id,
        acted_by: user(),
    })
    .await
    .expect("round should succeed");

    let added = ports.added_messages.lock().await.clone();
    assert_eq!(added.len(), 2);
    assert!(added
        .iter()
        .all(|m| m.config.role == Some(MessageRole::Assistant)));

    // Cumulative usage only moves once, after the whole round.
    let updates = ports.updated_configs.lock().await.clone();
    assert_eq!(updates.len(), 1);
    let stats = updates[0].stats.clone().expect("stats initialized");
    assert_eq!(stats.total_credits, 25);
    assert!(stats.last_processing_cycle_ended_at.is_some());
}

#[tokio::test]
async fn round_budget_is_split_across_responders() {
    let trigger = trigger_message();
    let mut state = conversation_with(vec![leader(), worker()]);
    state.config.limits.max_credits = 100;
    state.config.limits.per_response.max_credits = 1_000_000;
    let ports = FakePorts::new()
        .with_conversation(state)
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_responders(vec![leader(), worker()])
        .await
        .with_message(trigger.clone())
        .await
        .with_script(message_script("a", 0))
        .await
        .with_script(message_script("b", 0))
        .await;
    let svc = service(ports.clone());

    svc.respond(RespondRequest {
        conversation_id: ConversationId::new("conv-1"),
        message_id: trigger.id,
        acted_by: user(),
    })
    .await
    .expect("round should succeed");

    let requests = ports.model_requests.lock().await;
    assert_eq!(requests.len(), 2);
    // 100 remaining credits over two agents.
    assert!(requests.iter().all(|r| r.max_credits == 50));
}

#[tokio::test]
async fn one_failed_turn_fails_the_whole_round_and_persists_nothing() {
    let trigger = trigger_message();
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader(), worker()]))
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_responders(vec![leader(), worker()])
        .await
        .with_message(trigger.clone())
        .await
        .with_stream_failure(true)
        .await;
    let svc = service(ports.clone());

    let result = svc
        .respond(RespondRequest {
            conversation_id: ConversationId::new("conv-1"),
            message_id: trigger.id,
            acted_by: user(),
        })
        .await;

    assert!(matches!(result, Err(SwarmError::ModelError(_))));
    assert!(ports.added_messages.lock().await.is_empty());
    assert!(ports.updated_configs.lock().await.is_empty());
}

#[tokio::test]
async fn vanished_tools_are_dropped_from_the_catalog_not_fatal() {
    let trigger = trigger_message();
    let mut state = conversation_with(vec![leader()]);
    state.available_tools = vec!["search".to_string(), "vanished_tool".to_string()];
    let ports = FakePorts::new()
        .with_conversation(state)
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_responders(vec![leader()])
        .await
        .with_message(trigger.clone())
        .await
        .with_script(message_script("ok", 0))
        .await;
    let svc = service(ports.clone());

    svc.respond(RespondRequest {
        conversation_id: ConversationId::new("conv-1"),
        message_id: trigger.id,
        acted_by: user(),
    })
    .await
    .expect("round should succeed");

    let requests = ports.model_requests.lock().await;
    assert_eq!(requests[0].tools.len(), 1);
    assert_eq!(requests[0].tools[0].name, "search");
}

#[tokio::test]
async fn swarm_started_event_persists_the_kickoff_announcement() {
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader()]))
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_responders(vec![leader()])
        .await
        .with_script(message_script("Understood, decomposing.", 5))
        .await;
    let svc = service(ports.clone());

    svc.handle_internal_event(SwarmEvent::SwarmStarted {
        conversation_id: ConversationId::new("conv-1"),
        acted_by: user(),
        goal: "ship the feature".to_string(),
        initial_message: "Swarm started. Goal: ship the feature".to_string(),
    })
    .await
    .expect("event should be handled");

    let added = ports.added_messages.lock().await.clone();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].config.role, Some(MessageRole::System));
    assert!(added[0].text.contains("Swarm started"));
    assert_eq!(added[1].config.role, Some(MessageRole::Assistant));
}

fn pending_entry(conversation: &ConversationState, caller: &BotParticipant) -> PendingToolCallEntry {
    PendingToolCallEntry::awaiting_approval(
        conversation.id.clone(),
        caller.id.clone(),
        "call-1",
        "delete_repo",
        json!({"repo": "main"}).to_string(),
        Some(user()),
        Utc::now() + Duration::minutes(5),
    )
}

#[tokio::test]
async fn approval_executes_the_tool_and_reengages_the_caller() {
    let mut state = conversation_with(vec![leader()]);
    let entry = pending_entry(&state, &leader());
    let pending_id = entry.pending_id.clone();
    state.config.pending_tool_calls.push(entry);

    let ports = FakePorts::new()
        .with_conversation(state)
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_tool_outcome(ToolRunOutcome::Succeeded {
            output: json!({"deleted": true}),
            credits_used: 7,
        })
        .await
        // Re-engagement turn for the caller.
        .with_script(message_script("Repo removed, moving on.", 0))
        .await;
    let svc = service(ports.clone());

    svc.handle_internal_event(SwarmEvent::ToolApproved {
        conversation_id: ConversationId::new("conv-1"),
        acted_by: user(),
        pending_id: pending_id.clone(),
    })
    .await
    .expect("approval should succeed");

    let calls = ports.tool_calls.lock().await.clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, "delete_repo");
    assert_eq!(calls[0].1, json!({"repo": "main"}));

    let updates = ports.updated_configs.lock().await.clone();
    let resolved = updates[0]
        .pending_tool_calls
        .iter()
        .find(|e| e.pending_id == pending_id)
        .expect("entry kept for audit");
    assert_eq!(resolved.status, PendingStatus::Completed);
    assert_eq!(resolved.cost, Some(7));
    assert_eq!(resolved.decided_by, Some(user()));
    assert_eq!(resolved.execution_attempts, 1);

    let debits = ports.debits.lock().await.clone();
    assert_eq!(debits.len(), 1);
    assert_eq!(debits[0].delta, "-7");
    assert_eq!(debits[0].source, "swarm:approved_tool");

    // Tool-result message then the caller's fresh reply.
    let added = ports.added_messages.lock().await.clone();
    assert_eq!(added.len(), 2);
    assert_eq!(added[0].config.role, Some(MessageRole::Tool));
    assert!(added[0].text.contains("\"success\":true"));
    assert_eq!(added[1].text, "Repo removed, moving on.");
}

#[tokio::test]
async fn rejection_resolves_the_entry_without_running_the_tool() {
    let mut state = conversation_with(vec![leader()]);
    let entry = pending_entry(&state, &leader());
    let pending_id = entry.pending_id.clone();
    state.config.pending_tool_calls.push(entry);

    let ports = FakePorts::new()
        .with_conversation(state)
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_script(message_script("Understood, skipping that.", 0))
        .await;
    let svc = service(ports.clone());

    svc.handle_internal_event(SwarmEvent::ToolRejected {
        conversation_id: ConversationId::new("conv-1"),
        acted_by: user(),
        pending_id: pending_id.clone(),
        reason: Some("too risky".to_string()),
    })
    .await
    .expect("rejection should succeed");

    assert!(ports.tool_calls.lock().await.is_empty());
    assert!(ports.debits.lock().await.is_empty());

    let updates = ports.updated_configs.lock().await.clone();
    let resolved = updates[0]
        .pending_tool_calls
        .iter()
        .find(|e| e.pending_id == pending_id)
        .expect("entry kept for audit");
    assert_eq!(resolved.status, PendingStatus::Rejected);
    assert_eq!(resolved.status_reason, Some("too risky".to_string()));

    let added = ports.added_messages.lock().await.clone();
    assert!(added[0].text.contains("USER_REJECTED"));
    assert!(added[0].text.contains("too risky"));

    let events = ports.live_events.lock().await.clone();
    assert!(events
        .iter()
        .any(|e| matches!(e, LiveEvent::ToolApprovalRejected { .. })));
}

#[tokio::test]
async fn approval_for_an_unknown_pending_id_fails() {
    let ports = FakePorts::new()
        .with_conversation(conversation_with(vec![leader()]))
        .await
        .with_account(AccountId::new("acct-1"))
        .await;
    let svc = service(ports);

    let result = svc
        .handle_internal_event(SwarmEvent::ToolApproved {
            conversation_id: ConversationId::new("conv-1"),
            acted_by: user(),
            pending_id: crate::domain::PendingId::generate(),
        })
        .await;

    assert!(matches!(result, Err(SwarmError::PendingCallNotFound(_))));
}

#[tokio::test]
async fn cancellation_with_no_active_round_is_harmless() {
    let ports = FakePorts::new();
    let svc = service(ports);

    // Nothing is running; this must neither panic nor deadlock.
    svc.request_cancellation(&ConversationId::new("conv-1")).await;
}

#[tokio::test]
async fn reengagement_failure_is_reported_not_propagated() {
    let mut state = conversation_with(vec![leader()]);
    let entry = pending_entry(&state, &leader());
    let pending_id = entry.pending_id.clone();
    state.config.pending_tool_calls.push(entry);

    // No script and failing streams: the re-engagement round errors,
    // the approval itself must still succeed.
    let ports = FakePorts::new()
        .with_conversation(state)
        .await
        .with_account(AccountId::new("acct-1"))
        .await
        .with_stream_failure(true)
        .await;
    let svc = service(ports.clone());

    svc.handle_internal_event(SwarmEvent::ToolApproved {
        conversation_id: ConversationId::new("conv-1"),
        acted_by: user(),
        pending_id,
    })
    .await
    .expect("approval must survive a failed re-engagement");

    let events = ports.live_events.lock().await.clone();
    assert!(events.iter().any(|e| matches!(
        e,
        LiveEvent::BotStatus {
            status: crate::ports::BotStatusKind::ReengagementFailed,
            ..
        }
    )));
}
