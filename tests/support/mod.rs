#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;
use swarm::harness::InProcessPorts;
use swarm::{
    AccountId, BotId, BotParticipant, BotRole, ChatConfig, ConversationId, ConversationState,
    DispatchService, OrchestratorConfig, SwarmLifecycle, UserId,
};

pub const LEADER_MODEL: &str = "scripted-leader";
pub const WORKER_MODEL: &str = "scripted-worker";

pub fn leader() -> BotParticipant {
    BotParticipant::new(BotId::new("bot-leader"), "Leader", BotRole::Leader)
        .with_model(LEADER_MODEL)
}

pub fn worker() -> BotParticipant {
    BotParticipant::new(BotId::new("bot-worker"), "Worker", BotRole::Worker)
        .with_model(WORKER_MODEL)
}

pub fn user() -> UserId {
    UserId::new("user-1")
}

pub fn conversation_id() -> ConversationId {
    ConversationId::new("conv-flow")
}

pub fn conversation(goal: &str, participants: Vec<BotParticipant>) -> ConversationState {
    ConversationState {
        id: conversation_id(),
        participants,
        available_tools: vec!["echo".to_string()],
        config: ChatConfig::for_goal(goal),
        initial_leader_system_message: None,
    }
}

pub async fn swarm_for(
    ports: &InProcessPorts,
    state: ConversationState,
) -> Arc<SwarmLifecycle<InProcessPorts>> {
    ports.set_account(AccountId::new("acct-flow")).await;
    ports.insert_conversation(state).await;
    let dispatch = Arc::new(DispatchService::new(
        Arc::new(ports.clone()),
        OrchestratorConfig::default(),
    ));
    Arc::new(SwarmLifecycle::new(dispatch, conversation_id()))
}

/// Poll until the scripted conversation has produced the expected
/// number of persisted messages and the machine has parked back to
/// `Idle` (meaning config/stats persistence for the round is done too).
pub async fn settle(
    ports: &InProcessPorts,
    lc: &Arc<SwarmLifecycle<InProcessPorts>>,
    expected_messages: usize,
) {
    for _ in 0..500 {
        if ports.transcript().await.len() >= expected_messages
            && lc.current_saga_status().await == swarm::SagaStatus::Idle
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let transcript = ports.transcript().await;
    panic!(
        "conversation stalled at {} of {expected_messages} messages: {:?}",
        transcript.len(),
        transcript.iter().map(|m| m.text.clone()).collect::<Vec<_>>()
    );
}
