#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Dispatch service: the facade the rest of the system talks to. One
//! invocation covers all agents responding to a single trigger (a
//! "round"), run concurrently under one shared cancellation context.

pub mod prompt;
#[cfg(test)]
mod tests;

use crate::budget::{allocate_round, ResponseStats};
use crate::cancel::{CancelReason, CancellationContext};
use crate::config::OrchestratorConfig;
use crate::domain::{
    AuthorId, BotParticipant, BotRole, ChatConfig, ConversationId, ConversationState, MessageId,
    MessageState, PendingId, PendingStatus, SwarmEvent, UserId,
};
use crate::engine::{TurnEngine, TurnRequest, TurnStart};
use crate::error::{code, Result, SwarmError};
use crate::ports::{
    BillingDebit, BotStatusKind, DispatchPorts, LiveEvent, ToolContext, ToolDefinition,
    ToolRunOutcome, UserSession,
};
use futures_util::future::try_join_all;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// An externally triggered user/bot message to respond to
#[derive(Debug, Clone)]
pub struct RespondRequest {
    pub conversation_id: ConversationId,
    pub message_id: MessageId,
    pub acted_by: UserId,
}

pub struct DispatchService<P> {
    ports: Arc<P>,
    engine: TurnEngine<P>,
    settings: OrchestratorConfig,
    /// One cancellation controller per in-flight round, keyed by
    /// conversation.
    active_rounds: Mutex<HashMap<ConversationId, CancellationContext>>,
}

impl<P> DispatchService<P>
where
    P: DispatchPorts + Send + Sync,
{
    pub fn new(ports: Arc<P>, settings: OrchestratorConfig) -> Self {
        Self {
            engine: TurnEngine::new(Arc::clone(&ports), settings.clone()),
            ports,
            settings,
            active_rounds: Mutex::new(HashMap::new()),
        }
    }

    /// Handle an externally triggered message: select responders and
    /// run one dispatch round.
    ///
    /// # Errors
    /// Fails when the conversation, trigger message or billing account
    /// is missing, or when any responder's turn fails.
    pub async fn respond(&self, task: RespondRequest) -> Result<()> {
        let state = self.load_conversation(&task.conversation_id).await?;
        let trigger = self
            .ports
            .get_message(&task.message_id)
            .await?
            .ok_or_else(|| {
                SwarmError::StoreError(format!("Trigger message not found: {}", task.message_id))
            })?;

        let responders = self.ports.select_responders(&state, &trigger).await?;
        self.execute_round(state, trigger.id, responders, &task.acted_by)
            .await
    }

    /// Handle one internal swarm event.
    ///
    /// # Errors
    /// Propagates round failures; the lifecycle drain catches and logs
    /// them so one bad event never corrupts the machine.
    pub async fn handle_internal_event(&self, event: SwarmEvent) -> Result<()> {
        debug!(kind = event.kind(), "Handling internal event");
        match event {
            SwarmEvent::SwarmStarted {
                conversation_id,
                acted_by,
                initial_message,
                ..
            } => {
                let state = self.load_conversation(&conversation_id).await?;
                let trigger = MessageState::system_announcement(
                    initial_message,
                    AuthorId::Human(acted_by.clone()),
                );
                self.ports.add_message(&conversation_id, &trigger).await?;
                let responders = self.ports.select_responders(&state, &trigger).await?;
                self.execute_round(state, trigger.id, responders, &acted_by)
                    .await
            }
            SwarmEvent::ExternalMessage {
                conversation_id,
                acted_by,
                message_id,
            } => {
                self.respond(RespondRequest {
                    conversation_id,
                    message_id,
                    acted_by,
                })
                .await
            }
            SwarmEvent::ToolApproved {
                conversation_id,
                acted_by,
                pending_id,
            } => {
                self.resolve_approval(&conversation_id, &pending_id, &acted_by)
                    .await
            }
            SwarmEvent::ToolRejected {
                conversation_id,
                acted_by,
                pending_id,
                reason,
            } => {
                self.resolve_rejection(&conversation_id, &pending_id, &acted_by, reason)
                    .await
            }
        }
    }

    /// # Errors
    /// Store failures only.
    pub async fn get_conversation_state(
        &self,
        id: &ConversationId,
    ) -> Result<Option<ConversationState>> {
        self.ports.get_conversation(id).await
    }

    /// # Errors
    /// Store failures only.
    pub async fn update_conversation_config(
        &self,
        id: &ConversationId,
        config: &ChatConfig,
    ) -> Result<()> {
        self.ports.update_config(id, config).await
    }

    /// Abort the active turn batch for a conversation, if any. Safe to
    /// call when no round is running.
    pub async fn request_cancellation(&self, conversation_id: &ConversationId) {
        let rounds = self.active_rounds.lock().await;
        match rounds.get(conversation_id) {
            Some(ctx) => {
                info!(conversation = %conversation_id, "Cancelling active round");
                ctx.cancel(CancelReason::Explicit);
            }
            None => {
                warn!(
                    conversation = %conversation_id,
                    "No active cancellation controller for conversation"
                );
            }
        }
    }

    /// Fire-and-forget live-channel emit; failures are logged.
    pub async fn notify(&self, conversation_id: &ConversationId, event: LiveEvent) {
        if let Err(e) = self.ports.emit_live(conversation_id, event).await {
            debug!("Live notification failed: {e}");
        }
    }

    async fn load_conversation(&self, id: &ConversationId) -> Result<ConversationState> {
        self.ports
            .get_conversation(id)
            .await?
            .ok_or_else(|| SwarmError::ConversationNotFound(id.value().to_string()))
    }

    /// The shared round algorithm: budget, fan out concurrently,
    /// persist, aggregate. One failed turn fails the whole round, a
    /// deliberate simplicity-over-availability choice.
    async fn execute_round(
        &self,
        mut state: ConversationState,
        trigger_id: MessageId,
        responders: Vec<BotParticipant>,
        acted_by: &UserId,
    ) -> Result<()> {
        let conversation_id = state.id.clone();

        // Billing correctness is a hard precondition, not best-effort.
        let account = self
            .ports
            .billing_account(&state)
            .await?
            .ok_or_else(|| SwarmError::BillingAccountMissing(conversation_id.value().to_string()))?;

        let tools = self.resolve_tools(&state);

        if responders.is_empty() {
            info!(conversation = %conversation_id, "No responders selected, nothing to do");
            return Ok(());
        }

        let stats_snapshot = state.config.stats_mut().clone();
        let allocation = allocate_round(&stats_snapshot, &state.config.limits, responders.len());
        info!(
            conversation = %conversation_id,
            responders = responders.len(),
            tool_calls_per_bot = allocation.tool_calls,
            credits_per_bot = %allocation.credits,
            "Dispatching round"
        );

        let cancel = CancellationContext::new();
        {
            let mut rounds = self.active_rounds.lock().await;
            rounds.insert(conversation_id.clone(), cancel.clone());
        }
        let timer = state
            .config
            .limits
            .max_turn_duration_ms
            .filter(|ms| *ms > 0)
            .map(|ms| cancel.arm_timeout(Duration::from_millis(ms)));

        let shared_config = Arc::new(Mutex::new(state.config.clone()));
        let session = Some(UserSession {
            user_id: acted_by.clone(),
            meta: serde_json::Value::Null,
        });

        let turns = responders.iter().map(|bot| {
            self.engine.run_turn(TurnRequest {
                start: TurnStart::Continuation(trigger_id.clone()),
                system_prompt: prompt::render_system_prompt(&state, bot, &tools),
                tools: tools.clone(),
                bot: bot.clone(),
                account_id: account.clone(),
                conversation_id: conversation_id.clone(),
                config: Arc::clone(&shared_config),
                allocation,
                session: session.clone(),
                cancel: cancel.clone(),
            })
        });
        let round_result = try_join_all(turns).await;

        // Release the controller registration and timer whether or not
        // the round succeeded.
        if let Some(handle) = timer {
            handle.abort();
        }
        {
            let mut rounds = self.active_rounds.lock().await;
            rounds.remove(&conversation_id);
        }

        let outputs = round_result?;

        for output in &outputs {
            self.ports
                .add_message(&conversation_id, &output.message)
                .await?;
        }

        // Cumulative stats are mutated only after every agent in the
        // round has completed.
        let updated_config = {
            let mut config = shared_config.lock().await;
            for output in &outputs {
                config.stats_mut().record_round(&output.stats);
            }
            config.clone()
        };
        self.ports
            .update_config(&conversation_id, &updated_config)
            .await?;

        Ok(())
    }

    /// Resolve full tool definitions for the configured names. Unknown
    /// names are dropped with a warning, not a failure.
    fn resolve_tools(&self, state: &ConversationState) -> Vec<ToolDefinition> {
        state
            .available_tools
            .iter()
            .filter_map(|name| {
                let definition = self.ports.tool_definition(name);
                if definition.is_none() {
                    warn!(tool = %name, "Tool no longer present in registry, dropping");
                }
                definition
            })
            .collect()
    }

    async fn resolve_approval(
        &self,
        conversation_id: &ConversationId,
        pending_id: &PendingId,
        acted_by: &UserId,
    ) -> Result<()> {
        let mut state = self.load_conversation(conversation_id).await?;
        let account = self
            .ports
            .billing_account(&state)
            .await?
            .ok_or_else(|| SwarmError::BillingAccountMissing(conversation_id.value().to_string()))?;

        let idx = Self::find_pending(&state, pending_id)?;
        state.config.pending_tool_calls[idx].transition(PendingStatus::Executing)?;
        let entry = state.config.pending_tool_calls[idx].clone();

        let arguments: serde_json::Value =
            serde_json::from_str(&entry.tool_arguments).unwrap_or_else(|_| json!({}));
        let outcome = self
            .ports
            .run_tool(
                &entry.tool_name,
                arguments,
                ToolContext {
                    conversation_id: conversation_id.clone(),
                    caller_bot_id: entry.caller_bot_id.clone(),
                    session: Some(UserSession {
                        user_id: acted_by.clone(),
                        meta: serde_json::Value::Null,
                    }),
                    cancel: CancellationContext::new(),
                },
            )
            .await?;

        // Cost is charged at actual execution time, not deferral time.
        let cost = outcome.credits_used();
        let payload = match &outcome {
            ToolRunOutcome::Succeeded { output, .. } => {
                state.config.pending_tool_calls[idx].resolve_executed(
                    Ok(output.clone()),
                    cost,
                    acted_by.clone(),
                )?;
                json!({
                    "success": true,
                    "pending_id": pending_id.value(),
                    "tool": entry.tool_name,
                    "output": output,
                })
            }
            ToolRunOutcome::Failed { code, message, .. } => {
                state.config.pending_tool_calls[idx].resolve_executed(
                    Err(format!("{code}: {message}")),
                    cost,
                    acted_by.clone(),
                )?;
                json!({
                    "success": false,
                    "pending_id": pending_id.value(),
                    "tool": entry.tool_name,
                    "error": {"code": code, "message": message},
                })
            }
        };

        state.config.stats_mut().record_round(&ResponseStats {
            tool_calls: 0,
            credits_used: cost,
        });
        if cost > 0 {
            let debit = BillingDebit::for_credits(
                account,
                cost,
                "swarm:approved_tool",
                json!({
                    "conversation_id": conversation_id.value(),
                    "pending_id": pending_id.value(),
                    "tool": entry.tool_name,
                }),
            );
            if let Err(e) = self.ports.publish_billing(debit).await {
                error!(pending_id = %pending_id, "Failed to publish billing debit: {e}");
            }
        }
        self.ports
            .update_config(conversation_id, &state.config)
            .await?;

        self.reengage_caller(state, &entry.caller_bot_id, &payload, acted_by)
            .await;
        Ok(())
    }

    async fn resolve_rejection(
        &self,
        conversation_id: &ConversationId,
        pending_id: &PendingId,
        acted_by: &UserId,
        reason: Option<String>,
    ) -> Result<()> {
        let mut state = self.load_conversation(conversation_id).await?;

        let idx = Self::find_pending(&state, pending_id)?;
        state.config.pending_tool_calls[idx].resolve_rejected(reason.clone(), acted_by.clone())?;
        let entry = state.config.pending_tool_calls[idx].clone();

        self.notify(
            conversation_id,
            LiveEvent::ToolApprovalRejected {
                pending_id: pending_id.clone(),
                reason: reason.clone(),
            },
        )
        .await;

        self.ports
            .update_config(conversation_id, &state.config)
            .await?;

        let payload = json!({
            "success": false,
            "pending_id": pending_id.value(),
            "tool": entry.tool_name,
            "error": {
                "code": code::USER_REJECTED,
                "message": reason.unwrap_or_else(|| "Tool call rejected by user".to_string()),
            },
        });
        self.reengage_caller(state, &entry.caller_bot_id, &payload, acted_by)
            .await;
        Ok(())
    }

    /// Seed the original calling agent with the decision outcome so it
    /// can continue reasoning. Failures are reported via status event,
    /// never propagated out of the event handler.
    async fn reengage_caller(
        &self,
        state: ConversationState,
        caller_bot_id: &crate::domain::BotId,
        payload: &serde_json::Value,
        acted_by: &UserId,
    ) {
        let conversation_id = state.id.clone();
        let caller = state.participant(caller_bot_id).cloned().unwrap_or_else(|| {
            warn!(bot = %caller_bot_id, "Caller no longer a participant, synthesizing worker");
            BotParticipant::new(caller_bot_id.clone(), caller_bot_id.value(), BotRole::Worker)
        });

        let result = async {
            let message = MessageState::tool_result(caller_bot_id, None, payload);
            self.ports.add_message(&conversation_id, &message).await?;
            self.execute_round(state, message.id, vec![caller.clone()], acted_by)
                .await
        }
        .await;

        if let Err(e) = result {
            error!(
                bot = %caller_bot_id,
                conversation = %conversation_id,
                "Re-engagement after tool decision failed: {e}"
            );
            self.notify(
                &conversation_id,
                LiveEvent::BotStatus {
                    bot_id: caller.id,
                    status: BotStatusKind::ReengagementFailed,
                    detail: json!({"error": e.to_string(), "code": e.code()}),
                },
            )
            .await;
        }
    }

    fn find_pending(state: &ConversationState, pending_id: &PendingId) -> Result<usize> {
        state
            .config
            .pending_tool_calls
            .iter()
            .position(|e| &e.pending_id == pending_id)
            .ok_or_else(|| SwarmError::PendingCallNotFound(pending_id.value().to_string()))
    }
}
