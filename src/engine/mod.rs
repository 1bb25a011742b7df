#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Turn engine: executes one agent's reasoning loop for one
//! invocation. Streams the model response, dispatches tool calls
//! (immediately or deferred), tracks cumulative cost against the
//! allocated ceiling, and always bills partial work.

mod deferral;

use crate::budget::{ResponseStats, TurnAllocation};
use crate::cancel::CancellationContext;
use crate::config::OrchestratorConfig;
use crate::domain::{
    AccountId, AuthorId, BotParticipant, ChatConfig, ConversationId, MessageId, MessageState,
    PerResponseLimits, ToolCallRecord,
};
use crate::error::Result;
use crate::ports::{
    BillingDebit, ContextOptions, LiveEvent, ModelEvent, ModelRequest, ToolDefinition, TurnPorts,
    UserSession,
};
use futures_util::StreamExt;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Where a turn picks up from
#[derive(Debug, Clone)]
pub enum TurnStart {
    /// Continue from a stored message; the context builder assembles
    /// the prompt window.
    Continuation(MessageId),
    /// Standalone text prompt wrapped in a synthetic single message.
    Prompt(String),
}

/// Everything one turn invocation needs
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub start: TurnStart,
    pub system_prompt: String,
    pub tools: Vec<ToolDefinition>,
    pub bot: BotParticipant,
    pub account_id: AccountId,
    pub conversation_id: ConversationId,
    /// Shared within the round; turns append pending tool calls here.
    pub config: Arc<Mutex<ChatConfig>>,
    pub allocation: TurnAllocation,
    pub session: Option<UserSession>,
    pub cancel: CancellationContext,
}

#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub message: MessageState,
    pub stats: ResponseStats,
}

pub struct TurnEngine<P> {
    ports: Arc<P>,
    settings: OrchestratorConfig,
}

impl<P> TurnEngine<P>
where
    P: TurnPorts + Send + Sync,
{
    pub const fn new(ports: Arc<P>, settings: OrchestratorConfig) -> Self {
        Self { ports, settings }
    }

    /// Run one turn to completion.
    ///
    /// # Errors
    /// Returns `Cancelled`/`TimedOut` when the shared token fires
    /// (including before any work began), or a port failure. Billing
    /// for credits consumed so far and the typing-stopped signal are
    /// emitted regardless of outcome.
    pub async fn run_turn(&self, request: TurnRequest) -> Result<TurnOutput> {
        if request.cancel.is_cancelled() {
            return Err(request.cancel.as_error());
        }

        let mut stats = ResponseStats::default();
        let mut records: Vec<ToolCallRecord> = Vec::new();
        let mut draft = String::new();

        let result = self
            .run_loop(&request, &mut stats, &mut records, &mut draft)
            .await;

        self.finalize(&request, &stats).await;

        match result {
            Ok(()) => {
                info!(
                    bot = %request.bot.id,
                    tool_calls = stats.tool_calls,
                    credits = %stats.credits_used,
                    "Turn completed"
                );
                Ok(TurnOutput {
                    message: MessageState::bot_reply(&request.bot.id, draft, records),
                    stats,
                })
            }
            Err(e) => {
                let emit = self.ports.emit_live(
                    &request.conversation_id,
                    LiveEvent::StreamError {
                        bot_id: Some(request.bot.id.clone()),
                        code: e.code().to_string(),
                        message: e.to_string(),
                    },
                );
                if let Err(emit_err) = emit.await {
                    debug!("Failed to emit stream error event: {emit_err}");
                }
                Err(e)
            }
        }
    }

    async fn run_loop(
        &self,
        request: &TurnRequest,
        stats: &mut ResponseStats,
        records: &mut Vec<ToolCallRecord>,
        draft: &mut String,
    ) -> Result<()> {
        let per_response: PerResponseLimits =
            { request.config.lock().await.limits.per_response };

        let mut inputs = self.initial_inputs(request).await?;
        let mut previous_response_id: Option<String> = None;
        let mut iteration = 0u32;

        while !inputs.is_empty() {
            if request.allocation.is_exhausted(stats, &per_response) {
                debug!(bot = %request.bot.id, "Allocation exhausted, ending turn");
                break;
            }
            if iteration >= self.settings.max_turn_iterations {
                warn!(
                    bot = %request.bot.id,
                    iterations = iteration,
                    "Turn iteration cap reached"
                );
                break;
            }
            iteration += 1;
            request.cancel.guard()?;

            let ceiling = request
                .allocation
                .effective_credit_ceiling(stats, &per_response);
            let model_request = ModelRequest {
                model: self.model_for(&request.bot),
                previous_response_id: previous_response_id.clone(),
                input: std::mem::take(&mut inputs),
                tools: request.tools.clone(),
                parallel_tool_calls: true,
                system_message: request.system_prompt.clone(),
                session: request.session.clone(),
                max_credits: ceiling,
                cancel: request.cancel.clone(),
            };

            let mut stream = self.ports.open_stream(model_request).await?;
            request.cancel.guard()?;

            let mut next_inputs: Vec<MessageState> = Vec::new();
            while let Some(event) = stream.next().await {
                request.cancel.guard()?;
                match event? {
                    ModelEvent::Message { delta, response_id } => {
                        draft.push_str(&delta);
                        if let Some(rid) = response_id {
                            previous_response_id = Some(rid);
                        }
                        self.forward_live(
                            request,
                            LiveEvent::ResponseStream {
                                bot_id: request.bot.id.clone(),
                                delta,
                            },
                        )
                        .await;
                    }
                    ModelEvent::Reasoning { delta } => {
                        // Forwarded live, never accumulated.
                        self.forward_live(
                            request,
                            LiveEvent::ReasoningStream {
                                bot_id: request.bot.id.clone(),
                                delta,
                            },
                        )
                        .await;
                    }
                    ModelEvent::FunctionCall {
                        call_id,
                        name,
                        arguments,
                    } => {
                        stats.add_tool_call();
                        let (record, result_message) = deferral::dispatch_tool_call(
                            self.ports.as_ref(),
                            &self.settings,
                            request,
                            &call_id,
                            &name,
                            &arguments,
                            stats,
                        )
                        .await?;
                        records.push(record);
                        next_inputs.push(result_message);
                    }
                    ModelEvent::Done {
                        credits_used,
                        response_id,
                    } => {
                        stats.add_credits(credits_used);
                        if let Some(rid) = response_id {
                            previous_response_id = Some(rid);
                        }
                    }
                }
            }

            // Only freshly produced tool results feed the next
            // iteration; none means the turn is over.
            inputs = next_inputs;
        }

        Ok(())
    }

    async fn initial_inputs(&self, request: &TurnRequest) -> Result<Vec<MessageState>> {
        match &request.start {
            TurnStart::Continuation(message_id) => {
                let window = self
                    .ports
                    .build_context(
                        &request.conversation_id,
                        &request.bot,
                        &self.model_for(&request.bot),
                        message_id,
                        ContextOptions {
                            tools: request.tools.clone(),
                            system_message: Some(request.system_prompt.clone()),
                        },
                    )
                    .await?;
                Ok(window.messages)
            }
            TurnStart::Prompt(text) => {
                let author = request.session.as_ref().map_or_else(
                    || AuthorId::Bot(request.bot.id.clone()),
                    |s| AuthorId::Human(s.user_id.clone()),
                );
                Ok(vec![MessageState::standalone_prompt(text.clone(), author)])
            }
        }
    }

    /// Guaranteed-run cleanup: bill partial work, stop the typing
    /// indicator. Failures here are logged, never propagated.
    async fn finalize(&self, request: &TurnRequest, stats: &ResponseStats) {
        if stats.credits_used > 0 {
            let debit = BillingDebit::for_credits(
                request.account_id.clone(),
                stats.credits_used,
                "swarm:turn",
                json!({
                    "conversation_id": request.conversation_id.value(),
                    "bot_id": request.bot.id.value(),
                    "tool_calls": stats.tool_calls,
                }),
            );
            if let Err(e) = self.ports.publish_billing(debit).await {
                tracing::error!(
                    account = %request.account_id,
                    "Failed to publish billing debit: {e}"
                );
            }
        }

        self.forward_live(
            request,
            LiveEvent::Typing {
                bot_id: request.bot.id.clone(),
                active: false,
            },
        )
        .await;
    }

    fn model_for(&self, bot: &BotParticipant) -> String {
        bot.model
            .clone()
            .unwrap_or_else(|| self.settings.model_hint.clone())
    }

    async fn forward_live(&self, request: &TurnRequest, event: LiveEvent) {
        if let Err(e) = self
            .ports
            .emit_live(&request.conversation_id, event)
            .await
        {
            debug!("Live channel emit failed: {e}");
        }
    }
}
