#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! Swarm lifecycle: one long-lived state machine per swarm
//! conversation. Events are queued and drained single-flight, so the
//! machine processes one event at a time no matter how many arrive
//! concurrently.


use crate::dispatch::{prompt, DispatchService};
use crate::domain::{
    BotId, BotParticipant, BotRole, ConversationId, MessageId, PendingId, SwarmEvent, UserId,
};
use crate::error::{Result, SwarmError};
use crate::ports::DispatchPorts;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Saga states of a swarm conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaStatus {
    Uninitialized,
    Starting,
    Running,
    Idle,
    Paused,
    Stopped,
    Failed,
    Terminated,
}

impl SagaStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Idle => "idle",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
            Self::Terminated => "terminated",
        }
    }

    /// Terminal states accept no further events.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Terminated)
    }

    /// Only a settled machine can be paused or stopped.
    #[must_use]
    pub const fn can_be_interrupted(&self) -> bool {
        matches!(self, Self::Running | Self::Idle)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub struct SwarmLifecycle<P> {
    dispatch: Arc<DispatchService<P>>,
    conversation_id: ConversationId,
    task_id: String,
    state: Mutex<SagaStatus>,
    queue: Mutex<VecDeque<SwarmEvent>>,
    /// Single-flight guard: whoever holds it is the one drainer.
    drain_permit: Mutex<()>,
    associated_user: Mutex<Option<UserId>>,
}

impl<P> SwarmLifecycle<P>
where
    P: DispatchPorts + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(dispatch: Arc<DispatchService<P>>, conversation_id: ConversationId) -> Self {
        Self {
            dispatch,
            conversation_id,
            task_id: uuid::Uuid::new_v4().to_string(),
            state: Mutex::new(SagaStatus::Uninitialized),
            queue: Mutex::new(VecDeque::new()),
            drain_permit: Mutex::new(()),
            associated_user: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    pub async fn current_status(&self) -> SagaStatus {
        *self.state.lock().await
    }

    pub async fn associated_user(&self) -> Option<UserId> {
        self.associated_user.lock().await.clone()
    }

    /// Initialize the swarm: persist the goal (keeping the stored one
    /// when `goal` is `None`), synthesize the kick-off announcement and
    /// enqueue the start event. Idempotent; a second call is a logged
    /// no-op.
    ///
    /// # Errors
    /// Fails (and moves the machine to `Failed`) when the conversation
    /// cannot be loaded or the goal cannot be persisted.
    pub async fn start(self: &Arc<Self>, goal: Option<String>, acted_by: UserId) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != SagaStatus::Uninitialized {
                warn!(
                    conversation = %self.conversation_id,
                    status = %state,
                    "Start requested on an already-started swarm, ignoring"
                );
                return Ok(());
            }
            *state = SagaStatus::Starting;
        }

        let result = self.initialize(goal, &acted_by).await;
        match result {
            Ok(()) => {
                self.set_state(SagaStatus::Idle).await;
                self.trigger_drain();
                Ok(())
            }
            Err(e) => {
                error!(
                    conversation = %self.conversation_id,
                    code = e.code(),
                    "Swarm start failed: {e}"
                );
                self.set_state(SagaStatus::Failed).await;
                Err(e)
            }
        }
    }

    async fn initialize(&self, goal: Option<String>, acted_by: &UserId) -> Result<()> {
        let mut conversation = self
            .dispatch
            .get_conversation_state(&self.conversation_id)
            .await?
            .ok_or_else(|| {
                SwarmError::ConversationNotFound(self.conversation_id.value().to_string())
            })?;
        if let Some(goal) = goal {
            conversation.config.goal = goal;
        }

        let leader = conversation.resolve_leader().unwrap_or_else(|| {
            error!(
                conversation = %self.conversation_id,
                "No leader among participants, synthesizing a placeholder"
            );
            BotParticipant::new(BotId::new("swarm-leader"), "Swarm Leader", BotRole::Leader)
        });
        let goal = conversation.config.goal.clone();

        // Stamp the start time before the first round runs.
        conversation.config.stats_mut();
        conversation.config.swarm_leader = Some(leader.id.clone());
        self.dispatch
            .update_conversation_config(&self.conversation_id, &conversation.config)
            .await?;

        let initial_message = conversation
            .initial_leader_system_message
            .clone()
            .unwrap_or_else(|| prompt::render_initial_leader_message(&goal, &leader));

        {
            let mut user = self.associated_user.lock().await;
            *user = Some(acted_by.clone());
        }

        info!(
            conversation = %self.conversation_id,
            task_id = %self.task_id,
            leader = %leader.id,
            "Swarm starting"
        );

        self.enqueue(SwarmEvent::SwarmStarted {
            conversation_id: self.conversation_id.clone(),
            acted_by: acted_by.clone(),
            goal,
            initial_message,
        })
        .await;
        Ok(())
    }

    /// Queue an event for processing and kick the drain.
    ///
    /// # Errors
    /// Rejected when the machine is in a terminal state.
    pub async fn handle_event(self: &Arc<Self>, event: SwarmEvent) -> Result<()> {
        let status = self.current_status().await;
        if status.is_terminal() {
            return Err(SwarmError::InvalidLifecycleState(format!(
                "swarm {} no longer accepts events (status {status})",
                self.conversation_id
            )));
        }
        self.enqueue(event).await;
        self.trigger_drain();
        Ok(())
    }

    /// # Errors
    /// Rejected in terminal states.
    pub async fn handle_external_message(
        self: &Arc<Self>,
        message_id: MessageId,
        acted_by: UserId,
    ) -> Result<()> {
        self.handle_event(SwarmEvent::ExternalMessage {
            conversation_id: self.conversation_id.clone(),
            acted_by,
            message_id,
        })
        .await
    }

    /// # Errors
    /// Rejected in terminal states.
    pub async fn handle_tool_approval(
        self: &Arc<Self>,
        pending_id: PendingId,
        acted_by: UserId,
    ) -> Result<()> {
        self.handle_event(SwarmEvent::ToolApproved {
            conversation_id: self.conversation_id.clone(),
            acted_by,
            pending_id,
        })
        .await
    }

    /// # Errors
    /// Rejected in terminal states.
    pub async fn handle_tool_rejection(
        self: &Arc<Self>,
        pending_id: PendingId,
        acted_by: UserId,
        reason: Option<String>,
    ) -> Result<()> {
        self.handle_event(SwarmEvent::ToolRejected {
            conversation_id: self.conversation_id.clone(),
            acted_by,
            pending_id,
            reason,
        })
        .await
    }

    /// Pause processing. Queued events stay queued; the in-flight
    /// round, if any, is cancelled.
    ///
    /// # Errors
    /// Rejected unless the machine is settled (`Running` or `Idle`).
    pub async fn pause(&self) -> Result<()> {
        self.interrupt(SagaStatus::Paused).await?;
        self.dispatch.request_cancellation(&self.conversation_id).await;
        Ok(())
    }

    /// Resume a paused swarm and drain whatever queued up meanwhile.
    ///
    /// # Errors
    /// Rejected unless the machine is `Paused`.
    pub async fn resume(self: &Arc<Self>) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            if *state != SagaStatus::Paused {
                return Err(SwarmError::InvalidLifecycleState(format!(
                    "cannot resume from {state}"
                )));
            }
            *state = SagaStatus::Idle;
        }
        self.trigger_drain();
        Ok(())
    }

    /// Stop the swarm for good.
    ///
    /// # Errors
    /// Rejected unless the machine is settled.
    pub async fn stop(&self) -> Result<()> {
        self.interrupt(SagaStatus::Stopped).await?;
        self.dispatch.request_cancellation(&self.conversation_id).await;
        Ok(())
    }

    /// Tear down unconditionally: drop queued events and terminate.
    /// Idempotent.
    pub async fn shutdown(&self) {
        {
            let mut queue = self.queue.lock().await;
            let dropped = queue.len();
            queue.clear();
            if dropped > 0 {
                warn!(
                    conversation = %self.conversation_id,
                    dropped = dropped,
                    "Dropping queued events on shutdown"
                );
            }
        }
        self.dispatch.request_cancellation(&self.conversation_id).await;
        self.set_state(SagaStatus::Terminated).await;
    }

    /// Supervisor adapter for a generic managed-task controller.
    ///
    /// # Errors
    /// Same contract as [`Self::pause`].
    pub async fn request_pause(&self) -> Result<()> {
        self.pause().await
    }

    /// Supervisor adapter.
    ///
    /// # Errors
    /// Same contract as [`Self::stop`].
    pub async fn request_stop(&self) -> Result<()> {
        self.stop().await
    }

    /// Supervisor adapter.
    pub async fn current_saga_status(&self) -> SagaStatus {
        self.current_status().await
    }

    /// Supervisor adapter.
    pub async fn associated_user_id(&self) -> Option<UserId> {
        self.associated_user().await
    }

    async fn interrupt(&self, next: SagaStatus) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.can_be_interrupted() {
            return Err(SwarmError::InvalidLifecycleState(format!(
                "cannot move from {state} to {next}"
            )));
        }
        *state = next;
        Ok(())
    }

    async fn set_state(&self, next: SagaStatus) {
        let mut state = self.state.lock().await;
        debug!(
            conversation = %self.conversation_id,
            from = %state,
            to = %next,
            "Saga transition"
        );
        *state = next;
    }

    async fn enqueue(&self, event: SwarmEvent) {
        let mut queue = self.queue.lock().await;
        queue.push_back(event);
    }

    fn trigger_drain(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.drain().await;
        });
    }

    /// Single-flight event drain. Concurrent triggers collapse into the
    /// one holder of the permit; losers leave their events queued for it.
    pub async fn drain(self: &Arc<Self>) {
        let Ok(permit) = self.drain_permit.try_lock() else {
            debug!(conversation = %self.conversation_id, "Drain already in flight");
            return;
        };

        {
            let mut state = self.state.lock().await;
            if !matches!(*state, SagaStatus::Running | SagaStatus::Idle) {
                debug!(
                    conversation = %self.conversation_id,
                    status = %state,
                    "Refusing to drain in this state"
                );
                return;
            }
            *state = SagaStatus::Running;
        }

        // An event for a different conversation means mis-routing
        // upstream; it is held aside for the rest of the pass so it
        // cannot block the events queued behind it, then re-queued for
        // inspection instead of being burned.
        let mut misrouted: Vec<SwarmEvent> = Vec::new();

        loop {
            let event = {
                let mut queue = self.queue.lock().await;
                queue.pop_front()
            };
            let Some(event) = event else { break };

            if event.conversation_id() != &self.conversation_id {
                warn!(
                    expected = %self.conversation_id,
                    got = %event.conversation_id(),
                    kind = event.kind(),
                    "Event routed to the wrong swarm, parking it"
                );
                misrouted.push(event);
                continue;
            }

            if let Err(e) = self.dispatch.handle_internal_event(event).await {
                error!(
                    conversation = %self.conversation_id,
                    code = e.code(),
                    "Event handling failed: {e}"
                );
            }

            // Let pause/stop requests land between events.
            tokio::task::yield_now().await;
            let status = *self.state.lock().await;
            if status != SagaStatus::Running {
                debug!(
                    conversation = %self.conversation_id,
                    status = %status,
                    "Drain interrupted mid-queue"
                );
                self.requeue(misrouted).await;
                return;
            }
        }

        self.requeue(misrouted).await;

        {
            let mut state = self.state.lock().await;
            if *state == SagaStatus::Running {
                *state = SagaStatus::Idle;
            }
        }

        // An event enqueued between the final empty pop and here would
        // otherwise sit until the next trigger. The permit is released
        // first so the follow-up pass can take it.
        drop(permit);
        let has_work = {
            let queue = self.queue.lock().await;
            queue
                .iter()
                .any(|e| e.conversation_id() == &self.conversation_id)
        };
        if has_work {
            self.trigger_drain();
        }
    }

    async fn requeue(&self, events: Vec<SwarmEvent>) {
        if events.is_empty() {
            return;
        }
        let mut queue = self.queue.lock().await;
        queue.extend(events);
    }
}
