#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::domain::ids::{BotId, ConversationId, PendingId, UserId};
use crate::error::{Result, SwarmError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PendingStatus {
    PendingApproval,
    ScheduledForExecution,
    Executing,
    Completed,
    Failed,
    Rejected,
}

impl PendingStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::PendingApproval => "PENDING_APPROVAL",
            Self::ScheduledForExecution => "SCHEDULED_FOR_EXECUTION",
            Self::Executing => "EXECUTING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Rejected => "REJECTED",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Rejected)
    }

    /// Legal transitions: deferred states may start executing or be
    /// rejected; executing resolves to completed or failed; terminal
    /// states are frozen.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        match self {
            Self::PendingApproval | Self::ScheduledForExecution => {
                matches!(next, Self::Executing | Self::Rejected)
            }
            Self::Executing => matches!(next, Self::Completed | Self::Failed),
            Self::Completed | Self::Failed | Self::Rejected => false,
        }
    }
}

/// One deferred tool invocation, kept as an audit trail. Entries are
/// never deleted; they only transition state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingToolCallEntry {
    pub pending_id: PendingId,
    pub tool_call_id: String,
    pub tool_name: String,
    /// Serialized tool arguments as the model produced them.
    pub tool_arguments: String,
    pub caller_bot_id: BotId,
    pub conversation_id: ConversationId,
    pub requested_at: DateTime<Utc>,
    pub status: PendingStatus,
    pub scheduled_execution_time: Option<DateTime<Utc>>,
    pub approval_timeout_at: Option<DateTime<Utc>>,
    pub user_id_to_approve: Option<UserId>,
    pub execution_attempts: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub cost: Option<i128>,
    pub status_reason: Option<String>,
    pub decision_time: Option<DateTime<Utc>>,
    pub decided_by: Option<UserId>,
}

impl PendingToolCallEntry {
    pub fn awaiting_approval(
        conversation_id: ConversationId,
        caller_bot_id: BotId,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_arguments: impl Into<String>,
        approver: Option<UserId>,
        timeout_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pending_id: PendingId::generate(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_arguments: tool_arguments.into(),
            caller_bot_id,
            conversation_id,
            requested_at: Utc::now(),
            status: PendingStatus::PendingApproval,
            scheduled_execution_time: None,
            approval_timeout_at: Some(timeout_at),
            user_id_to_approve: approver,
            execution_attempts: 0,
            result: None,
            error: None,
            cost: None,
            status_reason: None,
            decision_time: None,
            decided_by: None,
        }
    }

    pub fn scheduled(
        conversation_id: ConversationId,
        caller_bot_id: BotId,
        tool_call_id: impl Into<String>,
        tool_name: impl Into<String>,
        tool_arguments: impl Into<String>,
        execute_at: DateTime<Utc>,
    ) -> Self {
        Self {
            pending_id: PendingId::generate(),
            tool_call_id: tool_call_id.into(),
            tool_name: tool_name.into(),
            tool_arguments: tool_arguments.into(),
            caller_bot_id,
            conversation_id,
            requested_at: Utc::now(),
            status: PendingStatus::ScheduledForExecution,
            scheduled_execution_time: Some(execute_at),
            approval_timeout_at: None,
            user_id_to_approve: None,
            execution_attempts: 0,
            result: None,
            error: None,
            cost: None,
            status_reason: None,
            decision_time: None,
            decided_by: None,
        }
    }

    /// Guarded state transition.
    ///
    /// # Errors
    /// Returns `InvalidLifecycleState` when the move is not legal from
    /// the current status.
    pub fn transition(&mut self, next: PendingStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(SwarmError::InvalidLifecycleState(format!(
                "pending call {} cannot move {} -> {}",
                self.pending_id,
                self.status.as_str(),
                next.as_str()
            )));
        }
        if next == PendingStatus::Executing {
            self.execution_attempts = self.execution_attempts.saturating_add(1);
        }
        self.status = next;
        Ok(())
    }

    /// Record the outcome of an approved execution.
    pub fn resolve_executed(
        &mut self,
        result: std::result::Result<serde_json::Value, String>,
        cost: i128,
        decided_by: UserId,
    ) -> Result<()> {
        match result {
            Ok(output) => {
                self.transition(PendingStatus::Completed)?;
                self.result = Some(output);
            }
            Err(message) => {
                self.transition(PendingStatus::Failed)?;
                self.error = Some(message);
            }
        }
        self.cost = Some(cost);
        self.decision_time = Some(Utc::now());
        self.decided_by = Some(decided_by);
        Ok(())
    }

    /// Record a user rejection.
    pub fn resolve_rejected(&mut self, reason: Option<String>, decided_by: UserId) -> Result<()> {
        self.transition(PendingStatus::Rejected)?;
        self.status_reason = reason;
        self.decision_time = Some(Utc::now());
        self.decided_by = Some(decided_by);
        Ok(())
    }
}

#[cfg(test)]
mod bdd_tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn given_an_approval_entry() -> PendingToolCallEntry {
        PendingToolCallEntry::awaiting_approval(
            ConversationId::new("c1"),
            BotId::new("b1"),
            "call-1",
            "deploy",
            "{}",
            Some(UserId::new("u1")),
            Utc::now(),
        )
    }

    #[test]
    fn when_entry_awaits_approval_then_it_never_starts_completed() {
        let entry = given_an_approval_entry();
        assert_eq!(entry.status, PendingStatus::PendingApproval);
        assert_eq!(entry.execution_attempts, 0);
        assert!(entry.approval_timeout_at.is_some());
    }

    #[test]
    fn when_entry_is_approved_then_it_executes_and_completes() {
        let mut entry = given_an_approval_entry();
        entry.transition(PendingStatus::Executing).expect("approve");
        assert_eq!(entry.execution_attempts, 1);
        entry
            .resolve_executed(Ok(serde_json::json!({"ok": true})), 7, UserId::new("u1"))
            .expect("resolve");
        assert_eq!(entry.status, PendingStatus::Completed);
        assert_eq!(entry.cost, Some(7));
        assert!(entry.decision_time.is_some());
    }

    #[test]
    fn when_entry_is_rejected_then_it_is_terminal() {
        let mut entry = given_an_approval_entry();
        entry
            .resolve_rejected(Some("too risky".to_string()), UserId::new("u1"))
            .expect("reject");
        assert_eq!(entry.status, PendingStatus::Rejected);
        assert!(entry.transition(PendingStatus::Executing).is_err());
    }

    #[test]
    fn when_entry_is_completed_then_no_further_transition_is_legal() {
        let mut entry = given_an_approval_entry();
        entry.transition(PendingStatus::Executing).expect("approve");
        entry.transition(PendingStatus::Completed).expect("finish");
        assert!(entry.transition(PendingStatus::Failed).is_err());
        assert!(entry.status.is_terminal());
    }

    #[test]
    fn when_entry_is_scheduled_then_execution_time_is_recorded() {
        let execute_at = Utc::now() + chrono::Duration::milliseconds(5000);
        let entry = PendingToolCallEntry::scheduled(
            ConversationId::new("c1"),
            BotId::new("b1"),
            "call-2",
            "x",
            "{}",
            execute_at,
        );
        assert_eq!(entry.status, PendingStatus::ScheduledForExecution);
        assert_eq!(entry.scheduled_execution_time, Some(execute_at));
    }
}
