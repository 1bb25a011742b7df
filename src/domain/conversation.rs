#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::budget::ResponseStats;
use crate::domain::ids::{BotId, ConversationId};
use crate::domain::pending::PendingToolCallEntry;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Role a bot plays inside the swarm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BotRole {
    Leader,
    Coordinator,
    Delegator,
    Worker,
}

impl BotRole {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Coordinator => "coordinator",
            Self::Delegator => "delegator",
            Self::Worker => "worker",
        }
    }

    /// Roles that are expected to decompose large goals into subtasks
    /// before doing domain work.
    #[must_use]
    pub const fn is_recruiter(&self) -> bool {
        matches!(self, Self::Leader | Self::Coordinator | Self::Delegator)
    }
}

impl TryFrom<&str> for BotRole {
    type Error = String;

    fn try_from(s: &str) -> std::result::Result<Self, String> {
        match s {
            "leader" => Ok(Self::Leader),
            "coordinator" => Ok(Self::Coordinator),
            "delegator" => Ok(Self::Delegator),
            "worker" => Ok(Self::Worker),
            _ => Err(format!("Unknown bot role: {s}")),
        }
    }
}

/// One agent participating in the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotParticipant {
    pub id: BotId,
    pub name: String,
    pub model: Option<String>,
    pub role: BotRole,
}

impl BotParticipant {
    pub fn new(id: BotId, name: impl Into<String>, role: BotRole) -> Self {
        Self {
            id,
            name: name.into(),
            model: None,
            role,
        }
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn promoted_to_leader(mut self) -> Self {
        self.role = BotRole::Leader;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Active,
    Completed,
}

/// A tracked unit of the swarm goal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subtask {
    pub description: String,
    pub status: SubtaskStatus,
}

impl Subtask {
    pub fn active(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            status: SubtaskStatus::Active,
        }
    }
}

/// Per-response caps applied inside a single turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerResponseLimits {
    pub max_tool_calls: u32,
    pub max_credits: i128,
}

impl Default for PerResponseLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 25,
            max_credits: 1_000_000,
        }
    }
}

/// Conversation-wide resource caps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmLimits {
    pub max_tool_calls: u64,
    pub max_credits: i128,
    /// Maximum wall-clock duration of one dispatch round, if configured.
    pub max_turn_duration_ms: Option<u64>,
    #[serde(default)]
    pub per_response: PerResponseLimits,
}

impl Default for SwarmLimits {
    fn default() -> Self {
        Self {
            max_tool_calls: 100,
            max_credits: 10_000_000,
            max_turn_duration_ms: None,
            per_response: PerResponseLimits::default(),
        }
    }
}

/// Which tools require human approval before execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalRule {
    None,
    All,
    Named(BTreeSet<String>),
}

impl Default for ApprovalRule {
    fn default() -> Self {
        Self::None
    }
}

/// Deferral rules for tool execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    #[serde(default)]
    pub approval: ApprovalRule,
    /// Per-tool execution delay in milliseconds.
    #[serde(default)]
    pub tool_delays_ms: BTreeMap<String, u64>,
    /// Fallback delay when no per-tool delay is configured.
    #[serde(default)]
    pub default_delay_ms: u64,
    /// How long an approval request stays actionable.
    #[serde(default)]
    pub approval_timeout_ms: Option<u64>,
}

impl SchedulingPolicy {
    #[must_use]
    pub fn requires_approval(&self, tool_name: &str) -> bool {
        match &self.approval {
            ApprovalRule::None => false,
            ApprovalRule::All => true,
            ApprovalRule::Named(names) => names.contains(tool_name),
        }
    }

    #[must_use]
    pub fn delay_for(&self, tool_name: &str) -> u64 {
        self.tool_delays_ms
            .get(tool_name)
            .copied()
            .unwrap_or(self.default_delay_ms)
    }
}

/// Cumulative conversation statistics. Values only ever increase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwarmStats {
    pub total_tool_calls: u64,
    pub total_credits: i128,
    pub started_at: DateTime<Utc>,
    pub last_processing_cycle_ended_at: Option<DateTime<Utc>>,
}

impl SwarmStats {
    #[must_use]
    pub fn started_now() -> Self {
        Self {
            total_tool_calls: 0,
            total_credits: 0,
            started_at: Utc::now(),
            last_processing_cycle_ended_at: None,
        }
    }

    /// Fold one round's ephemeral stats into the cumulative totals.
    /// Increments are monotonic: negative credit deltas are ignored.
    pub fn record_round(&mut self, round: &ResponseStats) {
        self.total_tool_calls = self.total_tool_calls.saturating_add(round.tool_calls);
        if round.credits_used > 0 {
            self.total_credits = self.total_credits.saturating_add(round.credits_used);
        }
        self.last_processing_cycle_ended_at = Some(Utc::now());
    }
}

/// Embedded configuration and mutable run state of one conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub goal: String,
    pub swarm_leader: Option<BotId>,
    #[serde(default)]
    pub subtasks: Vec<Subtask>,
    #[serde(default)]
    pub blackboard: serde_json::Value,
    #[serde(default)]
    pub resources: serde_json::Value,
    #[serde(default)]
    pub records: serde_json::Value,
    #[serde(default)]
    pub limits: SwarmLimits,
    pub scheduling: Option<SchedulingPolicy>,
    #[serde(default)]
    pub pending_tool_calls: Vec<PendingToolCallEntry>,
    pub stats: Option<SwarmStats>,
}

impl ChatConfig {
    pub fn for_goal(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            swarm_leader: None,
            subtasks: Vec::new(),
            blackboard: serde_json::Value::Null,
            resources: serde_json::Value::Null,
            records: serde_json::Value::Null,
            limits: SwarmLimits::default(),
            scheduling: None,
            pending_tool_calls: Vec::new(),
            stats: None,
        }
    }

    /// Lazily initialise cumulative stats, returning a mutable handle.
    pub fn stats_mut(&mut self) -> &mut SwarmStats {
        self.stats.get_or_insert_with(SwarmStats::started_now)
    }

    #[must_use]
    pub fn subtask_counts(&self) -> (usize, usize) {
        let active = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Active)
            .count();
        let completed = self.subtasks.len() - active;
        (active, completed)
    }
}

/// Durable state of one conversation, owned by the conversation store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: ConversationId,
    pub participants: Vec<BotParticipant>,
    pub available_tools: Vec<String>,
    pub config: ChatConfig,
    pub initial_leader_system_message: Option<String>,
}

impl ConversationState {
    #[must_use]
    pub fn participant(&self, bot_id: &BotId) -> Option<&BotParticipant> {
        self.participants.iter().find(|p| &p.id == bot_id)
    }

    /// Resolve the swarm leader for prompt rendering: the configured
    /// leader when it is an actual participant, else the first
    /// participant promoted to the leader role.
    #[must_use]
    pub fn resolve_leader(&self) -> Option<BotParticipant> {
        if let Some(leader_id) = &self.config.swarm_leader {
            if let Some(p) = self.participant(leader_id) {
                return Some(p.clone());
            }
        }
        self.participants
            .first()
            .map(|p| p.clone().promoted_to_leader())
    }
}
