#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

//! System-prompt rendering: a role-aware template over the goal, the
//! swarm-state snapshot and the tool catalog. Every snapshot section
//! is individually size-capped so a sprawling blackboard cannot blow
//! up the prompt.

use crate::domain::{BotParticipant, ConversationState, SubtaskStatus};
use crate::ports::ToolDefinition;
use itertools::Itertools;
use std::fmt::Write as _;

const GOAL_CAP: usize = 600;
const SECTION_CAP: usize = 800;
const TRUNCATION_MARKER: &str = "...[truncated]";

#[must_use]
pub fn render_system_prompt(
    state: &ConversationState,
    bot: &BotParticipant,
    tools: &[ToolDefinition],
) -> String {
    let config = &state.config;
    let mut prompt = String::new();

    let _ = writeln!(
        prompt,
        "You are {} (id: {}), a {} in a swarm of agents working toward a shared goal.",
        bot.name,
        bot.id,
        bot.role.as_str()
    );
    let _ = writeln!(prompt, "\n## Goal\n{}", capped(&config.goal, GOAL_CAP));

    let _ = writeln!(prompt, "\n## Swarm state");
    let _ = writeln!(prompt, "team: {}", state.id);
    let leader = config
        .swarm_leader
        .as_ref()
        .map_or_else(|| "unassigned".to_string(), ToString::to_string);
    let _ = writeln!(prompt, "leader: {leader}");

    let (active, completed) = config.subtask_counts();
    let _ = writeln!(prompt, "subtasks: {active} active, {completed} completed");
    let subtask_lines = config
        .subtasks
        .iter()
        .map(|s| {
            let marker = if s.status == SubtaskStatus::Active {
                "[ ]"
            } else {
                "[x]"
            };
            format!("{marker} {}", s.description)
        })
        .join("\n");
    if !subtask_lines.is_empty() {
        let _ = writeln!(prompt, "{}", capped(&subtask_lines, SECTION_CAP));
    }

    let _ = writeln!(
        prompt,
        "blackboard: {}",
        capped(&config.blackboard.to_string(), SECTION_CAP)
    );
    let _ = writeln!(
        prompt,
        "resources: {}",
        capped(&config.resources.to_string(), SECTION_CAP)
    );
    let _ = writeln!(
        prompt,
        "records: {}",
        capped(&config.records.to_string(), SECTION_CAP)
    );

    if let Some(stats) = &config.stats {
        let _ = writeln!(
            prompt,
            "usage: {} tool calls, {} credits since {}",
            stats.total_tool_calls,
            stats.total_credits,
            stats.started_at.to_rfc3339()
        );
    }
    let _ = writeln!(
        prompt,
        "limits: {} tool calls, {} credits",
        config.limits.max_tool_calls, config.limits.max_credits
    );

    if !tools.is_empty() {
        let _ = writeln!(prompt, "\n## Tools");
        let catalog = tools
            .iter()
            .map(|t| format!("- {}: {}", t.name, t.description))
            .join("\n");
        let _ = writeln!(prompt, "{catalog}");
    }

    if bot.role.is_recruiter() {
        let _ = writeln!(prompt, "\n{}", recruitment_rules());
    }

    prompt
}

/// Initial system message announcing the swarm to its leader.
#[must_use]
pub fn render_initial_leader_message(goal: &str, leader: &BotParticipant) -> String {
    format!(
        "A new swarm has been started with {} (id: {}) as leader. \
         Goal: {}. Review the goal, decompose it into subtasks, and \
         coordinate the team.",
        leader.name,
        leader.id,
        capped(goal, GOAL_CAP)
    )
}

/// Injected only for leader/coordinator/delegator roles.
fn recruitment_rules() -> &'static str {
    "## Recruitment rules\n\
     Before doing domain work yourself, decompose large goals into \
     tracked subtasks on the shared blackboard, assign them to worker \
     agents, and keep the subtask list current as work completes."
}

fn capped(value: &str, max_chars: usize) -> String {
    let mut chars = value.chars();
    let mut output = String::new();
    for _ in 0..max_chars {
        if let Some(ch) = chars.next() {
            output.push(ch);
        } else {
            return value.to_string();
        }
    }

    if chars.next().is_some() {
        output.push_str(TRUNCATION_MARKER);
    }
    output
}
