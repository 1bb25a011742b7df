#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![forbid(unsafe_code)]

use crate::domain::{PerResponseLimits, SwarmLimits, SwarmStats};
use serde::{Deserialize, Serialize};

/// Ephemeral per-turn usage. Aggregated into `SwarmStats` after each
/// dispatch round, then discarded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseStats {
    pub tool_calls: u64,
    pub credits_used: i128,
}

impl ResponseStats {
    pub fn add_tool_call(&mut self) {
        self.tool_calls = self.tool_calls.saturating_add(1);
    }

    pub fn add_credits(&mut self, credits: i128) {
        if credits > 0 {
            self.credits_used = self.credits_used.saturating_add(credits);
        }
    }
}

/// Tool-call and credit ceiling assigned to one agent for one round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnAllocation {
    pub tool_calls: u64,
    pub credits: i128,
}

impl TurnAllocation {
    #[must_use]
    pub const fn remaining_tool_calls(&self, used: &ResponseStats) -> u64 {
        self.tool_calls.saturating_sub(used.tool_calls)
    }

    #[must_use]
    pub const fn remaining_credits(&self, used: &ResponseStats) -> i128 {
        self.credits - used.credits_used
    }

    /// Loop-top termination predicate for the turn engine: the
    /// allocation is spent, or the agent's own per-response caps are met.
    #[must_use]
    pub fn is_exhausted(&self, used: &ResponseStats, per_response: &PerResponseLimits) -> bool {
        self.remaining_tool_calls(used) == 0
            || self.remaining_credits(used) <= 0
            || used.tool_calls >= u64::from(per_response.max_tool_calls)
            || used.credits_used >= per_response.max_credits
    }

    /// Effective credit ceiling for a single model call:
    /// `min(per-response cap, remaining allocation)`, clamped to zero.
    #[must_use]
    pub fn effective_credit_ceiling(
        &self,
        used: &ResponseStats,
        per_response: &PerResponseLimits,
    ) -> i128 {
        let remaining = self.remaining_credits(used);
        let cap = per_response.max_credits - used.credits_used;
        remaining.min(cap).max(0)
    }
}

/// Split the remaining conversation-wide allowance evenly across the
/// agents responding in this round.
///
/// This is a conservative static partition, not a reservation system:
/// concurrent agents do not see each other's in-round consumption, and
/// the floor division loses at most `n - 1` units.
#[must_use]
pub fn allocate_round(stats: &SwarmStats, limits: &SwarmLimits, responders: usize) -> TurnAllocation {
    let n = responders.max(1) as u64;
    let remaining_tool_calls = limits.max_tool_calls.saturating_sub(stats.total_tool_calls);
    let remaining_credits = limits.max_credits - stats.total_credits;

    TurnAllocation {
        tool_calls: remaining_tool_calls / n,
        credits: if remaining_credits > 0 {
            remaining_credits / i128::from(n)
        } else {
            0
        },
    }
}

#[cfg(test)]
mod bdd_tests {
    use super::*;
    use chrono::Utc;

    fn given_stats(total_tool_calls: u64, total_credits: i128) -> SwarmStats {
        SwarmStats {
            total_tool_calls,
            total_credits,
            started_at: Utc::now(),
            last_processing_cycle_ended_at: None,
        }
    }

    fn given_limits(max_tool_calls: u64, max_credits: i128) -> SwarmLimits {
        SwarmLimits {
            max_tool_calls,
            max_credits,
            ..SwarmLimits::default()
        }
    }

    #[test]
    fn when_ten_calls_remain_for_two_bots_then_each_gets_five() {
        let allocation = allocate_round(&given_stats(0, 1000), &given_limits(10, 1000), 2);
        assert_eq!(allocation.tool_calls, 5);
        assert_eq!(allocation.credits, 500);
    }

    #[test]
    fn when_budget_is_spent_then_next_round_allocates_zero() {
        let allocation = allocate_round(&given_stats(10, 1000), &given_limits(10, 1000), 1);
        assert_eq!(allocation.tool_calls, 0);
        assert_eq!(allocation.credits, 0);
    }

    #[test]
    fn when_credits_have_overshot_then_allocation_clamps_to_zero() {
        let allocation = allocate_round(&given_stats(0, 1200), &given_limits(10, 1000), 3);
        assert_eq!(allocation.credits, 0);
    }

    #[test]
    fn when_responder_count_is_zero_then_division_still_succeeds() {
        let allocation = allocate_round(&given_stats(0, 0), &given_limits(10, 100), 0);
        assert_eq!(allocation.tool_calls, 10);
        assert_eq!(allocation.credits, 100);
    }

    #[test]
    fn floor_division_never_over_allocates() {
        for n in 1..=7usize {
            let limits = given_limits(10, 100);
            let stats = given_stats(3, 17);
            let per_bot = allocate_round(&stats, &limits, n);
            let total = per_bot.tool_calls * n as u64;
            assert!(total <= limits.max_tool_calls - stats.total_tool_calls);
            let credit_total = per_bot.credits * n as i128;
            assert!(credit_total <= limits.max_credits - stats.total_credits);
        }
    }

    #[test]
    fn when_per_response_cap_is_met_then_allocation_is_exhausted() {
        let allocation = TurnAllocation {
            tool_calls: 100,
            credits: 1000,
        };
        let per_response = PerResponseLimits {
            max_tool_calls: 2,
            max_credits: 1000,
        };
        let used = ResponseStats {
            tool_calls: 2,
            credits_used: 10,
        };
        assert!(allocation.is_exhausted(&used, &per_response));
    }

    #[test]
    fn when_effective_ceiling_is_computed_then_it_is_the_min_of_caps() {
        let allocation = TurnAllocation {
            tool_calls: 10,
            credits: 300,
        };
        let per_response = PerResponseLimits {
            max_tool_calls: 10,
            max_credits: 200,
        };
        let used = ResponseStats {
            tool_calls: 0,
            credits_used: 50,
        };
        // remaining allocation 250, per-response headroom 150
        assert_eq!(allocation.effective_credit_ceiling(&used, &per_response), 150);
    }
}
