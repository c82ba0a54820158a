//! Per-execution budget tracking
//!
//! [`CostGuard`] answers "may I continue?" for one reasoning loop. Its
//! counters live in memory only and are owned exclusively by a single
//! runner invocation; they are never persisted or shared across
//! concurrent executions.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::UsageTotals;

/// Budget limit violations
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BudgetExceeded {
    /// Token budget exhausted
    #[error("token budget exceeded ({used} used, limit {limit})")]
    Tokens { used: u64, limit: u64 },

    /// Dollar budget exhausted
    #[error("cost budget exceeded (${used:.4} used, limit ${limit:.2})")]
    Cost { used: f64, limit: f64 },

    /// Wall-clock budget exhausted
    #[error("time budget exceeded (ran for {elapsed:?}, limit {limit:?})")]
    Time { elapsed: Duration, limit: Duration },
}

/// Budget limits for one execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CostBudget {
    /// Maximum tokens across all reasoning calls
    pub max_tokens: u64,

    /// Maximum dollar spend
    pub max_cost_usd: f64,

    /// Maximum wall-clock time
    #[serde(with = "duration_serde")]
    pub max_duration: Duration,
}

impl Default for CostBudget {
    fn default() -> Self {
        Self {
            max_tokens: 100_000,
            max_cost_usd: 5.0,
            max_duration: Duration::from_secs(600),
        }
    }
}

impl CostBudget {
    /// Set the token limit
    pub fn with_max_tokens(mut self, max_tokens: u64) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set the dollar limit
    pub fn with_max_cost_usd(mut self, max_cost_usd: f64) -> Self {
        self.max_cost_usd = max_cost_usd;
        self
    }

    /// Set the wall-clock limit
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }
}

/// Tracks consumption against a [`CostBudget`] for one execution
#[derive(Debug)]
pub struct CostGuard {
    budget: CostBudget,
    tokens_used: u64,
    cost_used: f64,
    started: Instant,
}

impl CostGuard {
    /// Create a guard with the given budget, starting the clock now
    pub fn new(budget: CostBudget) -> Self {
        Self {
            budget,
            tokens_used: 0,
            cost_used: 0.0,
            started: Instant::now(),
        }
    }

    /// Check whether budget remains, naming the exhausted dimension otherwise
    pub fn check(&self) -> Result<(), BudgetExceeded> {
        if self.tokens_used >= self.budget.max_tokens {
            return Err(BudgetExceeded::Tokens {
                used: self.tokens_used,
                limit: self.budget.max_tokens,
            });
        }
        if self.cost_used >= self.budget.max_cost_usd {
            return Err(BudgetExceeded::Cost {
                used: self.cost_used,
                limit: self.budget.max_cost_usd,
            });
        }
        let elapsed = self.started.elapsed();
        if elapsed >= self.budget.max_duration {
            return Err(BudgetExceeded::Time {
                elapsed,
                limit: self.budget.max_duration,
            });
        }
        Ok(())
    }

    /// Record consumption from a reasoning call or tool execution
    pub fn record(&mut self, tokens: u64, cost_usd: f64) {
        self.tokens_used += tokens;
        self.cost_used += cost_usd;
    }

    /// Elapsed wall-clock time since the guard was created
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Aggregate usage so far
    pub fn totals(&self) -> UsageTotals {
        UsageTotals {
            tokens: self.tokens_used,
            cost_usd: self.cost_used,
            elapsed_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}

/// Serde support for Duration (as milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_guard_has_budget() {
        let guard = CostGuard::new(CostBudget::default());
        assert!(guard.check().is_ok());
    }

    #[test]
    fn test_token_exhaustion() {
        let mut guard = CostGuard::new(CostBudget::default().with_max_tokens(100));
        guard.record(60, 0.0);
        assert!(guard.check().is_ok());

        guard.record(40, 0.0);
        assert!(matches!(
            guard.check(),
            Err(BudgetExceeded::Tokens { used: 100, limit: 100 })
        ));
    }

    #[test]
    fn test_cost_exhaustion() {
        let mut guard = CostGuard::new(CostBudget::default().with_max_cost_usd(0.50));
        guard.record(10, 0.75);
        assert!(matches!(guard.check(), Err(BudgetExceeded::Cost { .. })));
    }

    #[test]
    fn test_time_exhaustion() {
        let guard = CostGuard::new(CostBudget::default().with_max_duration(Duration::ZERO));
        assert!(matches!(guard.check(), Err(BudgetExceeded::Time { .. })));
    }

    #[test]
    fn test_totals_accumulate() {
        let mut guard = CostGuard::new(CostBudget::default());
        guard.record(100, 0.01);
        guard.record(250, 0.02);

        let totals = guard.totals();
        assert_eq!(totals.tokens, 350);
        assert!((totals.cost_usd - 0.03).abs() < f64::EPSILON);
    }
}
