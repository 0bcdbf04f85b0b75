/// Per-session outcome counters
///
/// Pure counter semantics: `attempts == successes + failures` holds after
/// every call. Percentages and other derived values belong to the display
/// layer.
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{api::types::FinalizeSessionBody, protocol::payload::Outcome};

/// Immutable copy of the counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub attempts: u32,
    pub successes: u32,
    pub failures: u32,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempts={}, successes={}, failures={}",
            self.attempts, self.successes, self.failures
        )
    }
}

impl From<StatsSnapshot> for FinalizeSessionBody {
    fn from(stats: StatsSnapshot) -> Self {
        Self {
            cantidad_intentos: stats.attempts,
            cantidad_aciertos: stats.successes,
            cantidad_errores: stats.failures,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Statistics {
    counters: StatsSnapshot,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&mut self, outcome: Outcome) {
        self.counters.attempts = self.counters.attempts.saturating_add(1);
        match outcome {
            Outcome::Success => self.counters.successes = self.counters.successes.saturating_add(1),
            Outcome::Failure => self.counters.failures = self.counters.failures.saturating_add(1),
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.counters
    }

    pub fn reset(&mut self) {
        self.counters = StatsSnapshot::default();
    }
}
