/// Mode-specific advancement
///
/// One engine drives every mode; the difference between sequential, random
/// and manual runs is only which device comes next and when the run ends.
use derive_more::Display;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use super::error::SessionError;
use crate::api::types::TestMode;

/// Mode plus its mode-specific parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ModeParams {
    Sequential { total_rounds: u32 },
    Random { duration_seconds: u32 },
    Manual,
}

impl ModeParams {
    pub fn mode(&self) -> TestMode {
        match self {
            ModeParams::Sequential { .. } => TestMode::Sequential,
            ModeParams::Random { .. } => TestMode::Random,
            ModeParams::Manual => TestMode::Manual,
        }
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        match *self {
            ModeParams::Sequential { total_rounds: 0 } => {
                Err(SessionError::validation("total rounds must be positive"))
            }
            ModeParams::Random {
                duration_seconds: 0,
            } => Err(SessionError::validation("duration must be positive")),
            _ => Ok(()),
        }
    }
}

/// Why a session ended.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Every round of a sequential run resolved
    #[display("completed")]
    Completed,
    /// The random run used up its duration
    #[display("duration elapsed")]
    DurationElapsed,
    /// The operator ended or aborted the run
    #[display("operator")]
    Operator,
}

/// What the engine should do after an outcome (or at session start).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    /// Activate a device, optionally after a pause.
    Activate { device_id: u8, delay: Option<Duration> },
    /// Nothing to do until the operator acts.
    Wait,
    Finish(FinishReason),
}

/// Sequential bookkeeping exposed for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RoundCursor {
    /// 1-based round number
    pub round: u32,
    pub total_rounds: u32,
    /// 0-based position within the device order
    pub index: usize,
}

pub trait AdvancePolicy: Send {
    fn mode(&self) -> TestMode;

    /// Device to activate once the session becomes active.
    fn first(&mut self, devices: &[u8]) -> Advance;

    /// Device to activate after an outcome has been recorded.
    fn next(&mut self, devices: &[u8]) -> Advance;

    /// Whether the engine must deliver wall-clock ticks.
    fn needs_ticks(&self) -> bool {
        false
    }

    /// Whether the time budget is spent at `now`. Ticks only prompt this
    /// check; the budget is measured from the session start.
    fn expired(&self, _now: Instant) -> bool {
        false
    }

    fn cursor(&self) -> Option<RoundCursor> {
        None
    }

    fn elapsed_seconds(&self, _now: Instant) -> Option<u32> {
        None
    }
}

pub struct SequentialPolicy {
    total_rounds: u32,
    round: u32,
    index: usize,
    round_pause: Duration,
}

impl SequentialPolicy {
    pub fn new(total_rounds: u32, round_pause: Duration) -> Self {
        Self {
            total_rounds,
            round: 1,
            index: 0,
            round_pause,
        }
    }
}

impl AdvancePolicy for SequentialPolicy {
    fn mode(&self) -> TestMode {
        TestMode::Sequential
    }

    fn first(&mut self, devices: &[u8]) -> Advance {
        self.round = 1;
        self.index = 0;
        match devices.first() {
            Some(&device_id) => Advance::Activate {
                device_id,
                delay: None,
            },
            None => Advance::Finish(FinishReason::Completed),
        }
    }

    fn next(&mut self, devices: &[u8]) -> Advance {
        if self.index + 1 < devices.len() {
            self.index += 1;
            return Advance::Activate {
                device_id: devices[self.index],
                delay: None,
            };
        }

        if self.round >= self.total_rounds {
            return Advance::Finish(FinishReason::Completed);
        }

        self.round += 1;
        self.index = 0;
        log::info!("Sequential: starting round {}/{}", self.round, self.total_rounds);
        match devices.first() {
            Some(&device_id) => Advance::Activate {
                device_id,
                delay: Some(self.round_pause),
            },
            None => Advance::Finish(FinishReason::Completed),
        }
    }

    fn cursor(&self) -> Option<RoundCursor> {
        Some(RoundCursor {
            round: self.round,
            total_rounds: self.total_rounds,
            index: self.index,
        })
    }
}

pub struct RandomPolicy {
    duration: Duration,
    started_at: Instant,
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(duration_seconds: u32) -> Self {
        Self::with_rng(duration_seconds, StdRng::from_os_rng())
    }

    /// Deterministic selection sequence (used by replays and tests).
    pub fn with_seed(duration_seconds: u32, seed: u64) -> Self {
        Self::with_rng(duration_seconds, StdRng::seed_from_u64(seed))
    }

    fn with_rng(duration_seconds: u32, rng: StdRng) -> Self {
        Self {
            duration: Duration::from_secs(u64::from(duration_seconds)),
            started_at: Instant::now(),
            rng,
        }
    }

    /// Measure the budget from `started_at` instead of construction time.
    pub fn started_at(mut self, started_at: Instant) -> Self {
        self.started_at = started_at;
        self
    }

    fn pick(&mut self, devices: &[u8]) -> Advance {
        if devices.is_empty() {
            return Advance::Finish(FinishReason::DurationElapsed);
        }
        // With replacement: the same device may come up twice in a row.
        let device_id = devices[self.rng.random_range(0..devices.len())];
        Advance::Activate {
            device_id,
            delay: None,
        }
    }
}

impl AdvancePolicy for RandomPolicy {
    fn mode(&self) -> TestMode {
        TestMode::Random
    }

    fn first(&mut self, devices: &[u8]) -> Advance {
        self.pick(devices)
    }

    fn next(&mut self, devices: &[u8]) -> Advance {
        self.pick(devices)
    }

    fn needs_ticks(&self) -> bool {
        true
    }

    fn expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) >= self.duration
    }

    fn elapsed_seconds(&self, now: Instant) -> Option<u32> {
        let elapsed = now.saturating_duration_since(self.started_at).as_secs();
        Some(u32::try_from(elapsed).unwrap_or(u32::MAX))
    }
}

pub struct ManualPolicy;

impl AdvancePolicy for ManualPolicy {
    fn mode(&self) -> TestMode {
        TestMode::Manual
    }

    fn first(&mut self, _devices: &[u8]) -> Advance {
        Advance::Wait
    }

    fn next(&mut self, _devices: &[u8]) -> Advance {
        Advance::Wait
    }
}

/// Build the policy for `params`. `seed` pins the random sequence and
/// `started_at` anchors the random mode's time budget.
pub fn build_policy(
    params: ModeParams,
    round_pause: Duration,
    seed: Option<u64>,
    started_at: Instant,
) -> Box<dyn AdvancePolicy> {
    match params {
        ModeParams::Sequential { total_rounds } => Box::new(SequentialPolicy::new(total_rounds, round_pause)),
        ModeParams::Random { duration_seconds } => match seed {
            Some(seed) => Box::new(RandomPolicy::with_seed(duration_seconds, seed).started_at(started_at)),
            None => Box::new(RandomPolicy::new(duration_seconds).started_at(started_at)),
        },
        ModeParams::Manual => Box::new(ManualPolicy),
    }
}
