#![allow(dead_code)]

use anyhow::{anyhow, Result};
use parking_lot::Mutex;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use reflex_hub::{
    api::{
        traits::{CommandSink, SessionBackend},
        types::{DeviceCommand, TestMode},
    },
    core::{
        bus::EngineNotice,
        dispatcher::CommandDispatcher,
        policy::ModeParams,
        session::{EngineConfig, SessionEngine, SessionRequest},
        stats::StatsSnapshot,
        timer::{Timer, TimerHandle, Wakeup},
    },
    protocol::{device::DeviceRoster, gateway::GatewayEvent},
};

/// Command sink remembering everything it was asked to send.
#[derive(Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<DeviceCommand>>>,
    failing: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<DeviceCommand> {
        self.sent.lock().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock() = failing;
    }
}

impl CommandSink for RecordingSink {
    fn send_command(&self, command: &DeviceCommand) -> Result<()> {
        if *self.failing.lock() {
            return Err(anyhow!("transport unavailable"));
        }
        self.sent.lock().push(command.clone());
        Ok(())
    }
}

#[derive(Default)]
struct BackendState {
    registered: Vec<(TestMode, String)>,
    finalized: Vec<(String, StatsSnapshot)>,
    fail_register: bool,
    fail_finalize: bool,
}

/// Backend with scripted failures and recorded calls.
#[derive(Clone, Default)]
pub struct ScriptedBackend {
    state: Arc<Mutex<BackendState>>,
}

impl ScriptedBackend {
    pub fn fail_register(&self, fail: bool) {
        self.state.lock().fail_register = fail;
    }

    pub fn fail_finalize(&self, fail: bool) {
        self.state.lock().fail_finalize = fail;
    }

    pub fn registered(&self) -> Vec<(TestMode, String)> {
        self.state.lock().registered.clone()
    }

    pub fn finalized(&self) -> Vec<(String, StatsSnapshot)> {
        self.state.lock().finalized.clone()
    }
}

impl SessionBackend for ScriptedBackend {
    fn register_session(&self, mode: TestMode, subject_id: &str) -> Result<String> {
        let mut state = self.state.lock();
        if state.fail_register {
            return Err(anyhow!("backend rejected the session"));
        }
        state.registered.push((mode, subject_id.to_string()));
        Ok(format!("S{}", state.registered.len()))
    }

    fn finalize_session(&self, session_id: &str, stats: &StatsSnapshot) -> Result<()> {
        let mut state = self.state.lock();
        state.finalized.push((session_id.to_string(), *stats));
        if state.fail_finalize {
            return Err(anyhow!("backend unreachable"));
        }
        Ok(())
    }
}

struct PendingWakeup {
    handle: TimerHandle,
    delay: Duration,
    due: Instant,
    wakeup: Wakeup,
}

struct TimerState {
    next_id: u64,
    now: Instant,
    pending: Vec<PendingWakeup>,
    cancelled: Vec<TimerHandle>,
    cancel_calls: usize,
}

/// Timer on a virtual clock that never fires on its own. Tests take pending
/// wakeups and feed them to the engine; taking one moves the clock to its
/// due time.
#[derive(Clone)]
pub struct ManualTimer {
    state: Arc<Mutex<TimerState>>,
}

impl Default for ManualTimer {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(TimerState {
                next_id: 0,
                now: Instant::now(),
                pending: Vec::new(),
                cancelled: Vec::new(),
                cancel_calls: 0,
            })),
        }
    }
}

impl ManualTimer {
    pub fn pending(&self) -> Vec<(Duration, Wakeup)> {
        self.state
            .lock()
            .pending
            .iter()
            .map(|p| (p.delay, p.wakeup))
            .collect()
    }

    /// Cancellations that removed a pending wakeup.
    pub fn cancelled(&self) -> usize {
        self.state.lock().cancelled.len()
    }

    /// Every cancel call, including ones for handles that already fired.
    pub fn cancel_calls(&self) -> usize {
        self.state.lock().cancel_calls
    }

    pub fn clock(&self) -> Instant {
        self.state.lock().now
    }

    /// Remove and return the first pending wakeup matching `pred`.
    pub fn take(&self, pred: impl Fn(&Wakeup) -> bool) -> Option<(Duration, Wakeup)> {
        let mut state = self.state.lock();
        let pos = state.pending.iter().position(|p| pred(&p.wakeup))?;
        let taken = state.pending.remove(pos);
        if taken.due > state.now {
            state.now = taken.due;
        }
        Some((taken.delay, taken.wakeup))
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration, wakeup: Wakeup) -> TimerHandle {
        let mut state = self.state.lock();
        state.next_id += 1;
        let handle = TimerHandle(state.next_id);
        let due = state.now + delay;
        state.pending.push(PendingWakeup {
            handle,
            delay,
            due,
            wakeup,
        });
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        let mut state = self.state.lock();
        state.cancel_calls += 1;
        let before = state.pending.len();
        state.pending.retain(|p| p.handle != handle);
        if state.pending.len() != before {
            state.cancelled.push(handle);
        }
    }

    fn now(&self) -> Instant {
        self.state.lock().now
    }
}

pub fn is_timeout(wakeup: &Wakeup) -> bool {
    matches!(wakeup, Wakeup::CommandTimeout { .. })
}

pub fn is_activation(wakeup: &Wakeup) -> bool {
    matches!(wakeup, Wakeup::Activate { .. })
}

pub fn is_tick(wakeup: &Wakeup) -> bool {
    matches!(wakeup, Wakeup::Tick { .. })
}

/// Engine wired to the fakes above.
pub struct Harness {
    pub engine: SessionEngine,
    pub sink: RecordingSink,
    pub backend: ScriptedBackend,
    pub timer: ManualTimer,
    pub notices: flume::Receiver<EngineNotice>,
}

impl Harness {
    pub fn new(device_count: u8) -> Self {
        let config = EngineConfig {
            random_seed: Some(7),
            ..EngineConfig::default()
        };
        Self::with_config(device_count, config)
    }

    pub fn with_config(device_count: u8, config: EngineConfig) -> Self {
        let sink = RecordingSink::default();
        let backend = ScriptedBackend::default();
        let timer = ManualTimer::default();
        let (tx, notices) = flume::unbounded();
        let engine = SessionEngine::new(
            config,
            DeviceRoster::new(device_count, "esp32-"),
            CommandDispatcher::new(Box::new(sink.clone()), false),
            Box::new(backend.clone()),
            Box::new(timer.clone()),
            tx,
        );
        Self {
            engine,
            sink,
            backend,
            timer,
            notices,
        }
    }

    pub fn start(&mut self, params: ModeParams, devices: &[u8], timeout_ms: u64) -> Result<String> {
        let id = self.engine.start(SessionRequest {
            params,
            subject_id: "player-9".to_string(),
            selected_devices: devices.to_vec(),
            reaction_timeout_ms: timeout_ms,
        })?;
        Ok(id)
    }

    /// Fire the pending delayed activation. Returns the activated device.
    pub fn fire_activation(&mut self) -> Result<u8> {
        let (_, wakeup) = self
            .timer
            .take(is_activation)
            .ok_or_else(|| anyhow!("no activation pending"))?;
        self.engine.handle_wakeup(wakeup);
        match wakeup {
            Wakeup::Activate { device_id, .. } => Ok(device_id),
            _ => Err(anyhow!("unexpected wakeup {wakeup:?}")),
        }
    }

    /// Fire the pending reaction timeout. Returns the wakeup fired.
    pub fn fire_timeout(&mut self) -> Result<Wakeup> {
        let (_, wakeup) = self
            .timer
            .take(is_timeout)
            .ok_or_else(|| anyhow!("no timeout pending"))?;
        self.engine.handle_wakeup(wakeup);
        Ok(wakeup)
    }

    pub fn fire_tick(&mut self) -> Result<()> {
        let (_, wakeup) = self
            .timer
            .take(is_tick)
            .ok_or_else(|| anyhow!("no tick pending"))?;
        self.engine.handle_wakeup(wakeup);
        Ok(())
    }

    pub fn answer(&mut self, device_id: u8, payload: &str) {
        self.engine
            .handle_gateway_event(GatewayEvent::message(device_id, "response", payload));
    }

    pub fn active_device(&self) -> Option<u8> {
        self.engine.outstanding().map(|c| c.device_id)
    }

    pub fn sent_devices(&self) -> Vec<u8> {
        self.sink.sent().iter().map(|c| c.device_id).collect()
    }

    pub fn drain_notices(&self) -> Vec<EngineNotice> {
        self.notices.try_iter().collect()
    }
}

pub fn stats(attempts: u32, successes: u32, failures: u32) -> StatsSnapshot {
    StatsSnapshot {
        attempts,
        successes,
        failures,
    }
}
