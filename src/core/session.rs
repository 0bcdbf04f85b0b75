/// Test session state machine
///
/// `Idle -> Starting -> Active(mode) -> Finalizing -> Idle`. The engine owns
/// every piece of session state and is driven by three kinds of input:
/// operator calls, gateway events and timer wakeups. Each input is handled to
/// completion before the next one, so no locking is involved; the command
/// slot (see [`CommandSlot`]) is what keeps a duplicate answer from being
/// counted twice.
use chrono::{DateTime, Local};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{
    bus::EngineNotice,
    correlator::{correlate, CommandSlot, Correlation, IgnoreReason, OutstandingCommand},
    dispatcher::CommandDispatcher,
    error::SessionError,
    monitor::{MonitorEntry, MonitorKind, MonitorLog},
    policy::{build_policy, Advance, AdvancePolicy, FinishReason, ModeParams, RoundCursor},
    stats::{Statistics, StatsSnapshot},
    timeout::TimeoutSupervisor,
    timer::{Timer, TimerHandle, Wakeup},
};
use crate::{
    api::{traits::SessionBackend, types::TestMode},
    protocol::{
        device::DeviceRoster,
        gateway::GatewayEvent,
        payload::{EventKind, Outcome},
    },
};

/// Operator request to start a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    pub params: ModeParams,
    /// Opaque reference to the player under test.
    pub subject_id: String,
    pub selected_devices: Vec<u8>,
    pub reaction_timeout_ms: u64,
}

/// Timing and command settings of the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay before the first activation so subscriptions can settle.
    pub settle_delay: Duration,
    /// Pause between sequential rounds.
    pub round_pause: Duration,
    /// Wall-clock tick used by duration-bounded modes.
    pub tick_interval: Duration,
    pub start_command: String,
    /// Pins the random mode's device sequence.
    pub random_seed: Option<u64>,
    pub monitor_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1000),
            round_pause: Duration::from_millis(2000),
            tick_interval: Duration::from_millis(1000),
            start_command: "start".to_string(),
            random_seed: None,
            monitor_capacity: 500,
        }
    }
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", content = "mode", rename_all = "snake_case")]
pub enum SessionPhase {
    #[display("idle")]
    Idle,
    #[display("starting")]
    Starting,
    #[display("{_0} active")]
    Active(TestMode),
    #[display("finalizing")]
    Finalizing,
}

/// Final record of a session, kept after it ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub mode: TestMode,
    pub subject_id: String,
    pub stats: StatsSnapshot,
    pub reason: FinishReason,
    /// Whether the backend accepted the finalize call.
    pub remote_closed: bool,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

/// Display snapshot of the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub phase: SessionPhase,
    pub session_id: Option<String>,
    pub selected_devices: Vec<u8>,
    pub active_device: Option<u8>,
    pub cursor: Option<RoundCursor>,
    pub elapsed_seconds: Option<u32>,
    pub stats: StatsSnapshot,
}

struct ActiveSession {
    /// Engine-local number; tags every wakeup scheduled for this session.
    key: u64,
    session_id: String,
    subject_id: String,
    selected: Vec<u8>,
    reaction_timeout: Duration,
    policy: Box<dyn AdvancePolicy>,
    slot: CommandSlot,
    stats: Statistics,
    /// Pending settle, round-pause and tick wakeups.
    scheduled: Vec<(TimerHandle, Wakeup)>,
    started_at: DateTime<Local>,
}

pub struct SessionEngine {
    config: EngineConfig,
    roster: DeviceRoster,
    dispatcher: CommandDispatcher,
    backend: Box<dyn SessionBackend>,
    timer: Box<dyn Timer>,
    timeouts: TimeoutSupervisor,
    monitor: MonitorLog,
    notices: flume::Sender<EngineNotice>,
    phase: SessionPhase,
    session: Option<ActiveSession>,
    next_key: u64,
    last_summary: Option<SessionSummary>,
}

impl SessionEngine {
    pub fn new(
        config: EngineConfig,
        roster: DeviceRoster,
        dispatcher: CommandDispatcher,
        backend: Box<dyn SessionBackend>,
        timer: Box<dyn Timer>,
        notices: flume::Sender<EngineNotice>,
    ) -> Self {
        let monitor = MonitorLog::new(config.monitor_capacity);
        Self {
            config,
            roster,
            dispatcher,
            backend,
            timer,
            timeouts: TimeoutSupervisor::new(),
            monitor,
            notices,
            phase: SessionPhase::Idle,
            session: None,
            next_key: 0,
            last_summary: None,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn roster(&self) -> &DeviceRoster {
        &self.roster
    }

    pub fn monitor(&self) -> &MonitorLog {
        &self.monitor
    }

    pub fn last_summary(&self) -> Option<&SessionSummary> {
        self.last_summary.as_ref()
    }

    pub fn stats(&self) -> Option<StatsSnapshot> {
        self.session.as_ref().map(|s| s.stats.snapshot())
    }

    pub fn outstanding(&self) -> Option<OutstandingCommand> {
        self.session
            .as_ref()
            .and_then(|s| s.slot.outstanding().copied())
    }

    pub fn view(&self) -> SessionView {
        match &self.session {
            Some(session) => SessionView {
                phase: self.phase,
                session_id: Some(session.session_id.clone()),
                selected_devices: session.selected.clone(),
                active_device: session.slot.outstanding().map(|c| c.device_id),
                cursor: session.policy.cursor(),
                elapsed_seconds: session.policy.elapsed_seconds(self.timer.now()),
                stats: session.stats.snapshot(),
            },
            None => SessionView {
                phase: self.phase,
                session_id: None,
                selected_devices: Vec::new(),
                active_device: None,
                cursor: None,
                elapsed_seconds: None,
                stats: StatsSnapshot::default(),
            },
        }
    }

    pub(crate) fn notify(&self, notice: EngineNotice) {
        if self.notices.send(notice).is_err() {
            log::debug!("Notice dropped: no receiver");
        }
    }

    fn validate(&self, request: &SessionRequest) -> Result<Vec<u8>, SessionError> {
        if request.subject_id.trim().is_empty() {
            return Err(SessionError::validation("a subject is required"));
        }
        if request.selected_devices.is_empty() {
            return Err(SessionError::validation("select at least one device"));
        }
        if request.reaction_timeout_ms == 0 {
            return Err(SessionError::validation("reaction timeout must be positive"));
        }
        request.params.validate()?;

        let mut selected = Vec::with_capacity(request.selected_devices.len());
        for &id in &request.selected_devices {
            if !self.roster.contains(id) {
                return Err(SessionError::validation(format!(
                    "device {id} is not part of the roster"
                )));
            }
            if !selected.contains(&id) {
                selected.push(id);
            }
        }
        Ok(selected)
    }

    /// Register and start a session. Only one session may run at a time.
    pub fn start(&mut self, request: SessionRequest) -> Result<String, SessionError> {
        if self.phase != SessionPhase::Idle {
            return Err(SessionError::invalid(format!(
                "cannot start a session while {}",
                self.phase
            )));
        }
        let selected = self.validate(&request)?;
        let mode = request.params.mode();

        self.phase = SessionPhase::Starting;
        log::info!(
            "Starting {mode} session for subject {} on devices {selected:?}",
            request.subject_id
        );

        let session_id = match self.backend.register_session(mode, &request.subject_id) {
            Ok(id) => id,
            Err(e) => {
                self.phase = SessionPhase::Idle;
                log::error!("Session registration failed: {e}");
                return Err(SessionError::RemoteRegistration(e.to_string()));
            }
        };

        self.next_key += 1;
        let key = self.next_key;
        let policy = build_policy(
            request.params,
            self.config.round_pause,
            self.config.random_seed,
            self.timer.now(),
        );
        let needs_ticks = policy.needs_ticks();

        self.roster.reset_transient();
        self.session = Some(ActiveSession {
            key,
            session_id: session_id.clone(),
            subject_id: request.subject_id,
            selected,
            reaction_timeout: Duration::from_millis(request.reaction_timeout_ms),
            policy,
            slot: CommandSlot::Idle,
            stats: Statistics::new(),
            scheduled: Vec::new(),
            started_at: Local::now(),
        });
        self.phase = SessionPhase::Active(mode);

        log::info!("Session {session_id} active ({mode})");
        self.monitor.push(MonitorEntry::new(
            None,
            MonitorKind::Session,
            format!("session {session_id} started ({mode})"),
        ));
        self.notify(EngineNotice::SessionStarted {
            session_id: session_id.clone(),
            mode,
        });

        if needs_ticks {
            self.schedule(Wakeup::Tick { session: key }, self.config.tick_interval);
        }

        let first = match self.session.as_mut() {
            Some(session) => session.policy.first(&session.selected),
            None => Advance::Wait,
        };
        // The first activation always waits for the settle delay.
        let first = match first {
            Advance::Activate { device_id, .. } => Advance::Activate {
                device_id,
                delay: Some(self.config.settle_delay),
            },
            other => other,
        };
        self.apply(first);

        Ok(session_id)
    }

    /// Manual mode: trigger `device_id`.
    pub fn manual_activate(&mut self, device_id: u8) -> Result<(), SessionError> {
        let Some(session) = self.session.as_ref() else {
            return Err(SessionError::invalid("no session is running"));
        };
        if self.phase != SessionPhase::Active(TestMode::Manual) {
            return Err(SessionError::invalid(format!(
                "manual activation is not available while {}",
                self.phase
            )));
        }
        if !session.selected.contains(&device_id) {
            return Err(SessionError::invalid(format!(
                "device {device_id} is not selected for this session"
            )));
        }
        if let Some(cmd) = session.slot.outstanding() {
            return Err(SessionError::invalid(format!(
                "device {} is still waiting for an answer",
                cmd.device_id
            )));
        }
        self.activate(device_id)
    }

    /// End or abort the running session. A no-op when idle.
    pub fn finalize(&mut self) -> Option<SessionSummary> {
        self.finish(FinishReason::Operator)
    }

    /// Route one gateway event. Roster bookkeeping happens regardless of
    /// session state; only a matching answer touches the session.
    pub fn handle_gateway_event(&mut self, event: GatewayEvent) {
        match event {
            GatewayEvent::SubscriptionSucceeded { device_id } => {
                self.roster.set_connected(device_id, true);
                log::info!("Device {device_id} channel subscribed");
                self.monitor.push(MonitorEntry::new(
                    Some(device_id),
                    MonitorKind::Subscription { connected: true },
                    "subscription succeeded",
                ));
            }
            GatewayEvent::SubscriptionError { device_id, reason } => {
                self.roster.set_connected(device_id, false);
                log::warn!("Device {device_id} subscription error: {reason}");
                self.monitor.push(MonitorEntry::new(
                    Some(device_id),
                    MonitorKind::Subscription { connected: false },
                    reason,
                ));
            }
            GatewayEvent::Message {
                device_id,
                event,
                payload,
                received_at,
            } => self.on_message(device_id, &event, &payload, received_at),
        }
    }

    fn on_message(&mut self, device_id: u8, event: &str, payload: &str, received_at: DateTime<Local>) {
        self.roster.touch(device_id, received_at);
        let kind = EventKind::parse(event);
        if kind.is_answer() {
            self.roster.set_last_response(device_id, payload);
        }
        self.monitor.push(MonitorEntry::new(
            Some(device_id),
            MonitorKind::Inbound {
                event: event.to_string(),
            },
            payload,
        ));

        if !matches!(self.phase, SessionPhase::Active(_)) {
            return;
        }
        let Some(session) = self.session.as_mut() else {
            return;
        };

        match correlate(&mut session.slot, device_id, &kind, payload) {
            Correlation::Matched { command, answer } => {
                self.timeouts.disarm(self.timer.as_mut(), session.key);
                log::info!(
                    "Device {device_id} answered seq {} with {} ({:?})",
                    command.seq,
                    answer.outcome,
                    answer.text
                );
                self.resolve(command, answer.outcome);
            }
            Correlation::Ignored(IgnoreReason::NotAnAnswer) => {}
            Correlation::Ignored(reason) => {
                log::debug!("Ignoring event from device {device_id}: {reason}");
                self.monitor.push(MonitorEntry::new(
                    Some(device_id),
                    MonitorKind::Stale,
                    reason.to_string(),
                ));
            }
        }
    }

    /// Route one timer wakeup. Wakeups of finished sessions are dropped.
    pub fn handle_wakeup(&mut self, wakeup: Wakeup) {
        let Some(session) = self.session.as_mut() else {
            log::debug!("Dropping wakeup without session: {wakeup:?}");
            return;
        };
        if session.key != wakeup.session() {
            log::debug!("Dropping wakeup of a previous session: {wakeup:?}");
            return;
        }
        if let Some(pos) = session.scheduled.iter().position(|(_, w)| *w == wakeup) {
            session.scheduled.swap_remove(pos);
        }

        match wakeup {
            Wakeup::CommandTimeout {
                session: key,
                device_id,
                token,
            } => {
                if !self.timeouts.claim(key, device_id, token) {
                    log::debug!("Dropping stale timeout for device {device_id} (token {token})");
                    return;
                }
                let claimed = session
                    .slot
                    .begin_resolving(|c| c.device_id == device_id && c.timeout_token == token);
                match claimed {
                    Some(command) => {
                        log::info!("Device {device_id} timed out (seq {})", command.seq);
                        self.monitor.push(MonitorEntry::new(
                            Some(device_id),
                            MonitorKind::Timeout { seq: command.seq },
                            format!("no answer within {:?}", session.reaction_timeout),
                        ));
                        self.resolve(command, Outcome::Failure);
                    }
                    None => log::warn!("Timeout for device {device_id} found no matching command"),
                }
            }
            Wakeup::Activate { device_id, .. } => {
                if !session.slot.is_idle() {
                    log::warn!("Skipping scheduled activation of device {device_id}: a command is outstanding");
                    return;
                }
                if session.policy.expired(self.timer.now()) {
                    self.finish(FinishReason::DurationElapsed);
                    return;
                }
                if let Err(e) = self.activate(device_id) {
                    log::error!("Scheduled activation of device {device_id} failed: {e}");
                }
            }
            Wakeup::Tick { session: key } => {
                if !session.policy.expired(self.timer.now()) {
                    self.schedule(Wakeup::Tick { session: key }, self.config.tick_interval);
                    return;
                }
                log::info!("Session duration elapsed");
                if session.slot.is_idle() {
                    self.finish(FinishReason::DurationElapsed);
                }
                // Otherwise the outstanding command resolves first and the
                // run ends on the next advancement.
            }
        }
    }

    fn schedule(&mut self, wakeup: Wakeup, delay: Duration) {
        let handle = self.timer.schedule(delay, wakeup);
        if let Some(session) = self.session.as_mut() {
            session.scheduled.push((handle, wakeup));
        }
    }

    fn apply(&mut self, advance: Advance) {
        let Some(key) = self.session.as_ref().map(|s| s.key) else {
            return;
        };
        match advance {
            Advance::Activate {
                device_id,
                delay: Some(delay),
            } if !delay.is_zero() => {
                log::debug!("Activation of device {device_id} scheduled in {delay:?}");
                self.schedule(Wakeup::Activate { session: key, device_id }, delay);
            }
            Advance::Activate { device_id, .. } => {
                if let Err(e) = self.activate(device_id) {
                    log::error!("Activation of device {device_id} failed: {e}");
                }
            }
            Advance::Wait => {}
            Advance::Finish(reason) => {
                self.finish(reason);
            }
        }
    }

    /// Shared activation procedure: disarm, mark active, dispatch, arm.
    fn activate(&mut self, device_id: u8) -> Result<(), SessionError> {
        let Some(session) = self.session.as_mut() else {
            return Err(SessionError::invalid("no session is running"));
        };
        if let Some(cmd) = session.slot.outstanding() {
            return Err(SessionError::invalid(format!(
                "device {} is still waiting for an answer",
                cmd.device_id
            )));
        }

        self.timeouts.disarm(self.timer.as_mut(), session.key);
        self.roster.mark_active(device_id);

        let seq = match self
            .dispatcher
            .send(&self.roster, device_id, &self.config.start_command)
        {
            Ok(seq) => seq,
            Err(e) => {
                // The timeout below still resolves this command as a failure.
                let seq = self.dispatcher.last_seq();
                log::warn!("{e}");
                self.monitor.push(MonitorEntry::new(
                    Some(device_id),
                    MonitorKind::DeliveryFailure { seq },
                    e.to_string(),
                ));
                if self.notices.send(EngineNotice::warning(e.to_string())).is_err() {
                    log::debug!("Notice dropped: no receiver");
                }
                seq
            }
        };

        let token = self.timeouts.arm(
            self.timer.as_mut(),
            session.key,
            device_id,
            session.reaction_timeout,
        );
        session.slot = CommandSlot::Awaiting(OutstandingCommand {
            device_id,
            seq,
            issued_at: Local::now(),
            timeout_token: token,
        });

        log::info!("Device {device_id} activated (seq {seq})");
        self.monitor.push(MonitorEntry::new(
            Some(device_id),
            MonitorKind::Activation { seq },
            self.config.start_command.clone(),
        ));
        self.notify(EngineNotice::DeviceActivated { device_id, seq });
        Ok(())
    }

    /// Record an outcome for the resolving command, then advance.
    fn resolve(&mut self, command: OutstandingCommand, outcome: Outcome) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        debug_assert!(matches!(session.slot, CommandSlot::Resolving(_)));

        session.stats.record_outcome(outcome);
        let stats = session.stats.snapshot();
        session.slot.clear();
        self.roster.clear_active();

        log::info!("Outcome for device {}: {outcome} ({stats})", command.device_id);
        let round_before = session.policy.cursor();
        let advance = if session.policy.expired(self.timer.now()) {
            Advance::Finish(FinishReason::DurationElapsed)
        } else {
            session.policy.next(&session.selected)
        };
        let round_after = session.policy.cursor();

        self.notify(EngineNotice::OutcomeRecorded {
            device_id: command.device_id,
            outcome,
            stats,
        });
        let finished_round = match (round_before, round_after) {
            (Some(before), Some(after)) if after.round > before.round => Some(before),
            (Some(before), _) if advance == Advance::Finish(FinishReason::Completed) => Some(before),
            _ => None,
        };
        if let Some(cursor) = finished_round {
            self.notify(EngineNotice::RoundCompleted {
                round: cursor.round,
                total_rounds: cursor.total_rounds,
            });
        }

        self.apply(advance);
    }

    /// Tear down the session: timers, command, cursors and roster display
    /// state first, then the best-effort remote finalize.
    fn finish(&mut self, reason: FinishReason) -> Option<SessionSummary> {
        let session = self.session.take()?;
        self.phase = SessionPhase::Finalizing;
        let mode = session.policy.mode();
        log::info!("Finalizing session {} ({reason})", session.session_id);

        self.timeouts.disarm(self.timer.as_mut(), session.key);
        for (handle, _) in &session.scheduled {
            self.timer.cancel(*handle);
        }
        self.roster.reset_transient();

        let stats = session.stats.snapshot();
        let remote_closed = match self.backend.finalize_session(&session.session_id, &stats) {
            Ok(()) => true,
            Err(e) => {
                let err = SessionError::RemoteFinalize(e.to_string());
                log::warn!("{err}");
                self.notify(EngineNotice::warning(err.to_string()));
                false
            }
        };

        let summary = SessionSummary {
            session_id: session.session_id,
            mode,
            subject_id: session.subject_id,
            stats,
            reason,
            remote_closed,
            started_at: session.started_at,
            finished_at: Local::now(),
        };
        self.monitor.push(MonitorEntry::new(
            None,
            MonitorKind::Session,
            format!("session {} finished: {stats}", summary.session_id),
        ));
        self.last_summary = Some(summary.clone());
        self.notify(EngineNotice::SessionFinished(summary.clone()));
        self.phase = SessionPhase::Idle;
        Some(summary)
    }
}
