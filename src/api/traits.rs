/// Boundary traits for the external collaborators
///
/// The session engine only talks to the outside world through these traits.
/// [`crate::api::http::HttpBackend`] implements both against the REST backend;
/// [`crate::protocol::mqtt::MqttCommandPublisher`] is an alternative
/// [`CommandSink`] publishing straight to the broker.
use anyhow::Result;

use super::types::{DeviceCommand, TestMode};
use crate::core::stats::StatsSnapshot;

/// Delivers one addressed command to the transport.
pub trait CommandSink: Send {
    /// Hand the command to the transport. No retries are expected here.
    fn send_command(&self, command: &DeviceCommand) -> Result<()>;
}

/// Remote bookkeeping of session records.
///
/// Both calls block the engine thread, so no other input is processed until
/// they return. Implementations must bound each request (`HttpBackend` uses
/// `backend.request_timeout_ms`). Inputs queued meanwhile are handled once
/// the call ends.
pub trait SessionBackend: Send {
    /// Register a new session and return its opaque id.
    fn register_session(&self, mode: TestMode, subject_id: &str) -> Result<String>;

    /// Close the record with the final counters.
    fn finalize_session(&self, session_id: &str, stats: &StatsSnapshot) -> Result<()>;
}

/// Backend that keeps everything local (useful for dry runs and testing)
pub struct OfflineBackend {
    counter: std::sync::atomic::AtomicU64,
}

impl OfflineBackend {
    pub fn new() -> Self {
        Self {
            counter: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

impl Default for OfflineBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionBackend for OfflineBackend {
    fn register_session(&self, mode: TestMode, subject_id: &str) -> Result<String> {
        let n = self
            .counter
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        log::info!("Offline backend: registered {mode} session #{n} for subject {subject_id}");
        Ok(format!("local-{n}"))
    }

    fn finalize_session(&self, session_id: &str, stats: &StatsSnapshot) -> Result<()> {
        log::info!("Offline backend: finalized {session_id} with {stats}");
        Ok(())
    }
}

/// Logging sink that drops commands (useful for dry runs and testing)
pub struct LoggingSink;

impl CommandSink for LoggingSink {
    fn send_command(&self, command: &DeviceCommand) -> Result<()> {
        log::info!(
            "Command (not delivered): device={}, command={}, seq={}",
            command.device_id,
            command.command,
            command.seq
        );
        Ok(())
    }
}
