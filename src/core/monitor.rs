/// Monitor log for device traffic
///
/// Non-authoritative: entries are kept for display and diagnosis only and
/// never feed back into session state. This is also the only place where a
/// timeout is told apart from an explicit failure answer.
use chrono::{DateTime, Local};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MonitorEntry {
    pub timestamp: DateTime<Local>,
    pub device_id: Option<u8>,
    pub kind: MonitorKind,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorKind {
    /// Any message received on a device channel
    Inbound { event: String },
    /// An inbound answer that did not match the outstanding command
    Stale,
    Activation { seq: u64 },
    Timeout { seq: u64 },
    DeliveryFailure { seq: u64 },
    Subscription { connected: bool },
    Session,
}

impl MonitorEntry {
    pub fn new(device_id: Option<u8>, kind: MonitorKind, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            device_id,
            kind,
            message: message.into(),
        }
    }
}

/// Bounded buffer of recent monitor entries
pub struct MonitorLog {
    entries: Vec<MonitorEntry>,
    max_entries: usize,
}

impl MonitorLog {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_entries: max_entries.max(1),
        }
    }

    pub fn push(&mut self, entry: MonitorEntry) {
        log::debug!(
            "monitor: device={:?} kind={:?} {}",
            entry.device_id,
            entry.kind,
            entry.message
        );
        self.entries.push(entry);

        // Trim oldest entries if we exceed the max
        if self.entries.len() > self.max_entries {
            let excess = self.entries.len() - self.max_entries;
            self.entries.drain(0..excess);
        }
    }

    pub fn entries(&self) -> &[MonitorEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Count entries matching a predicate on their kind.
    pub fn count_where(&self, pred: impl Fn(&MonitorKind) -> bool) -> usize {
        self.entries.iter().filter(|e| pred(&e.kind)).count()
    }
}

impl Default for MonitorLog {
    fn default() -> Self {
        Self::new(500)
    }
}
