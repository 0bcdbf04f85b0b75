/// Binding inbound device answers to the outstanding command
///
/// The command slot is an explicit state: `Idle`, `Awaiting` an answer, or
/// `Resolving` while the engine records an outcome. Only an `Awaiting` slot
/// accepts an answer, so a duplicate delivery of the same answer finds the
/// slot `Resolving` (or already `Idle`) and is dropped.
use chrono::{DateTime, Local};
use derive_more::Display;

use crate::protocol::payload::{parse_answer, DeviceAnswer, EventKind};

/// The single in-flight command of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutstandingCommand {
    pub device_id: u8,
    pub seq: u64,
    pub issued_at: DateTime<Local>,
    /// Token of the armed reaction timeout.
    pub timeout_token: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandSlot {
    #[default]
    Idle,
    Awaiting(OutstandingCommand),
    Resolving(OutstandingCommand),
}

impl CommandSlot {
    pub fn is_idle(&self) -> bool {
        matches!(self, CommandSlot::Idle)
    }

    pub fn outstanding(&self) -> Option<&OutstandingCommand> {
        match self {
            CommandSlot::Idle => None,
            CommandSlot::Awaiting(cmd) | CommandSlot::Resolving(cmd) => Some(cmd),
        }
    }

    /// Move `Awaiting` to `Resolving` when `accept` holds for the command.
    pub fn begin_resolving(
        &mut self,
        accept: impl FnOnce(&OutstandingCommand) -> bool,
    ) -> Option<OutstandingCommand> {
        match *self {
            CommandSlot::Awaiting(cmd) if accept(&cmd) => {
                *self = CommandSlot::Resolving(cmd);
                Some(cmd)
            }
            _ => None,
        }
    }

    pub fn clear(&mut self) {
        *self = CommandSlot::Idle;
    }
}

/// Why an inbound event did not resolve anything.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    #[display("not an answer event")]
    NotAnAnswer,
    #[display("no outstanding command")]
    NoOutstanding,
    #[display("outstanding command is for device {_0}")]
    OtherDevice(u8),
    #[display("answer seq {got} does not match outstanding seq {expected}")]
    SeqMismatch { expected: u64, got: u64 },
    #[display("outcome already being recorded")]
    AlreadyResolving,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Correlation {
    Matched {
        command: OutstandingCommand,
        answer: DeviceAnswer,
    },
    Ignored(IgnoreReason),
}

/// Try to resolve the slot with an inbound event from `device_id`.
pub fn correlate(slot: &mut CommandSlot, device_id: u8, kind: &EventKind, payload: &str) -> Correlation {
    if !kind.is_answer() {
        return Correlation::Ignored(IgnoreReason::NotAnAnswer);
    }

    let cmd = match slot {
        CommandSlot::Idle => return Correlation::Ignored(IgnoreReason::NoOutstanding),
        CommandSlot::Resolving(_) => return Correlation::Ignored(IgnoreReason::AlreadyResolving),
        CommandSlot::Awaiting(cmd) => *cmd,
    };

    if cmd.device_id != device_id {
        return Correlation::Ignored(IgnoreReason::OtherDevice(cmd.device_id));
    }

    let answer = parse_answer(payload);
    if let Some(got) = answer.seq {
        if got != cmd.seq {
            return Correlation::Ignored(IgnoreReason::SeqMismatch {
                expected: cmd.seq,
                got,
            });
        }
    }

    match slot.begin_resolving(|c| c.device_id == device_id) {
        Some(command) => Correlation::Matched { command, answer },
        None => Correlation::Ignored(IgnoreReason::AlreadyResolving),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::Outcome;

    fn awaiting(device_id: u8, seq: u64) -> CommandSlot {
        CommandSlot::Awaiting(OutstandingCommand {
            device_id,
            seq,
            issued_at: Local::now(),
            timeout_token: 1,
        })
    }

    #[test]
    fn test_matching_answer_resolves_once() {
        let mut slot = awaiting(2, 5);

        let first = correlate(&mut slot, 2, &EventKind::Response, "acierto en 0.9s");
        match first {
            Correlation::Matched { command, answer } => {
                assert_eq!(command.device_id, 2);
                assert_eq!(answer.outcome, Outcome::Success);
            }
            other => panic!("expected a match, got {other:?}"),
        }
        assert!(matches!(slot, CommandSlot::Resolving(_)));

        let duplicate = correlate(&mut slot, 2, &EventKind::Response, "acierto en 0.9s");
        assert_eq!(duplicate, Correlation::Ignored(IgnoreReason::AlreadyResolving));
    }

    #[test]
    fn test_stale_events_leave_slot_untouched() {
        let mut slot = awaiting(2, 5);
        let before = slot;

        assert_eq!(
            correlate(&mut slot, 3, &EventKind::Response, "acierto"),
            Correlation::Ignored(IgnoreReason::OtherDevice(2))
        );
        assert_eq!(
            correlate(&mut slot, 2, &EventKind::Status, "acierto"),
            Correlation::Ignored(IgnoreReason::NotAnAnswer)
        );
        assert_eq!(
            correlate(&mut slot, 2, &EventKind::Response, r#"{"message":"acierto","seq":4}"#),
            Correlation::Ignored(IgnoreReason::SeqMismatch { expected: 5, got: 4 })
        );
        assert_eq!(slot, before);

        let mut idle = CommandSlot::Idle;
        assert_eq!(
            correlate(&mut idle, 2, &EventKind::Response, "acierto"),
            Correlation::Ignored(IgnoreReason::NoOutstanding)
        );
    }

    #[test]
    fn test_malformed_answer_is_failure() {
        let mut slot = awaiting(1, 1);
        match correlate(&mut slot, 1, &EventKind::ResultPayload, "{not json") {
            Correlation::Matched { answer, .. } => assert_eq!(answer.outcome, Outcome::Failure),
            other => panic!("expected a match, got {other:?}"),
        }
    }
}
