use serde::Serialize;

use super::{
    session::{SessionRequest, SessionSummary, SessionView},
    stats::StatsSnapshot,
    timer::Wakeup,
};
use crate::{
    api::types::TestMode,
    protocol::{gateway::GatewayEvent, payload::Outcome},
};

/// Operator actions, mapped 1:1 onto engine operations.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    Start(SessionRequest),
    /// Manual mode: trigger one device.
    Activate(u8),
    /// End or abort the running session.
    Finalize,
    /// Publish the current session view.
    Status,
}

/// Everything the engine thread reacts to, processed strictly one at a time.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineInput {
    Operator(OperatorCommand),
    Gateway(GatewayEvent),
    Wakeup(Wakeup),
    /// Finalize any running session and stop the loop.
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Warning,
}

/// Operator-facing notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notice", rename_all = "snake_case")]
pub enum EngineNotice {
    SessionStarted {
        session_id: String,
        mode: TestMode,
    },
    DeviceActivated {
        device_id: u8,
        seq: u64,
    },
    OutcomeRecorded {
        device_id: u8,
        outcome: Outcome,
        stats: StatsSnapshot,
    },
    RoundCompleted {
        round: u32,
        total_rounds: u32,
    },
    /// A synchronous rejection; nothing changed.
    Rejected {
        action: String,
        reason: String,
    },
    /// Transient notification (delivery failures, remote call failures, ...)
    Message {
        level: NoticeLevel,
        text: String,
    },
    SessionFinished(SessionSummary),
    Status(SessionView),
    /// The engine loop stopped.
    Stopped,
}

impl EngineNotice {
    pub fn warning(text: impl Into<String>) -> Self {
        Self::Message {
            level: NoticeLevel::Warning,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::Message {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_notices_carry_their_level() -> anyhow::Result<()> {
        let line = serde_json::to_string(&EngineNotice::warning("device 3 unreachable"))?;
        assert_eq!(
            line,
            r#"{"notice":"message","level":"warning","text":"device 3 unreachable"}"#
        );
        assert_eq!(
            EngineNotice::info("idle"),
            EngineNotice::Message {
                level: NoticeLevel::Info,
                text: "idle".to_string(),
            }
        );
        Ok(())
    }
}
