/// Session orchestration for reflex_hub
///
/// This module contains the transport-independent logic:
/// - Command dispatch and answer correlation
/// - Reaction timeouts on an abstract timer
/// - The session state machine and its advancement policies
/// - Statistics and the device monitor log
/// - The engine thread and its message bus
///
/// Transports (MQTT, HTTP) plug in through the traits in [`crate::api`].
pub mod bus;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod runtime;
pub mod session;
pub mod stats;
pub mod timeout;
pub mod timer;

pub use bus::{EngineInput, EngineNotice, OperatorCommand};
pub use error::SessionError;
pub use policy::{FinishReason, ModeParams};
pub use runtime::{run_engine_loop, spawn_engine_thread};
pub use session::{EngineConfig, SessionEngine, SessionPhase, SessionRequest, SessionSummary, SessionView};
pub use stats::StatsSnapshot;
pub use timer::{Timer, TimerHandle, TokioTimer, Wakeup};
