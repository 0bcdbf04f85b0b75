/// Engine thread
///
/// A single loop owns the [`SessionEngine`] and feeds it operator commands,
/// gateway events and timer wakeups from one channel, in arrival order.
use anyhow::{anyhow, Result};
use std::thread::JoinHandle;

use super::{
    bus::{EngineInput, EngineNotice, OperatorCommand},
    session::SessionEngine,
};

/// Apply one input to the engine. Returns false once the loop should stop.
pub fn handle_input(engine: &mut SessionEngine, input: EngineInput) -> bool {
    match input {
        EngineInput::Operator(command) => handle_operator(engine, command),
        EngineInput::Gateway(event) => engine.handle_gateway_event(event),
        EngineInput::Wakeup(wakeup) => engine.handle_wakeup(wakeup),
        EngineInput::Quit => {
            log::info!("Received quit signal");
            engine.finalize();
            engine.notify(EngineNotice::Stopped);
            return false;
        }
    }
    true
}

fn handle_operator(engine: &mut SessionEngine, command: OperatorCommand) {
    let (action, result) = match command {
        OperatorCommand::Start(request) => ("start", engine.start(request).map(|_| ())),
        OperatorCommand::Activate(device_id) => ("activate", engine.manual_activate(device_id)),
        OperatorCommand::Finalize => {
            if engine.finalize().is_none() {
                engine.notify(EngineNotice::info("no session to finalize"));
            }
            return;
        }
        OperatorCommand::Status => {
            engine.notify(EngineNotice::Status(engine.view()));
            return;
        }
    };

    if let Err(err) = result {
        log::warn!("Operator {action} rejected: {err}");
        engine.notify(EngineNotice::Rejected {
            action: action.to_string(),
            reason: err.to_string(),
        });
    }
}

/// Run until [`EngineInput::Quit`] arrives or every sender is gone.
pub fn run_engine_loop(input_rx: flume::Receiver<EngineInput>, mut engine: SessionEngine) -> Result<()> {
    while let Ok(input) = input_rx.recv() {
        if !handle_input(&mut engine, input) {
            return Ok(());
        }
    }

    log::info!("Input channel closed, stopping engine");
    engine.finalize();
    engine.notify(EngineNotice::Stopped);
    Ok(())
}

pub fn spawn_engine_thread(
    input_rx: flume::Receiver<EngineInput>,
    engine: SessionEngine,
) -> Result<JoinHandle<Result<()>>> {
    std::thread::Builder::new()
        .name("session-engine".to_string())
        .spawn(move || run_engine_loop(input_rx, engine))
        .map_err(|err| anyhow!("Failed to spawn engine thread: {err}"))
}
