use anyhow::{anyhow, bail, Context, Result};
use clap::ArgMatches;
use std::{io::BufRead, str::FromStr, time::Duration};

use super::config::{AppConfig, DispatchRoute};
use crate::{
    api::{
        http::HttpBackend,
        traits::{CommandSink, LoggingSink, OfflineBackend, SessionBackend},
        types::TestMode,
    },
    core::{
        bus::{EngineInput, EngineNotice, OperatorCommand},
        dispatcher::CommandDispatcher,
        policy::ModeParams,
        runtime::spawn_engine_thread,
        session::{SessionEngine, SessionRequest},
        timer::TokioTimer,
    },
    protocol::{
        device::DeviceRoster,
        mqtt::{MqttGateway, MqttSettings},
    },
};

/// Load the configuration file (if any) and apply command line overrides.
pub fn load_config(matches: &ArgMatches) -> Result<AppConfig> {
    let mut config = match matches.get_one::<String>("config") {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(timeout) = matches.get_one::<u64>("timeout-ms") {
        config.session.reaction_timeout_ms = *timeout;
    }
    config.validate()?;
    Ok(config)
}

/// Parse `1,2,3` into device ids.
pub fn parse_device_list(raw: &str) -> Result<Vec<u8>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<u8>()
                .map_err(|err| anyhow!("Invalid device id '{part}': {err}"))
        })
        .collect()
}

/// Build the session request from the command line.
pub fn session_request(matches: &ArgMatches, config: &AppConfig) -> Result<SessionRequest> {
    let mode_name = matches
        .get_one::<String>("mode")
        .map(String::as_str)
        .unwrap_or("sequential");
    let mode = TestMode::from_str(mode_name).map_err(|_| anyhow!("Unknown mode '{mode_name}'"))?;

    let params = match mode {
        TestMode::Sequential => ModeParams::Sequential {
            total_rounds: matches.get_one::<u32>("rounds").copied().unwrap_or(3),
        },
        TestMode::Random => ModeParams::Random {
            duration_seconds: matches.get_one::<u32>("duration").copied().unwrap_or(30),
        },
        TestMode::Manual => ModeParams::Manual,
    };

    let Some(subject_id) = matches.get_one::<String>("subject") else {
        bail!("--subject is required to start a session");
    };

    let selected_devices = match matches.get_one::<String>("devices") {
        Some(raw) => parse_device_list(raw)?,
        None => (1..=config.devices.count).collect(),
    };

    Ok(SessionRequest {
        params,
        subject_id: subject_id.clone(),
        selected_devices,
        reaction_timeout_ms: config.session.reaction_timeout_ms,
    })
}

/// Parse one operator line from stdin. Blank lines yield `None`.
pub fn parse_operator_line(line: &str) -> Option<Result<EngineInput>> {
    let mut parts = line.split_whitespace();
    let verb = parts.next()?.to_ascii_lowercase();
    let input = match verb.as_str() {
        "activate" | "a" => match parts.next().map(str::parse::<u8>) {
            Some(Ok(id)) => Ok(EngineInput::Operator(OperatorCommand::Activate(id))),
            Some(Err(err)) => Err(anyhow!("Invalid device id: {err}")),
            None => Err(anyhow!("Usage: activate <device id>")),
        },
        "finish" | "finalize" => Ok(EngineInput::Operator(OperatorCommand::Finalize)),
        "status" => Ok(EngineInput::Operator(OperatorCommand::Status)),
        "quit" | "exit" => Ok(EngineInput::Quit),
        other => Err(anyhow!("Unknown command '{other}' (activate <id>, finish, status, quit)")),
    };
    Some(input)
}

fn spawn_stdin_reader(input_tx: flume::Sender<EngineInput>) -> Result<()> {
    std::thread::Builder::new()
        .name("operator-stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_operator_line(&line) {
                    Some(Ok(input)) => {
                        if input_tx.send(input).is_err() {
                            break;
                        }
                    }
                    Some(Err(err)) => eprintln!("{err}"),
                    None => {}
                }
            }
            log::debug!("Operator input closed");
        })?;
    Ok(())
}

/// Ask the engine loop to stop. Returns false when the loop is already gone.
fn request_quit(input_tx: &flume::Sender<EngineInput>, why: &str) -> bool {
    match input_tx.send(EngineInput::Quit) {
        Ok(()) => true,
        Err(_) => {
            log::debug!("Engine loop already stopped, dropping quit ({why})");
            false
        }
    }
}

/// Print one notice as a JSON line on stdout.
pub fn print_notice(notice: &EngineNotice) -> Result<()> {
    let line = serde_json::to_string(notice)?;
    println!("{line}");
    Ok(())
}

/// Run one session end to end: gateway, engine thread, operator input and
/// notice output until the engine stops.
pub fn run_session(config: AppConfig, request: SessionRequest, seed: Option<u64>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?;

    let roster = DeviceRoster::new(config.devices.count, &config.devices.channel_prefix);
    let (input_tx, input_rx) = flume::unbounded::<EngineInput>();
    let (notice_tx, notice_rx) = flume::unbounded::<EngineNotice>();

    let settings = MqttSettings::from_url(
        &config.broker.url,
        &config.broker.client_prefix,
        Duration::from_secs(config.broker.keep_alive_secs),
    )?;
    let gateway_tx = input_tx.clone();
    let mut gateway = MqttGateway::spawn(settings, roster.clone(), move |event| {
        if gateway_tx.send(EngineInput::Gateway(event)).is_err() {
            log::debug!("Gateway event dropped: engine stopped");
        }
    })?;

    let http = config.backend.base_url.as_deref().map(|url| {
        HttpBackend::new(url, Duration::from_millis(config.backend.request_timeout_ms))
    });
    let backend: Box<dyn SessionBackend> = match &http {
        Some(http) => Box::new(http.clone()),
        None => {
            log::warn!("No backend configured, session ids are local and results are not reported");
            Box::new(OfflineBackend::new())
        }
    };
    let sink: Box<dyn CommandSink> = match (config.dispatch, http) {
        (DispatchRoute::Mqtt, _) => Box::new(gateway.command_publisher()),
        (DispatchRoute::Http, Some(http)) => Box::new(http),
        (DispatchRoute::Http, None) => Box::new(LoggingSink),
    };

    let timer = TokioTimer::new(runtime.handle().clone(), input_tx.clone());
    let engine = SessionEngine::new(
        config.engine_config(seed),
        roster,
        CommandDispatcher::new(sink, config.backend.include_channel),
        backend,
        Box::new(timer),
        notice_tx,
    );
    let engine_handle = spawn_engine_thread(input_rx, engine)?;

    let ctrlc_tx = input_tx.clone();
    ctrlc::set_handler(move || {
        log::info!("Interrupted, finalizing");
        request_quit(&ctrlc_tx, "interrupt");
    })
    .context("Failed to install Ctrl+C handler")?;

    input_tx
        .send(EngineInput::Operator(OperatorCommand::Start(request)))
        .map_err(|err| anyhow!("Failed to start session: {err}"))?;
    spawn_stdin_reader(input_tx.clone())?;

    let mut exit_error = None;
    for notice in notice_rx.iter() {
        print_notice(&notice)?;
        match notice {
            EngineNotice::Rejected { ref action, ref reason } if action == "start" => {
                exit_error = Some(anyhow!("Session could not start: {reason}"));
                request_quit(&input_tx, "start rejected");
            }
            EngineNotice::SessionFinished(_) => {
                request_quit(&input_tx, "session finished");
            }
            EngineNotice::Stopped => break,
            _ => {}
        }
    }

    gateway.stop();
    match engine_handle.join() {
        Ok(result) => result?,
        Err(_) => bail!("Engine thread panicked"),
    }
    runtime.shutdown_timeout(Duration::from_secs(1));

    match exit_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
