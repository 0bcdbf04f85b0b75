pub mod actions;
pub mod config;

use clap::{Arg, ArgMatches, Command};

fn command() -> Command {
    Command::new("reflex_hub")
        .about("Run reaction-test sessions against networked devices")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file (TOML, or JSON with a .json extension)")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("mode")
                .long("mode")
                .short('m')
                .help("Session mode: sequential, random or manual")
                .value_name("MODE")
                .default_value("sequential"),
        )
        .arg(
            Arg::new("subject")
                .long("subject")
                .short('s')
                .help("Subject (player) id the session is recorded for")
                .value_name("ID"),
        )
        .arg(
            Arg::new("devices")
                .long("devices")
                .short('d')
                .help("Comma-separated device ids in activation order (default: whole roster)")
                .value_name("IDS"),
        )
        .arg(
            Arg::new("rounds")
                .long("rounds")
                .help("Sequential mode: number of rounds")
                .value_name("N")
                .value_parser(clap::value_parser!(u32))
                .default_value("3"),
        )
        .arg(
            Arg::new("duration")
                .long("duration")
                .help("Random mode: session duration in seconds")
                .value_name("SECS")
                .value_parser(clap::value_parser!(u32))
                .default_value("30"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .help("Reaction timeout per command in milliseconds (overrides config)")
                .value_name("MS")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .help("Random mode: seed for a reproducible device sequence")
                .value_name("SEED")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .help("Also write logs to this file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("print-config")
                .long("print-config")
                .help("Print the effective configuration as TOML and exit")
                .action(clap::ArgAction::SetTrue),
        )
}

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

/// Parse an explicit argument list; used by tests.
pub fn parse_from<I, T>(args: I) -> Result<ArgMatches, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    command().try_get_matches_from(args)
}
