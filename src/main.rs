use anyhow::Result;

use reflex_hub::{
    boot,
    cli::{self, actions},
};

fn main() -> Result<()> {
    let matches = cli::parse_args();
    boot::init_logger(matches.get_one::<String>("log-file").map(String::as_str));

    let config = actions::load_config(&matches)?;
    if matches.get_flag("print-config") {
        println!("{}", config.to_toml()?);
        return Ok(());
    }

    let request = actions::session_request(&matches, &config)?;
    let seed = matches.get_one::<u64>("seed").copied();
    log::info!("reflex_hub starting ({} session)", request.params.mode());

    actions::run_session(config, request, seed)
}
