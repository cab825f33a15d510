use gdp::{cli, config, telemetry};

fn main() {
    let cli = cli::parse_from(std::env::args_os());

    let mut cfg = load_config(&cli);
    cli.apply_to(&mut cfg);

    let mut logging = cfg.logging.clone();
    if cli.command.is_server() {
        telemetry::apply_server_logging_defaults(&mut logging);
    }
    let telemetry_cfg = telemetry::TelemetryConfig::new(cli.verbose, logging)
        .with_directives(cli.debug_directives());
    let _telemetry_guard = telemetry::init(telemetry_cfg);

    if let Err(e) = cli::run(cli, cfg) {
        tracing::error!("error: {e}");
        eprintln!("gdp: {e}");
        std::process::exit(cli::exit_code(&e));
    }
}

/// An explicit `--config` must load; otherwise fall back to defaults.
fn load_config(cli: &cli::Cli) -> config::Config {
    match config::load_with(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) if cli.config.is_some() => {
            eprintln!("gdp: {err}");
            std::process::exit(cli::exit_code(&err.into()));
        }
        Err(err) => {
            eprintln!("config load failed, using defaults: {err}");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    }
}
