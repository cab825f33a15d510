//! CLI surface for the `gdp` binary.
//!
//! One subcommand per tool; each handler is a thin wrapper over `apps`.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use clap::{ArgAction, Parser};
use serde::Serialize;

use crate::apps::{AppError, Phase, PhaseExt};
use crate::client::GdpClient;
use crate::config::Config;
use crate::core::{ErrorKind, Status};
use crate::{Error, Result};

mod commands;

pub use commands::Commands;

#[derive(Parser, Debug)]
#[command(
    name = "gdp",
    version,
    about = "Signed append-only logs: servers, directory and tools",
    infer_subcommands = true,
    arg_required_else_help = true
)]
pub struct Cli {
    /// Config file to use instead of ./gdp.toml.
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Directory server address (host:port).
    #[arg(short = 'D', long, global = true, value_name = "ADDR")]
    pub router: Option<String>,

    /// Machine-readable JSON output.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,

    /// More log output (repeat for more).
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Tracing filter directives, e.g. `gdp::client=trace,gdp::server=debug`.
    #[arg(long, global = true, value_name = "DIRECTIVES")]
    pub debug: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn debug_directives(&self) -> Vec<String> {
        self.debug
            .as_deref()
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|d| !d.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Fold command-line overrides into the loaded config.
    pub fn apply_to(&self, config: &mut Config) {
        if let Some(router) = &self.router {
            config.router.addr = router.clone();
        }
    }
}

pub fn parse_from<I, T>(args: I) -> Cli
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    Cli::parse_from(args)
}

/// Shared state for command handlers.
pub(crate) struct Ctx {
    pub config: Config,
    pub json: bool,
}

impl Ctx {
    pub fn client(&self) -> std::result::Result<GdpClient, AppError> {
        GdpClient::new(self.config.client_config()).phase(Phase::Init)
    }
}

pub fn run(cli: Cli, config: Config) -> Result<()> {
    let ctx = Ctx {
        config,
        json: cli.json,
    };
    commands::dispatch(&ctx, cli.command)
}

/// Process exit code for a failed command.
pub fn exit_code(err: &Error) -> i32 {
    match err {
        Error::App(app) => app.exit_code(),
        Error::Config(_) => Phase::Init.exit_code(),
        other if other.kind() == ErrorKind::PermissionDenied => 77,
        _ => Phase::Operation.exit_code(),
    }
}

/// Print one line, ignoring a closed stdout.
pub(crate) fn print_line(line: &str) -> std::result::Result<(), AppError> {
    let mut stdout = std::io::stdout().lock();
    match writeln!(stdout, "{line}") {
        Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(AppError::new(
            Phase::Operation,
            Status::new(ErrorKind::Internal, format!("stdout: {e}")),
        )),
        _ => Ok(()),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> std::result::Result<(), AppError> {
    let rendered = serde_json::to_string(value).map_err(|e| {
        AppError::new(
            Phase::Operation,
            Status::new(ErrorKind::Internal, format!("render json: {e}")),
        )
    })?;
    print_line(&rendered)
}
