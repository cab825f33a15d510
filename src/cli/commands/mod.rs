use clap::Subcommand;

use super::Ctx;
use crate::Result;

pub(super) mod append;
pub(super) mod clone;
pub(super) mod create;
pub(super) mod delete;
pub(super) mod keygen;
pub(super) mod logd;
pub(super) mod mirror;
pub(super) mod name;
pub(super) mod read;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a log server, optionally serving the directory too.
    Logd(logd::LogdArgs),

    /// Create a log on a named server.
    Create(create::CreateArgs),

    /// Append stdin lines to a log, one record per line.
    Append(append::AppendArgs),

    /// Read a range of records, or follow a log with --subscribe.
    Read(read::ReadArgs),

    /// Copy a log into another and keep copying new records.
    Mirror(mirror::MirrorArgs),

    /// Create a log's replicas on other servers.
    Clone(clone::CloneArgs),

    /// Delete a log.
    #[command(alias = "rm")]
    Delete(delete::DeleteArgs),

    /// Show the printable, hex and human forms of a name.
    Name(name::NameArgs),

    /// Write a new ed25519 signing key.
    Keygen(keygen::KeygenArgs),
}

impl Commands {
    /// Long-running server commands log to files by default.
    pub fn is_server(&self) -> bool {
        matches!(self, Commands::Logd(_))
    }
}

pub(super) fn dispatch(ctx: &Ctx, cmd: Commands) -> Result<()> {
    match cmd {
        Commands::Logd(args) => logd::handle(ctx, args),
        Commands::Create(args) => create::handle(ctx, args),
        Commands::Append(args) => append::handle(ctx, args),
        Commands::Read(args) => read::handle(ctx, args),
        Commands::Mirror(args) => mirror::handle(ctx, args),
        Commands::Clone(args) => clone::handle(ctx, args),
        Commands::Delete(args) => delete::handle(ctx, args),
        Commands::Name(args) => name::handle(ctx, args),
        Commands::Keygen(args) => keygen::handle(ctx, args),
    }
}
