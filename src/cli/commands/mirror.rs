use std::path::PathBuf;

use clap::Args;

use super::super::{Ctx, print_json};
use crate::Result;
use crate::apps::{MirrorOptions, load_signer, mirror, resolve_name};

#[derive(Args, Debug)]
pub struct MirrorArgs {
    /// Log to copy from.
    pub source: String,

    /// Log to copy into.
    pub target: String,

    /// Signing key for the target log.
    #[arg(short, long, value_name = "PATH")]
    pub key: Option<PathBuf>,
}

/// Runs until the process is stopped.
pub(crate) fn handle(ctx: &Ctx, args: MirrorArgs) -> Result<()> {
    let client = ctx.client()?;
    let source = resolve_name(&client, &args.source)?;
    let target = resolve_name(&client, &args.target)?;
    let signer = args.key.as_deref().map(load_signer).transpose()?;

    let report = mirror(
        &client,
        source,
        target,
        MirrorOptions { signer, stop: None },
    )?;
    if ctx.json {
        print_json(&report)?;
    }
    Ok(())
}
