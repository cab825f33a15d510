use std::io::BufRead;
use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{AppError, Phase, append_payloads, load_signer, resolve_name};
use crate::core::{ErrorKind, Status};

#[derive(Args, Debug)]
pub struct AppendArgs {
    /// Log to append to.
    pub log: String,

    /// Signing key for logs with a writer key.
    #[arg(short, long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Chain each record to the one before it.
    #[arg(long)]
    pub chain: bool,
}

pub(crate) fn handle(ctx: &Ctx, args: AppendArgs) -> Result<()> {
    let client = ctx.client()?;
    let log = resolve_name(&client, &args.log)?;
    let signer = args.key.as_deref().map(load_signer).transpose()?;

    let lines = std::io::stdin()
        .lock()
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| {
            AppError::new(
                Phase::Operation,
                Status::new(ErrorKind::Internal, format!("stdin: {e}")),
            )
        })?;
    let payloads = lines.into_iter().map(Bytes::from);

    let report = append_payloads(&client, log, payloads, signer, args.chain)?;
    if ctx.json {
        print_json(&report)?;
    } else {
        match (report.first, report.last) {
            (Some(first), Some(last)) => print_line(&format!(
                "appended {} records ({first}..={last})",
                report.appended
            ))?,
            _ => print_line("nothing to append")?,
        }
    }
    Ok(())
}
