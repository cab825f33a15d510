use clap::Args;
use serde::Serialize;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{clone_log, resolve_name};

#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Log whose metadata is copied.
    pub log: String,

    /// Servers to create the clone on.
    #[arg(required = true)]
    pub servers: Vec<String>,
}

#[derive(Serialize)]
struct Cloned {
    log: String,
    addrs: Vec<String>,
}

pub(crate) fn handle(ctx: &Ctx, args: CloneArgs) -> Result<()> {
    let client = ctx.client()?;
    let log = resolve_name(&client, &args.log)?;
    let servers = args
        .servers
        .iter()
        .map(|raw| resolve_name(&client, raw))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let addrs = clone_log(&client, log, &servers)?;
    let cloned = Cloned {
        log: log.printable(),
        addrs: addrs.iter().map(ToString::to_string).collect(),
    };
    if ctx.json {
        print_json(&cloned)?;
    } else {
        for addr in &cloned.addrs {
            print_line(&format!("cloned {} to {addr}", cloned.log))?;
        }
    }
    Ok(())
}
