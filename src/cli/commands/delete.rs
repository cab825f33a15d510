use clap::Args;
use serde::Serialize;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{delete_log, resolve_name};

#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Log to delete.
    pub log: String,
}

#[derive(Serialize)]
struct Deleted {
    status: &'static str,
    log: String,
}

pub(crate) fn handle(ctx: &Ctx, args: DeleteArgs) -> Result<()> {
    let client = ctx.client()?;
    let log = resolve_name(&client, &args.log)?;
    delete_log(&client, log)?;

    let deleted = Deleted {
        status: "deleted",
        log: log.printable(),
    };
    if ctx.json {
        print_json(&deleted)?;
    } else {
        print_line(&format!("deleted {}", deleted.log))?;
    }
    Ok(())
}
