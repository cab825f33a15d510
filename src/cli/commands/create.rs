use std::path::PathBuf;

use clap::Args;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{CreateRequest, create_log, load_signer, resolve_name};

#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Human name for the new log; named by its metadata when omitted.
    pub name: Option<String>,

    /// Server to create the log on (human or printable name).
    #[arg(short, long)]
    pub server: String,

    /// Writer key; appends must then be signed with it.
    #[arg(short, long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// Creator recorded in the metadata.
    #[arg(long)]
    pub creator: Option<String>,
}

pub(crate) fn handle(ctx: &Ctx, args: CreateArgs) -> Result<()> {
    let client = ctx.client()?;
    let server = resolve_name(&client, &args.server)?;
    let writer = args.key.as_deref().map(load_signer).transpose()?;
    let creator = args.creator.unwrap_or_else(default_creator);

    let created = create_log(
        &client,
        CreateRequest {
            human: args.name,
            server,
            writer,
            creator,
        },
    )?;
    if ctx.json {
        print_json(&created)?;
    } else {
        print_line(&format!(
            "created {} {}at {}",
            created.name,
            created
                .human
                .as_deref()
                .map(|h| format!("({h}) "))
                .unwrap_or_default(),
            created.addr
        ))?;
    }
    Ok(())
}

fn default_creator() -> String {
    std::env::var("USER")
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "gdp".to_string())
}
