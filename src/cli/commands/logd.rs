use std::num::NonZeroUsize;

use clap::Args;
use serde::Serialize;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{AppError, Phase};
use crate::server::LogServer;

#[derive(Args, Debug)]
pub struct LogdArgs {
    /// Address to listen on.
    #[arg(long, value_name = "ADDR")]
    pub listen: Option<String>,

    /// Address published in the directory.
    #[arg(long, value_name = "ADDR")]
    pub advertise: Option<String>,

    /// Server name (human or printable).
    #[arg(long)]
    pub name: Option<String>,

    /// Use the configured router instead of serving the directory here.
    #[arg(long)]
    pub no_directory: bool,

    #[arg(long, value_name = "N")]
    pub max_connections: Option<NonZeroUsize>,
}

#[derive(Serialize)]
struct Listening {
    name: String,
    addr: String,
    directory: bool,
}

pub(crate) fn handle(ctx: &Ctx, args: LogdArgs) -> Result<()> {
    let mut config = ctx.config.clone();
    if let Some(listen) = args.listen {
        config.server.listen_addr = listen;
    }
    if let Some(advertise) = args.advertise {
        config.server.advertise_addr = Some(advertise);
    }
    if let Some(name) = args.name {
        config.server.name = Some(name);
    }
    if args.no_directory {
        config.server.serve_directory = false;
    }
    if let Some(max) = args.max_connections {
        config.server.max_connections = Some(max);
    }

    let server_config = config.server_config()?;
    let directory = server_config.serve_directory;
    let handle = LogServer::new(server_config)
        .start()
        .map_err(|e| AppError::new(Phase::Init, e.to_status()))?;

    let listening = Listening {
        name: handle.name().printable(),
        addr: handle.addr().to_string(),
        directory,
    };
    if ctx.json {
        print_json(&listening)?;
    } else {
        print_line(&format!(
            "gdp logd {} listening on {}{}",
            listening.name,
            listening.addr,
            if directory { " (directory)" } else { "" }
        ))?;
    }
    handle.wait();
    Ok(())
}
