use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::Args;
use serde::Serialize;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{AppError, ReadRange, follow, read_range, resolve_name};
use crate::core::Datum;

#[derive(Args, Debug)]
pub struct ReadArgs {
    /// Log to read.
    pub log: String,

    /// First record to read.
    #[arg(short, long, default_value_t = 1)]
    pub start: u64,

    /// Number of records; reads to the current head when omitted.
    #[arg(short = 'n', long)]
    pub count: Option<u64>,

    /// Follow the log: replay from --start (0 means only new records)
    /// and keep printing as records arrive.
    #[arg(long)]
    pub subscribe: bool,

    /// With --subscribe, stop after this many records (0: never).
    #[arg(long, default_value_t = 0, requires = "subscribe")]
    pub max: u64,
}

#[derive(Serialize)]
struct RecordLine<'a> {
    recno: u64,
    ts: String,
    payload: String,
    signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

fn print_datum(json: bool, datum: &Datum) -> std::result::Result<(), AppError> {
    let text = std::str::from_utf8(&datum.payload).ok();
    if json {
        print_json(&RecordLine {
            recno: datum.recno,
            ts: datum.ts.to_string(),
            payload: STANDARD.encode(&datum.payload),
            signed: datum.signature.is_some(),
            text,
        })
    } else {
        let body = match text {
            Some(text) => text.to_string(),
            None => format!("<{} bytes> {}", datum.payload.len(), STANDARD.encode(&datum.payload)),
        };
        print_line(&format!("{}\t{}\t{body}", datum.recno, datum.ts))
    }
}

pub(crate) fn handle(ctx: &Ctx, args: ReadArgs) -> Result<()> {
    let client = ctx.client()?;
    let log = resolve_name(&client, &args.log)?;
    let json = ctx.json;

    if args.subscribe {
        let end = follow(&client, log, args.start, args.max, None, |datum| {
            print_datum(json, datum)
        })?;
        tracing::info!(log = %log, ?end, "subscription ended");
        return Ok(());
    }

    let range = ReadRange {
        start: args.start,
        count: args.count,
    };
    let read = read_range(&client, log, range, |datum| print_datum(json, datum))?;
    tracing::debug!(log = %log, read, "read finished");
    Ok(())
}
