use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use super::{AppError, Phase, PhaseExt};
use crate::client::{GdpClient, Gin, OpenOptions};
use crate::core::{Datum, InternalName, OpenMode, SigningKeyPair};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct AppendReport {
    pub appended: u64,
    pub first: Option<u64>,
    pub last: Option<u64>,
}

/// Append each payload to `log` in order, waiting for every ack.
///
/// With `chained`, each record names the previous record's hash, so the
/// server refuses it if another writer got in between.
pub fn append_payloads<I>(
    client: &GdpClient,
    log: InternalName,
    payloads: I,
    signer: Option<Arc<SigningKeyPair>>,
    chained: bool,
) -> Result<AppendReport, AppError>
where
    I: IntoIterator<Item = Bytes>,
{
    let mut options = OpenOptions::new();
    if let Some(signer) = signer {
        options = options.signer(signer);
    }
    let gin = Gin::open(client, log, OpenMode::AppendOnly, options).phase(Phase::Open)?;

    let mut report = AppendReport::default();
    for payload in payloads {
        let prevhash = if chained { gin.last_hash() } else { None };
        let recno = gin
            .append(Datum::new(payload), prevhash)
            .phase(Phase::Operation)?;
        report.appended += 1;
        report.first.get_or_insert(recno);
        report.last = Some(recno);
    }
    tracing::info!(log = %log, appended = report.appended, last = ?report.last, "append finished");
    gin.close().phase(Phase::Operation)?;
    Ok(report)
}
