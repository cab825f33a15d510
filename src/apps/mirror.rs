use std::sync::Arc;

use bytes::Bytes;
use crossbeam::channel::Receiver;
use serde::Serialize;

use super::read::{SubscriptionEnd, pump_subscription};
use super::{AppError, Phase, PhaseExt};
use crate::client::{GdpClient, Gin, OpenOptions};
use crate::core::{Datum, ErrorKind, InternalName, OpenMode, SigningKeyPair, Status};

#[derive(Clone, Debug, Default)]
pub struct MirrorOptions {
    /// Signs records written to the target.
    pub signer: Option<Arc<SigningKeyPair>>,
    /// Stop cleanly when this fires. Without it the mirror runs until
    /// the process ends.
    pub stop: Option<Receiver<()>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MirrorReport {
    /// First source recno the mirror subscribed from.
    pub start: u64,
    pub copied: u64,
    pub last_target_recno: Option<u64>,
}

/// Copy `source` into `target`, then keep copying as records arrive.
///
/// The target is opened append-only and the source is read from the
/// record after the target's head, so re-running resumes where the last
/// run stopped. Returns only when `options.stop` fires; any end of the
/// subscription other than that is an error.
pub fn mirror(
    client: &GdpClient,
    source: InternalName,
    target: InternalName,
    options: MirrorOptions,
) -> Result<MirrorReport, AppError> {
    let mut target_options = OpenOptions::new();
    if let Some(signer) = options.signer.clone() {
        target_options = target_options.signer(signer);
    }
    let target_gin =
        Gin::open(client, target, OpenMode::AppendOnly, target_options).phase(Phase::Open)?;
    let source_gin =
        Gin::open(client, source, OpenMode::ReadOnly, OpenOptions::new()).phase(Phase::Open)?;

    let start = target_gin.highest_recno() + 1;
    let mut report = MirrorReport {
        start,
        ..MirrorReport::default()
    };
    source_gin.subscribe(start, 0, None).phase(Phase::Operation)?;
    tracing::info!(source = %source, target = %target, start, "mirroring");

    let end = pump_subscription(client, &source_gin, options.stop.as_ref(), |datum| {
        let copy = Datum::new(Bytes::clone(&datum.payload));
        let recno = target_gin.append(copy, None).phase(Phase::Operation)?;
        if recno != datum.recno {
            tracing::warn!(source_recno = datum.recno, target_recno = recno, "mirror drifted");
        }
        report.copied += 1;
        report.last_target_recno = Some(recno);
        Ok(())
    })?;

    match end {
        SubscriptionEnd::Stopped => {
            tracing::info!(copied = report.copied, "mirror stopped");
            source_gin.close().phase(Phase::Operation)?;
            target_gin.close().phase(Phase::Operation)?;
            Ok(report)
        }
        other => Err(AppError::new(
            Phase::Operation,
            Status::new(
                ErrorKind::Unavailable,
                format!("unexpected end of subscription: {other:?}"),
            ),
        )),
    }
}
