use std::time::Duration;

use crossbeam::channel::{Receiver, TryRecvError};

use super::{AppError, Phase, PhaseExt};
use crate::client::{ClientError, Event, GdpClient, Gin, OpenOptions};
use crate::core::{Datum, ErrorKind, InternalName, OpenMode, Status};

const STOP_POLL: Duration = Duration::from_millis(200);

/// Records `start..start+count`; `count` of `None` reads to the head.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRange {
    pub start: u64,
    pub count: Option<u64>,
}

impl Default for ReadRange {
    fn default() -> Self {
        Self {
            start: 1,
            count: None,
        }
    }
}

/// Read a range with synchronous reads, handing each record to `sink`.
/// Returns how many records were read.
pub fn read_range<F>(
    client: &GdpClient,
    log: InternalName,
    range: ReadRange,
    mut sink: F,
) -> Result<u64, AppError>
where
    F: FnMut(&Datum) -> Result<(), AppError>,
{
    let gin = Gin::open(client, log, OpenMode::ReadOnly, OpenOptions::new()).phase(Phase::Open)?;
    let highest = gin.refresh().phase(Phase::Operation)?.highest_recno;
    let start = range.start.max(1);
    let end = match range.count {
        Some(0) => return Ok(0),
        Some(count) => start.saturating_add(count - 1),
        None => highest,
    };

    let mut read = 0;
    for recno in start..=end {
        let datum = gin.read_by_recno(recno).phase(Phase::Operation)?;
        sink(&datum)?;
        read += 1;
    }
    tracing::debug!(log = %log, start, end, read, "range read");
    gin.close().phase(Phase::Operation)?;
    Ok(read)
}

/// How a subscription loop ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubscriptionEnd {
    /// The server sent EOS after the requested count.
    Eos { delivered: u64 },
    /// The caller's stop channel fired.
    Stopped,
    /// The client shut down.
    Shutdown,
}

/// True once `stop` has a message or every sender is gone.
pub(crate) fn stop_requested(stop: Option<&Receiver<()>>) -> bool {
    match stop {
        None => false,
        Some(rx) => !matches!(rx.try_recv(), Err(TryRecvError::Empty)),
    }
}

/// Drain events for `gin`'s subscription into `on_datum` until it ends.
///
/// An ERROR event fails the operation; stray DONE events from other
/// requests on the handle are ignored.
pub(crate) fn pump_subscription<F>(
    client: &GdpClient,
    gin: &Gin,
    stop: Option<&Receiver<()>>,
    mut on_datum: F,
) -> Result<SubscriptionEnd, AppError>
where
    F: FnMut(&Datum) -> Result<(), AppError>,
{
    loop {
        if stop_requested(stop) {
            return Ok(SubscriptionEnd::Stopped);
        }
        let wait = stop.map(|_| STOP_POLL);
        let event = match client.next_event(Some(gin.id()), wait) {
            Ok(event) => event,
            Err(ClientError::Timeout(_)) => continue,
            Err(err) => return Err(AppError::new(Phase::Operation, err.to_status())),
        };
        match event {
            Event::Data { datum, .. } => on_datum(&datum)?,
            Event::Eos { delivered, .. } => return Ok(SubscriptionEnd::Eos { delivered }),
            Event::Error { status, .. } => return Err(AppError::new(Phase::Operation, status)),
            Event::Done { request, .. } => {
                tracing::debug!(handle = %gin.id(), request = request.get(), "ignoring completion");
            }
            Event::Shutdown => return Ok(SubscriptionEnd::Shutdown),
        }
    }
}

/// Subscribe from `start` and hand every record to `sink` until EOS (when
/// `max > 0`), `stop` fires, or the client shuts down.
pub fn follow<F>(
    client: &GdpClient,
    log: InternalName,
    start: u64,
    max: u64,
    stop: Option<&Receiver<()>>,
    sink: F,
) -> Result<SubscriptionEnd, AppError>
where
    F: FnMut(&Datum) -> Result<(), AppError>,
{
    let gin = Gin::open(client, log, OpenMode::ReadOnly, OpenOptions::new()).phase(Phase::Open)?;
    gin.subscribe(start, max, None).phase(Phase::Operation)?;
    let end = pump_subscription(client, &gin, stop, sink)?;
    tracing::debug!(log = %log, ?end, "subscription finished");
    if end == SubscriptionEnd::Shutdown {
        return Err(AppError::new(
            Phase::Operation,
            Status::new(ErrorKind::Unavailable, "client shut down during subscription"),
        ));
    }
    gin.close().phase(Phase::Operation)?;
    Ok(end)
}
