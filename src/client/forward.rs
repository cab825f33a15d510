//! Forwarded appends, used by replication tools.
//!
//! The record travels as-is, signature and recno included. The source
//! log's server relays it to the named target server, which verifies the
//! signature and accepts it only at `highest + 1`.

use super::event::{Context, RequestId};
use super::gin::Gin;
use super::ClientError;
use crate::core::{CoreError, Datum, InternalName, RecnoOutOfRange};

/// Forward `datum` for `source`'s log to the server registered as `target`.
///
/// Completion arrives as a DONE (`Completed::Forwarded`) or ERROR event on
/// the source handle. Transient failures are resent under the client's
/// backoff policy before an ERROR is reported.
pub fn forward_append(
    source: &Gin,
    datum: Datum,
    target: &InternalName,
    context: Option<Context>,
) -> Result<RequestId, ClientError> {
    if datum.recno == 0 {
        return Err(CoreError::from(RecnoOutOfRange {
            recno: 0,
            highest: source.highest_recno(),
        })
        .into());
    }
    tracing::debug!(
        handle = %source.id(),
        log = %source.name(),
        target = %target,
        recno = datum.recno,
        "forwarding record"
    );
    source.submit_forward(datum, *target, context)
}
