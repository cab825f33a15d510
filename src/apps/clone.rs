use super::{AppError, Phase, PhaseExt};
use crate::client::{GdpClient, Gin, OpenOptions};
use crate::core::{InternalName, OpenMode, ServerAddr};

/// Create a log with `log`'s name and metadata on each of `servers`.
///
/// Records are not copied; `mirror` does that. The new replicas are
/// registered after the primary, so resolution keeps pointing at it.
pub fn clone_log(
    client: &GdpClient,
    log: InternalName,
    servers: &[InternalName],
) -> Result<Vec<ServerAddr>, AppError> {
    let source =
        Gin::open(client, log, OpenMode::ReadOnly, OpenOptions::new()).phase(Phase::Open)?;
    let metadata = source.metadata().clone();
    source.close().phase(Phase::Open)?;

    let human = match client.reverse_lookup(&log) {
        Ok(human) => human,
        Err(err) => {
            tracing::warn!(log = %log, "reverse lookup failed, cloning without human name: {err}");
            None
        }
    };

    let mut created = Vec::with_capacity(servers.len());
    for server in servers {
        let addr = client
            .create_log(&log, &metadata, server, human.as_deref())
            .phase(Phase::Create)?;
        tracing::info!(log = %log, server = %server, %addr, "cloned");
        created.push(addr);
    }
    Ok(created)
}
