use super::{AppError, Phase, PhaseExt};
use crate::client::{GdpClient, Gin, OpenOptions};
use crate::core::{InternalName, OpenMode};

/// Remove `log` from its server. Subscribers get EOS and the directory
/// forgets the name.
pub fn delete_log(client: &GdpClient, log: InternalName) -> Result<(), AppError> {
    let gin =
        Gin::open(client, log, OpenMode::ReadAppend, OpenOptions::new()).phase(Phase::Open)?;
    gin.delete().phase(Phase::Delete)?;
    tracing::info!(log = %log, "deleted");
    Ok(())
}
