use std::sync::Arc;

use serde::Serialize;

use super::{AppError, Phase, PhaseExt};
use crate::client::GdpClient;
use crate::core::{InternalName, LogMetadata, ServerAddr, SigningKeyPair};

/// What `gdp create` was asked for.
#[derive(Clone, Debug)]
pub struct CreateRequest {
    /// Human name to register; the log is named by its metadata otherwise.
    pub human: Option<String>,
    pub server: InternalName,
    pub writer: Option<Arc<SigningKeyPair>>,
    pub creator: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct Created {
    pub name: String,
    pub human: Option<String>,
    pub addr: String,
}

pub fn create_log(client: &GdpClient, request: CreateRequest) -> Result<Created, AppError> {
    let writer = request.writer.as_ref().map(|key| key.public_key());
    let metadata = LogMetadata::for_new_log(
        request.human.as_deref(),
        &request.creator,
        writer.as_ref(),
    );
    let name = match request.human.as_deref() {
        Some(human) => client.lookup_human(human).phase(Phase::Init)?,
        None => metadata.derive_name(),
    };
    let addr: ServerAddr = client
        .create_log(&name, &metadata, &request.server, request.human.as_deref())
        .phase(Phase::Create)?;
    Ok(Created {
        name: name.printable(),
        human: request.human,
        addr: addr.to_string(),
    })
}
