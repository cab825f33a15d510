use serde::Serialize;

use super::{AppError, resolve_name};
use crate::client::GdpClient;
use crate::core::InternalName;

/// Every form of one name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NameInfo {
    pub printable: String,
    pub hex: String,
    pub human: Option<String>,
}

impl NameInfo {
    pub fn new(name: &InternalName, human: Option<String>) -> Self {
        Self {
            printable: name.printable(),
            hex: name.to_hex(),
            human,
        }
    }
}

/// Parse `raw` and ask the directory for its human name.
///
/// A failed reverse lookup leaves `human` empty rather than failing.
pub fn inspect_name(client: &GdpClient, raw: &str) -> Result<NameInfo, AppError> {
    let name = resolve_name(client, raw)?;
    let human = client.reverse_lookup(&name).unwrap_or_else(|err| {
        tracing::warn!(name = %name, "reverse lookup failed: {err}");
        None
    });
    Ok(NameInfo::new(&name, human))
}
