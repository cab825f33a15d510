use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use super::super::{Ctx, print_json, print_line};
use crate::Result;
use crate::apps::{AppError, Phase};
use crate::client::ClientError;
use crate::core::{ErrorKind, SigningKeyPair, Status};

#[derive(Args, Debug)]
pub struct KeygenArgs {
    /// Key name; the file is `<name>.key` in the key directory.
    #[arg(long, default_value = "writer")]
    pub name: String,

    /// Write here instead of the key directory.
    #[arg(short, long, value_name = "PATH")]
    pub out: Option<PathBuf>,

    /// Replace an existing key file.
    #[arg(long)]
    pub force: bool,
}

#[derive(Serialize)]
struct KeyInfo {
    path: String,
    public_key: String,
}

pub(crate) fn handle(ctx: &Ctx, args: KeygenArgs) -> Result<()> {
    let path = args
        .out
        .unwrap_or_else(|| crate::paths::key_dir().join(format!("{}.key", args.name)));
    if path.exists() && !args.force {
        return Err(AppError::new(
            Phase::Create,
            Status::new(
                ErrorKind::PermissionDenied,
                format!("{} exists; pass --force to replace it", path.display()),
            ),
        )
        .into());
    }

    let key = SigningKeyPair::generate();
    key.save(&path)
        .map_err(|e| AppError::new(Phase::Create, ClientError::from(e).to_status()))?;

    let info = KeyInfo {
        path: path.display().to_string(),
        public_key: hex::encode(key.public_key().to_metadata_bytes()),
    };
    if ctx.json {
        print_json(&info)?;
    } else {
        print_line(&format!("wrote {}", info.path))?;
        print_line(&format!("public key {}", info.public_key))?;
    }
    Ok(())
}
