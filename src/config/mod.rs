//! Config loading and persistence.
//!
//! Layers, lowest first: built-in defaults, the user file, the local file
//! (`./gdp.toml` or `GDP_CONFIG`), then environment overrides.

mod load;
mod merge;
mod schema;

use std::path::PathBuf;

use thiserror::Error;

pub use load::{
    config_path, load, load_local_config, load_or_init, load_user_config, load_with,
    local_config_path, write_config,
};
pub use merge::{apply_env_overrides, merge_layers};
pub use schema::{
    ClientConfigOverride, ClientSection, Config, ConfigLayer, FileLoggingConfig,
    FileLoggingConfigOverride, LogFormat, LogRotation, LoggingConfig, LoggingConfigOverride,
    PoolConfigOverride, PoolSection, RetryConfig, RetryConfigOverride, RouterConfig,
    RouterConfigOverride, ServerConfigOverride, ServerSection,
};

use crate::core::ErrorKind;
use crate::error::{Effect, Transience};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConfigError::Read { .. } | ConfigError::Write { .. } => ErrorKind::Unavailable,
            ConfigError::Parse { .. } | ConfigError::Invalid { .. } => ErrorKind::Protocol,
            ConfigError::Render(_) => ErrorKind::Internal,
        }
    }

    pub fn transience(&self) -> Transience {
        Transience::Permanent
    }

    pub fn effect(&self) -> Effect {
        match self {
            ConfigError::Write { .. } => Effect::Unknown,
            _ => Effect::None,
        }
    }
}
