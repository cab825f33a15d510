use std::fs;
use std::path::{Path, PathBuf};

use super::merge::{apply_env_overrides, merge_layers};
use super::{Config, ConfigError, ConfigLayer};

pub fn config_path() -> PathBuf {
    crate::paths::config_dir().join("config.toml")
}

/// `GDP_CONFIG` when set, otherwise `gdp.toml` in the working directory.
pub fn local_config_path() -> PathBuf {
    std::env::var("GDP_CONFIG")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("gdp.toml"))
}

fn read_layer(path: &Path) -> Result<Option<ConfigLayer>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

pub fn load_user_config() -> Result<Option<ConfigLayer>, ConfigError> {
    read_layer(&config_path())
}

pub fn load_local_config() -> Result<Option<ConfigLayer>, ConfigError> {
    read_layer(&local_config_path())
}

pub fn load() -> Result<Config, ConfigError> {
    load_with(None)
}

/// Load every layer; `explicit` replaces the local file when given.
pub fn load_with(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    let user = load_user_config()?;
    let local = match explicit {
        Some(path) => {
            let layer = read_layer(path)?;
            if layer.is_none() {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source: std::io::Error::from(std::io::ErrorKind::NotFound),
                });
            }
            layer
        }
        None => load_local_config()?,
    };
    let mut config = merge_layers(user, local);
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Load, falling back to defaults on error, and seed the user file on
/// first run.
pub fn load_or_init() -> Config {
    let path = config_path();
    let had_user_config = path.exists();

    let config = match load() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {e}");
            let mut cfg = Config::default();
            apply_env_overrides(&mut cfg);
            cfg
        }
    };

    if !had_user_config && let Err(e) = write_config(&path, &Config::default()) {
        tracing::warn!("failed to write default config: {e}");
    }

    config
}

pub fn write_config(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|source| ConfigError::Write {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let contents = toml::to_string_pretty(cfg)?;
    atomic_write(path, contents.as_bytes())
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), ConfigError> {
    let write_err = |source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    fs::write(temp.path(), data).map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
