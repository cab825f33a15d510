//! XDG directory helpers for config, data, log and key locations.

use std::path::PathBuf;

fn xdg_base(var: &str, fallback: &[&str]) -> PathBuf {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("/tmp"));
            for part in fallback {
                base.push(part);
            }
            base
        })
}

fn env_dir(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|dir| !dir.trim().is_empty())
        .map(PathBuf::from)
}

/// Base directory for configuration files.
///
/// Uses `GDP_CONFIG_DIR` if set, otherwise `$XDG_CONFIG_HOME/gdp` or
/// `~/.config/gdp`.
pub fn config_dir() -> PathBuf {
    env_dir("GDP_CONFIG_DIR").unwrap_or_else(|| xdg_base("XDG_CONFIG_HOME", &[".config"]).join("gdp"))
}

/// Base directory for persistent data.
///
/// Uses `GDP_DATA_DIR` if set, otherwise `$XDG_DATA_HOME/gdp` or
/// `~/.local/share/gdp`.
pub fn data_dir() -> PathBuf {
    env_dir("GDP_DATA_DIR")
        .unwrap_or_else(|| xdg_base("XDG_DATA_HOME", &[".local", "share"]).join("gdp"))
}

/// Default directory for rotated log files.
pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Where `gdp keygen` writes signing keys.
pub fn key_dir() -> PathBuf {
    data_dir().join("keys")
}
