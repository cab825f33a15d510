use std::path::PathBuf;

use super::{Config, ConfigLayer};

pub fn merge_layers(user: Option<ConfigLayer>, local: Option<ConfigLayer>) -> Config {
    let mut config = Config::default();
    if let Some(layer) = user {
        layer.apply_to(&mut config);
    }
    if let Some(layer) = local {
        layer.apply_to(&mut config);
    }
    config
}

fn env_value(key: &str) -> Option<String> {
    let raw = std::env::var(key).ok()?;
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

pub fn apply_env_overrides(config: &mut Config) {
    if let Some(router) = env_value("GDP_ROUTER") {
        if router.contains(':') {
            config.router.addr = router;
        } else {
            tracing::warn!("invalid GDP_ROUTER, ignoring: `{router}` has no port");
        }
    }

    if let Some(root) = env_value("GDP_NAME_ROOT") {
        config.router.name_root = Some(root);
    }

    if let Some(raw) = env_value("GDP_MAX_CONNECTIONS") {
        match raw.parse::<usize>() {
            Ok(0) => tracing::warn!("invalid GDP_MAX_CONNECTIONS, ignoring: must be positive"),
            Ok(value) => config.pool.max_connections = value,
            Err(err) => tracing::warn!("invalid GDP_MAX_CONNECTIONS, ignoring: {err}"),
        }
    }

    if let Some(dir) = env_value("GDP_LOG_FILE") {
        config.logging.file.enabled = true;
        config.logging.file.dir = Some(PathBuf::from(dir));
    }
}
