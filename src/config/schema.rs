use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::client::{BackoffPolicy, ClientConfig, PoolConfig};
use crate::core::{InternalName, Limits, LimitsOverride, ServerAddr, parse_name};
use crate::server::ServerConfig;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub router: RouterConfig,
    pub pool: PoolSection,
    pub retry: RetryConfig,
    pub client: ClientSection,
    pub server: ServerSection,
    pub logging: LoggingConfig,
    pub limits: Limits,
}

impl Config {
    /// Runtime settings for a [`crate::client::GdpClient`].
    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            router: ServerAddr::new(self.router.addr.clone()),
            name_root: self.router.name_root.clone(),
            pool: PoolConfig {
                max_connections: self.pool.max_connections.max(1),
                connect_timeout: Duration::from_millis(self.pool.connect_timeout_ms),
                acquire_timeout: Duration::from_millis(self.pool.acquire_timeout_ms),
                limits: self.limits.clone(),
            },
            backoff: BackoffPolicy {
                base: Duration::from_millis(self.retry.backoff_base_ms),
                max: Duration::from_millis(self.retry.backoff_max_ms),
                max_attempts: self.retry.max_attempts,
            },
            request_timeout: Duration::from_millis(self.client.request_timeout_ms),
            close_timeout: Duration::from_millis(self.client.close_timeout_ms),
            verify_signatures: self.client.verify_signatures,
        }
    }

    /// Settings for a [`crate::server::LogServer`].
    ///
    /// The server name may be printable or human; an unnamed server is
    /// called `gdp.logd.<addr>` after its advertised (or listen) address.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        let server = &self.server;
        let (name, human) = match server.name.as_deref() {
            Some(raw) => match parse_name(raw) {
                Ok(name) => (name, None),
                Err(_) => (from_human("server.name", raw)?, Some(raw.to_string())),
            },
            None => {
                let addr = server.advertise_addr.as_deref().unwrap_or(&server.listen_addr);
                let human = format!("gdp.logd.{addr}");
                (from_human("server.name", &human)?, Some(human))
            }
        };
        let mut config = ServerConfig::new(server.listen_addr.clone(), name);
        config.human = human;
        config.advertise_addr = server.advertise_addr.clone().map(ServerAddr::new);
        config.serve_directory = server.serve_directory;
        config.router = (!server.serve_directory).then(|| ServerAddr::new(self.router.addr.clone()));
        if let Some(max) = server.max_connections {
            config.max_connections = max;
        }
        config.limits = self.limits.clone();
        config.client = Some(self.client_config());
        Ok(config)
    }
}

fn from_human(field: &'static str, raw: &str) -> Result<InternalName, ConfigError> {
    InternalName::from_human(raw).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    pub addr: String,
    pub name_root: Option<String>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8007".to_string(),
            name_root: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSection {
    pub max_connections: usize,
    pub connect_timeout_ms: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolSection {
    fn default() -> Self {
        Self {
            max_connections: 16,
            connect_timeout_ms: 2_000,
            acquire_timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: 10,
            backoff_max_ms: 5_000,
            max_attempts: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub request_timeout_ms: u64,
    pub close_timeout_ms: u64,
    pub verify_signatures: bool,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            close_timeout_ms: 5_000,
            verify_signatures: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub listen_addr: String,
    pub advertise_addr: Option<String>,
    /// Human name of this server; printable names are accepted too.
    pub name: Option<String>,
    pub serve_directory: bool,
    pub max_connections: Option<NonZeroUsize>,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8007".to_string(),
            advertise_addr: None,
            name: None,
            serve_directory: true,
            max_connections: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Tree,
    Pretty,
    Compact,
    Json,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    Daily,
    Hourly,
    Minutely,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub stdout: bool,
    pub stdout_format: LogFormat,
    pub filter: Option<String>,
    pub file: FileLoggingConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            stdout: true,
            stdout_format: LogFormat::Tree,
            filter: None,
            file: FileLoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileLoggingConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
    pub rotation: LogRotation,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl Default for FileLoggingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: None,
            format: LogFormat::Json,
            rotation: LogRotation::Daily,
            retention_max_age_days: Some(7),
            retention_max_files: Some(10),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LoggingConfigOverride {
    pub stdout: Option<bool>,
    pub stdout_format: Option<LogFormat>,
    pub filter: Option<String>,
    pub file: Option<FileLoggingConfigOverride>,
}

impl LoggingConfigOverride {
    pub fn apply_to(&self, target: &mut LoggingConfig) {
        if let Some(stdout) = self.stdout {
            target.stdout = stdout;
        }
        if let Some(format) = self.stdout_format {
            target.stdout_format = format;
        }
        if let Some(filter) = self.filter.as_ref() {
            target.filter = Some(filter.clone());
        }
        if let Some(file) = self.file.as_ref() {
            file.apply_to(&mut target.file);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct FileLoggingConfigOverride {
    pub enabled: Option<bool>,
    pub dir: Option<PathBuf>,
    pub format: Option<LogFormat>,
    pub rotation: Option<LogRotation>,
    pub retention_max_age_days: Option<u64>,
    pub retention_max_files: Option<usize>,
}

impl FileLoggingConfigOverride {
    pub fn apply_to(&self, target: &mut FileLoggingConfig) {
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(dir) = self.dir.as_ref() {
            target.dir = Some(dir.clone());
        }
        if let Some(format) = self.format {
            target.format = format;
        }
        if let Some(rotation) = self.rotation {
            target.rotation = rotation;
        }
        if let Some(days) = self.retention_max_age_days {
            target.retention_max_age_days = Some(days);
        }
        if let Some(files) = self.retention_max_files {
            target.retention_max_files = Some(files);
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RouterConfigOverride {
    pub addr: Option<String>,
    pub name_root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct PoolConfigOverride {
    pub max_connections: Option<usize>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RetryConfigOverride {
    pub backoff_base_ms: Option<u64>,
    pub backoff_max_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ClientConfigOverride {
    pub request_timeout_ms: Option<u64>,
    pub close_timeout_ms: Option<u64>,
    pub verify_signatures: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfigOverride {
    pub listen_addr: Option<String>,
    pub advertise_addr: Option<String>,
    pub name: Option<String>,
    pub serve_directory: Option<bool>,
    pub max_connections: Option<NonZeroUsize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ConfigLayer {
    pub router: RouterConfigOverride,
    pub pool: PoolConfigOverride,
    pub retry: RetryConfigOverride,
    pub client: ClientConfigOverride,
    pub server: ServerConfigOverride,
    pub logging: LoggingConfigOverride,
    pub limits: LimitsOverride,
}

impl ConfigLayer {
    pub fn apply_to(&self, base: &mut Config) {
        let router = &self.router;
        if let Some(addr) = router.addr.as_ref() {
            base.router.addr = addr.clone();
        }
        if let Some(root) = router.name_root.as_ref() {
            base.router.name_root = Some(root.clone());
        }

        let pool = &self.pool;
        if let Some(value) = pool.max_connections {
            base.pool.max_connections = value;
        }
        if let Some(value) = pool.connect_timeout_ms {
            base.pool.connect_timeout_ms = value;
        }
        if let Some(value) = pool.acquire_timeout_ms {
            base.pool.acquire_timeout_ms = value;
        }

        let retry = &self.retry;
        if let Some(value) = retry.backoff_base_ms {
            base.retry.backoff_base_ms = value;
        }
        if let Some(value) = retry.backoff_max_ms {
            base.retry.backoff_max_ms = value;
        }
        if let Some(value) = retry.max_attempts {
            base.retry.max_attempts = value;
        }

        let client = &self.client;
        if let Some(value) = client.request_timeout_ms {
            base.client.request_timeout_ms = value;
        }
        if let Some(value) = client.close_timeout_ms {
            base.client.close_timeout_ms = value;
        }
        if let Some(value) = client.verify_signatures {
            base.client.verify_signatures = value;
        }

        let server = &self.server;
        if let Some(addr) = server.listen_addr.as_ref() {
            base.server.listen_addr = addr.clone();
        }
        if let Some(addr) = server.advertise_addr.as_ref() {
            base.server.advertise_addr = Some(addr.clone());
        }
        if let Some(name) = server.name.as_ref() {
            base.server.name = Some(name.clone());
        }
        if let Some(value) = server.serve_directory {
            base.server.serve_directory = value;
        }
        if let Some(value) = server.max_connections {
            base.server.max_connections = Some(value);
        }

        self.logging.apply_to(&mut base.logging);
        self.limits.apply_to(&mut base.limits);
    }
}
