//! Tracing setup for the `gdp` binary: stderr output, optional rotated log
//! files, and retention of old files.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{FileLoggingConfig, LogFormat, LogRotation, LoggingConfig};
use crate::paths;

const LOG_FILE_PREFIX: &str = "gdp.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    pub verbosity: u8,
    /// Extra filter directives, e.g. from `--debug gdp::client=trace`.
    pub directives: Vec<String>,
    pub logging: LoggingConfig,
}

impl TelemetryConfig {
    pub fn new(verbosity: u8, logging: LoggingConfig) -> Self {
        Self {
            verbosity,
            directives: Vec::new(),
            logging,
        }
    }

    pub fn with_directives(mut self, directives: Vec<String>) -> Self {
        self.directives = directives;
        self
    }
}

pub fn is_test_env() -> bool {
    std::env::var_os("GDP_TESTING").is_some() || std::env::var_os("RUST_TEST_THREADS").is_some()
}

/// Long-running servers log to files unless told otherwise.
pub fn apply_server_logging_defaults(logging: &mut LoggingConfig) {
    if is_test_env() || std::env::var_os("GDP_LOG_FILE").is_some() {
        return;
    }
    logging.file.enabled = true;
}

/// Keeps the non-blocking file writers flushing; hold until exit.
pub struct TelemetryGuard {
    _guards: Vec<tracing_appender::non_blocking::WorkerGuard>,
}

pub fn init(config: TelemetryConfig) -> TelemetryGuard {
    let filter = build_filter(&config);

    let mut guards = Vec::new();
    let mut layers: Vec<BoxedLayer> = Vec::new();

    if config.logging.stdout {
        layers.push(format_layer(config.logging.stdout_format, std::io::stderr, true));
    }

    let mut prune_report = None;
    let mut setup_error = None;
    if config.logging.file.enabled {
        let dir = resolve_log_dir(&config.logging.file);
        match fs::create_dir_all(&dir) {
            Ok(()) => {
                let retention = RetentionLimits::from_file_config(&config.logging.file);
                if retention.is_enabled() {
                    match prune_logs(&dir, LOG_FILE_PREFIX, retention, SystemTime::now()) {
                        Ok(report) => prune_report = Some(report),
                        Err(err) => setup_error = Some(format!("log retention failed: {err}")),
                    }
                }
                let appender = tracing_appender::rolling::RollingFileAppender::new(
                    rotation(config.logging.file.rotation),
                    &dir,
                    LOG_FILE_PREFIX,
                );
                let (writer, guard) = tracing_appender::non_blocking(appender);
                layers.push(format_layer(config.logging.file.format, writer, false));
                guards.push(guard);
            }
            Err(err) => {
                setup_error = Some(format!("log dir init failed for {}: {err}", dir.display()));
            }
        }
    }

    layers.push(Box::new(filter));
    if let Err(err) = Registry::default().with(layers).try_init() {
        eprintln!("tracing already initialized: {err}");
    }

    if let Some(report) = prune_report {
        tracing::info!(
            pruned = report.removed,
            failed = report.failed,
            candidates = report.candidates,
            "log retention applied"
        );
    }
    if let Some(error) = setup_error {
        tracing::warn!("{error}");
    }

    TelemetryGuard { _guards: guards }
}

/// `LOG` wins over the config filter; `--debug` directives are added last.
fn build_filter(config: &TelemetryConfig) -> EnvFilter {
    let mut filter = EnvFilter::builder()
        .with_default_directive(level_from_verbosity(config.verbosity).into())
        .with_env_var("LOG")
        .from_env_lossy();
    if std::env::var_os("LOG").is_none()
        && let Some(configured) = config.logging.filter.as_deref()
    {
        filter = EnvFilter::builder()
            .with_default_directive(level_from_verbosity(config.verbosity).into())
            .parse_lossy(configured);
    }
    for directive in &config.directives {
        match directive.parse() {
            Ok(directive) => filter = filter.add_directive(directive),
            Err(err) => eprintln!("ignoring debug directive `{directive}`: {err}"),
        }
    }
    filter
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let fmt = || {
        tracing_subscriber::fmt::layer()
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_names(true)
    };
    match format {
        LogFormat::Tree => Box::new(
            tracing_tree::HierarchicalLayer::new(2)
                .with_ansi(ansi)
                .with_writer(writer),
        ),
        LogFormat::Pretty => Box::new(fmt().pretty().with_writer(writer)),
        LogFormat::Compact => Box::new(fmt().compact().with_writer(writer)),
        LogFormat::Json => Box::new(
            fmt()
                .json()
                .with_current_span(true)
                .with_span_list(true)
                .with_writer(writer),
        ),
    }
}

fn rotation(rotation: LogRotation) -> tracing_appender::rolling::Rotation {
    use tracing_appender::rolling::Rotation;
    match rotation {
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Never => Rotation::NEVER,
    }
}

fn level_from_verbosity(verbosity: u8) -> tracing::metadata::LevelFilter {
    match verbosity {
        0 => tracing::metadata::LevelFilter::WARN,
        1 => tracing::metadata::LevelFilter::INFO,
        2 => tracing::metadata::LevelFilter::DEBUG,
        _ => tracing::metadata::LevelFilter::TRACE,
    }
}

fn resolve_log_dir(config: &FileLoggingConfig) -> PathBuf {
    config.dir.clone().unwrap_or_else(paths::log_dir)
}

#[derive(Clone, Copy, Debug, Default)]
struct RetentionLimits {
    max_age: Option<Duration>,
    max_files: Option<usize>,
}

impl RetentionLimits {
    fn from_file_config(config: &FileLoggingConfig) -> Self {
        Self {
            max_age: config
                .retention_max_age_days
                .map(|days| Duration::from_secs(days.saturating_mul(24 * 60 * 60))),
            max_files: config.retention_max_files,
        }
    }

    fn is_enabled(&self) -> bool {
        self.max_age.is_some() || self.max_files.is_some()
    }
}

#[derive(Clone, Debug)]
struct LogFile {
    path: PathBuf,
    modified: SystemTime,
}

#[derive(Clone, Debug, Default)]
struct PruneReport {
    candidates: usize,
    removed: usize,
    failed: usize,
}

fn prune_logs(
    dir: &Path,
    prefix: &str,
    retention: RetentionLimits,
    now: SystemTime,
) -> std::io::Result<PruneReport> {
    let mut files = list_log_files(dir, prefix, now)?;
    let candidates = files.len();
    let mut report = PruneReport {
        candidates,
        ..PruneReport::default()
    };
    for path in select_expired(&mut files, retention, now) {
        match fs::remove_file(&path) {
            Ok(()) => report.removed += 1,
            Err(_) => report.failed += 1,
        }
    }
    Ok(report)
}

fn list_log_files(dir: &Path, prefix: &str, now: SystemTime) -> std::io::Result<Vec<LogFile>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(prefix));
        if !matches {
            continue;
        }
        let meta = entry.metadata()?;
        if meta.is_file() {
            files.push(LogFile {
                path,
                modified: meta.modified().unwrap_or(now),
            });
        }
    }
    Ok(files)
}

/// Files past the age limit, then the oldest beyond the count limit.
fn select_expired(
    files: &mut Vec<LogFile>,
    retention: RetentionLimits,
    now: SystemTime,
) -> Vec<PathBuf> {
    let mut expired = Vec::new();
    if let Some(max_age) = retention.max_age {
        files.retain(|file| {
            let age = now.duration_since(file.modified).unwrap_or(Duration::ZERO);
            if age > max_age {
                expired.push(file.path.clone());
                false
            } else {
                true
            }
        });
    }
    if let Some(max_files) = retention.max_files
        && files.len() > max_files
    {
        files.sort_by_key(|file| file.modified);
        let excess = files.len() - max_files;
        expired.extend(files.drain(..excess).map(|file| file.path));
    }
    expired
}
