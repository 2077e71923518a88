use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::OnceLock;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_filter(self) -> LevelFilter {
        match self {
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct LogConfig {
    pub level: LogLevel,
    pub file: Option<PathBuf>,
}

#[derive(thiserror::Error, Debug)]
pub enum InitError {
    #[error("failed to open log file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to configure logger: {0}")]
    Configure(String),
}

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// webrtc-rs is chatty below info; keep its crates at warn unless `RUST_LOG`
/// says otherwise.
const NOISY_TARGETS: &[&str] = &["webrtc", "webrtc_ice", "webrtc_dtls", "webrtc_sctp", "webrtc_srtp", "hyper", "reqwest"];

pub fn env_filter(level: LogLevel) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let mut directives = vec![level.to_filter().to_string()];
    if level > LogLevel::Warn {
        directives.extend(NOISY_TARGETS.iter().map(|target| format!("{target}=warn")));
    }
    EnvFilter::new(directives.join(","))
}

/// Installs the global subscriber. Logs go to stderr, or to `file` through a
/// non-blocking appender whose guard lives for the rest of the process.
pub fn init(config: &LogConfig) -> Result<(), InitError> {
    let filter = env_filter(config.level);
    let registry = Registry::default().with(filter);

    match &config.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| InitError::Io {
                    path: path.clone(),
                    source,
                })?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_target(config.level >= LogLevel::Debug)
                        .with_writer(writer),
                )
                .try_init()
                .map_err(|err| InitError::Configure(err.to_string()))?;
            let _ = GUARD.set(guard);
        }
        None => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(config.level >= LogLevel::Debug)
                    .with_writer(std::io::stderr),
            )
            .try_init()
            .map_err(|err| InitError::Configure(err.to_string()))?,
    }
    Ok(())
}
