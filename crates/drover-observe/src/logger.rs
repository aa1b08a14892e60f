use std::io::IsTerminal;
use std::str::FromStr;

use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, fmt, fmt::time::OffsetTime, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::ObserveError;

/// Output encoding for engine logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
    Journald,
}

impl FromStr for LogFormat {
    type Err = ObserveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            "journald" | "journal" => {
                #[cfg(all(target_os = "linux", feature = "journald"))]
                {
                    Ok(LogFormat::Journald)
                }

                #[cfg(not(all(target_os = "linux", feature = "journald")))]
                {
                    Err(ObserveError::JournaldUnavailable)
                }
            }
            _ => Err(ObserveError::UnknownFormat(s.to_string())),
        }
    }
}

/// Subscriber bootstrap settings for the engine process.
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
    /// `EnvFilter` directive set, e.g. `"info,drover_core=debug"`.
    pub filter: String,
    /// Emit the module path with each event.
    pub targets: bool,
    pub color: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Text,
            filter: "info".to_string(),
            targets: true,
            color: std::io::stdout().is_terminal(),
        }
    }
}

impl LogConfig {
    /// Defaults overridden by `DROVER_LOG` (filter directives) and
    /// `DROVER_LOG_FORMAT`.
    pub fn from_env() -> Result<Self, ObserveError> {
        let mut cfg = Self::default();
        if let Ok(filter) = std::env::var("DROVER_LOG")
            && !filter.is_empty()
        {
            cfg.filter = filter;
        }
        if let Ok(format) = std::env::var("DROVER_LOG_FORMAT")
            && !format.is_empty()
        {
            cfg.format = format.parse()?;
        }
        Ok(cfg)
    }
}

/// Install the process-wide subscriber described by `cfg`.
pub fn init(cfg: &LogConfig) -> Result<(), ObserveError> {
    let filter =
        EnvFilter::try_new(&cfg.filter).map_err(|e| ObserveError::BadFilter(e.to_string()))?;
    match cfg.format {
        LogFormat::Text => {
            let layer = fmt::layer()
                .with_ansi(cfg.color)
                .with_target(cfg.targets)
                .with_timer(rfc3339_timer());
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Json => {
            let layer = fmt::layer()
                .json()
                .with_ansi(false)
                .with_target(cfg.targets)
                .with_timer(rfc3339_timer());
            install(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Journald => init_journald(filter),
    }
}

fn rfc3339_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn install<S>(subscriber: S) -> Result<(), ObserveError>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        let msg = e.to_string();
        if msg.contains("global default trace dispatcher") || msg.contains("SetGlobalDefault") {
            ObserveError::AlreadyInstalled
        } else {
            ObserveError::Install(msg)
        }
    })
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn init_journald(filter: EnvFilter) -> Result<(), ObserveError> {
    let layer = tracing_journald::layer().map_err(|e| ObserveError::Install(e.to_string()))?;
    install(tracing_subscriber::registry().with(filter).with(layer))
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn init_journald(_filter: EnvFilter) -> Result<(), ObserveError> {
    Err(ObserveError::JournaldUnavailable)
}
