use thiserror::Error;

/// Failures raised while bootstrapping the engine's tracing subscriber.
#[derive(Debug, Error)]
pub enum ObserveError {
    #[error("unknown log format: {0} (expected text|json|journald)")]
    UnknownFormat(String),
    #[error("bad log filter: {0}")]
    BadFilter(String),
    #[error("journald output is unavailable on this platform")]
    JournaldUnavailable,
    #[error("a subscriber is already installed")]
    AlreadyInstalled,
    #[error("subscriber install failed: {0}")]
    Install(String),
}
