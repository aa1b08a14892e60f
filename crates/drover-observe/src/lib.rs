mod error;
pub use error::ObserveError;
mod logger;
pub use logger::{LogConfig, LogFormat, init};
