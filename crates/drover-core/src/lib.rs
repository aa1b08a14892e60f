pub mod error;
pub use error::CoreError;
pub mod audit;
pub use audit::{AuditSink, JobRecord, LogSink};
pub mod history;
pub use history::DurationHistory;
pub mod settings;
pub use settings::SettingsStore;
pub mod scheduler;
pub use scheduler::{JobContext, JobFuture, JobTask, Scheduler};
