use drover_model::JobId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
    #[error("job not found: {0}")]
    JobNotFound(JobId),
}
