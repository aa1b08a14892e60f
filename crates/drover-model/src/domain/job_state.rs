use serde::{Deserialize, Serialize};

/// Lifecycle state of a job.
///
/// Transitions are monotonic: `Queued -> Running -> {Succeeded | Failed | Canceled}`.
/// No state is ever revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum JobState {
    /// Accepted but waiting for a running slot.
    Queued,
    /// Task body is executing.
    Running,
    /// Task returned a result.
    Succeeded,
    /// Task returned or raised an error.
    Failed,
    /// Removed from visibility before completion.
    Canceled,
}

impl JobState {
    /// Returns `true` if the job will not transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Canceled
        )
    }

    /// Returns `true` if the job still occupies or awaits a slot.
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Queued | JobState::Running)
    }
}
