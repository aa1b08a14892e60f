use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{CapacitySnapshot, JobId, QueueEstimate, time_serde};

/// Acceptance returned by a submission.
///
/// The outer API layer forwards this 1:1 as a 202-style response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReceipt {
    /// Identifier of the accepted job.
    pub job_id: JobId,
    /// When the submission was accepted.
    #[serde(with = "time_serde")]
    pub accepted_at: SystemTime,
    /// Position in the wait queue: 0 when admitted immediately, otherwise
    /// 1-based from the head of the queue.
    pub queue_position: usize,
    /// Advisory start/finish projection.
    pub estimate: QueueEstimate,
    /// Capacity at the moment of acceptance.
    pub capacity: CapacitySnapshot,
}
