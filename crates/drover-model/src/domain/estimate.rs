use serde::{Deserialize, Serialize};

/// Advisory projection of when a freshly submitted job will start and finish.
///
/// Computed from per-kind historical run durations; never used to order or
/// block execution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEstimate {
    /// Seconds until the job is expected to be admitted.
    pub start_seconds: u64,
    /// Seconds until the job is expected to reach a terminal state.
    pub finish_seconds: u64,
}

/// Point-in-time view of scheduler capacity, returned with every acceptance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapacitySnapshot {
    /// Concurrency cap in effect at the time of the snapshot.
    pub max_concurrency: usize,
    /// Jobs currently running.
    pub running: usize,
    /// Jobs currently queued.
    pub queued: usize,
    /// Free running slots: `max(0, max_concurrency - running)`.
    pub slots_available: usize,
}

impl CapacitySnapshot {
    pub fn new(max_concurrency: usize, running: usize, queued: usize) -> Self {
        Self {
            max_concurrency,
            running,
            queued,
            slots_available: max_concurrency.saturating_sub(running),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slots_never_negative() {
        let snap = CapacitySnapshot::new(2, 5, 0);
        assert_eq!(snap.slots_available, 0);
    }

    #[test]
    fn slots_when_free() {
        let snap = CapacitySnapshot::new(4, 1, 2);
        assert_eq!(snap.slots_available, 3);
    }
}
