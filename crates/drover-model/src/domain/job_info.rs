use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{JobId, JobKind, JobMeta, JobState, StageRecord, time_serde};

/// Full record of a job in the live table.
///
/// `result` and `error` are mutually exclusive and populated only at a
/// terminal state; callers must check `state` before trusting `result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    /// Unique identifier, assigned at submission.
    pub id: JobId,
    /// Which automation task this job runs.
    pub kind: JobKind,
    /// Caller-supplied metadata visible to status queries.
    #[serde(default, skip_serializing_if = "JobMeta::is_empty")]
    pub public_meta: JobMeta,
    /// Current lifecycle state.
    pub state: JobState,
    /// When the submission was accepted.
    #[serde(with = "time_serde")]
    pub accepted_at: SystemTime,
    /// When the job was admitted to run.
    #[serde(default, with = "time_serde::opt")]
    pub started_at: Option<SystemTime>,
    /// When the job reached a terminal state.
    #[serde(default, with = "time_serde::opt")]
    pub finished_at: Option<SystemTime>,
    /// Progress stages, append-only while running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageRecord>,
    /// Task result; present only when `state` is `Succeeded`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Task error; present only when `state` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Attribution metadata, set at submission, immutable.
    #[serde(default, skip_serializing_if = "JobMeta::is_empty")]
    pub created_by: JobMeta,
}

impl JobInfo {
    /// Milliseconds spent queued before admission.
    pub fn queue_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        started
            .duration_since(self.accepted_at)
            .ok()
            .map(|d| d.as_millis() as u64)
    }

    /// Milliseconds spent running, once finished.
    pub fn run_ms(&self) -> Option<u64> {
        let started = self.started_at?;
        let finished = self.finished_at?;
        finished
            .duration_since(started)
            .ok()
            .map(|d| d.as_millis() as u64)
    }

    /// Milliseconds from acceptance to the terminal state.
    pub fn total_ms(&self) -> Option<u64> {
        let finished = self.finished_at?;
        finished
            .duration_since(self.accepted_at)
            .ok()
            .map(|d| d.as_millis() as u64)
    }
}
