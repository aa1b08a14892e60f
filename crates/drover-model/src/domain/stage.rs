use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::{JobMeta, time_serde};

/// One named phase inside a running job.
///
/// Stages are append-only progress markers: the task body opens a new one
/// whenever it moves to the next step, which closes the previous one.
/// The last stage stays open (`ended_at: None`) while the job runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRecord {
    /// Stage name as reported by the task body.
    pub name: String,
    /// When the stage was opened.
    #[serde(with = "time_serde")]
    pub started_at: SystemTime,
    /// When the stage was closed; `None` while the stage is current.
    #[serde(default, with = "time_serde::opt")]
    pub ended_at: Option<SystemTime>,
    /// Optional structured detail supplied by the task body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<JobMeta>,
    /// Error noted while this stage was current, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StageRecord {
    /// Open a new stage at `now`.
    pub fn open(name: impl Into<String>, meta: Option<JobMeta>, now: SystemTime) -> Self {
        Self {
            name: name.into(),
            started_at: now,
            ended_at: None,
            meta,
            error: None,
        }
    }

    /// Close the stage at `now`. Closing an already-closed stage keeps the
    /// original end timestamp.
    pub fn close(&mut self, now: SystemTime) {
        if self.ended_at.is_none() {
            self.ended_at = Some(now);
        }
    }

    /// Wall-clock duration in milliseconds, if the stage has closed.
    pub fn duration_ms(&self) -> Option<u64> {
        let ended = self.ended_at?;
        ended
            .duration_since(self.started_at)
            .ok()
            .map(|d| d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn open_stage_has_no_end() {
        let stage = StageRecord::open("fill-form", None, SystemTime::now());
        assert!(stage.ended_at.is_none());
        assert!(stage.duration_ms().is_none());
    }

    #[test]
    fn close_stamps_duration() {
        let start = SystemTime::now();
        let mut stage = StageRecord::open("login", None, start);
        stage.close(start + Duration::from_millis(250));
        assert_eq!(stage.duration_ms(), Some(250));
    }

    #[test]
    fn double_close_keeps_first_end() {
        let start = SystemTime::now();
        let mut stage = StageRecord::open("login", None, start);
        stage.close(start + Duration::from_millis(100));
        stage.close(start + Duration::from_millis(500));
        assert_eq!(stage.duration_ms(), Some(100));
    }
}
