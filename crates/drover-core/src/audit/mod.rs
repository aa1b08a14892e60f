use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use drover_model::{JobId, JobInfo, JobMeta, JobState, StageRecord};

/// Terminal job summary handed to the audit sink.
///
/// Carries everything long-term storage needs so the live table can be
/// evicted independently. Timestamps are epoch seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    pub id: JobId,
    pub kind: String,
    pub state: JobState,
    pub accepted_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "JobMeta::is_empty")]
    pub created_by: JobMeta,
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

impl From<&JobInfo> for JobRecord {
    fn from(info: &JobInfo) -> Self {
        Self {
            id: info.id.clone(),
            kind: info.kind.clone(),
            state: info.state,
            accepted_at: epoch_secs(info.accepted_at),
            started_at: info.started_at.map(epoch_secs),
            finished_at: info.finished_at.map(epoch_secs),
            queue_ms: info.queue_ms(),
            run_ms: info.run_ms(),
            total_ms: info.total_ms(),
            stages: info.stages.clone(),
            result: info.result.clone(),
            error: info.error.clone(),
            created_by: info.created_by.clone(),
        }
    }
}

/// Receiver for terminal job records.
///
/// The scheduler emits exactly one record per job reaching a terminal
/// state and never retries or blocks admission on the sink.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: JobRecord);
}

/// Default sink: one structured tracing event per finished job.
pub struct LogSink;

#[async_trait]
impl AuditSink for LogSink {
    async fn record(&self, record: JobRecord) {
        info!(
            job = %record.id,
            kind = %record.kind,
            state = ?record.state,
            run_ms = record.run_ms,
            total_ms = record.total_ms,
            "job finished"
        );
    }
}
