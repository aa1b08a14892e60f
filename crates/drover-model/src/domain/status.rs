use serde::{Deserialize, Serialize};

/// Read-only view of one account's login lock, for operational monitoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginLockStatus {
    /// Account identity the lock serializes.
    pub account: String,
    /// Whether a login attempt currently holds the lock.
    pub held: bool,
    /// Acquirers waiting behind the holder.
    pub waiting: usize,
    /// Index of the current one-time-code window.
    pub current_step: u64,
    /// Most recently consumed window index, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_step_used: Option<u64>,
    /// Seconds since a code was last consumed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_age_secs: Option<u64>,
}

/// Aggregate engine status snapshot.
///
/// Consistent counts over the live table plus login-lock introspection;
/// producing it never blocks a submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    /// Jobs currently running.
    pub running: usize,
    /// Jobs waiting for a slot.
    pub queued: usize,
    /// Jobs in a terminal state still present in the live table.
    pub finished: usize,
    /// Concurrency cap in effect.
    pub max_concurrency: usize,
    /// Per-account login lock views.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub login_locks: Vec<LoginLockStatus>,
    /// One-time-code window length in seconds.
    pub totp_step_seconds: u64,
}
