use std::any::Any;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{FilterPolicy, PoolError};

/// Durable session state persisted across shared-session lifetimes.
///
/// An opaque bundle of credential state plus per-origin auxiliary state;
/// the pool never looks inside, it only moves the bundle between the
/// backend and the artifact store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionArtifacts {
    /// Credential state (cookies or equivalent).
    pub credentials: serde_json::Value,
    /// Per-origin auxiliary state (local storage or equivalent).
    pub origin_state: serde_json::Value,
    /// Epoch seconds at export time, used for expiry checks.
    pub saved_at: u64,
}

impl SessionArtifacts {
    pub fn new(credentials: serde_json::Value, origin_state: serde_json::Value) -> Self {
        let saved_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            credentials,
            origin_state,
            saved_at,
        }
    }

    /// Age of the bundle in seconds.
    pub fn age_secs(&self) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        now.saturating_sub(self.saved_at)
    }
}

/// One reusable execution surface drawn from the shared session.
///
/// Exclusively owned by a single job body while borrowed from the pool.
/// `as_any` lets the task body reach the backend's concrete page type.
#[async_trait]
pub trait PageHandle: Send {
    /// Tear down the underlying surface.
    async fn close(self: Box<Self>);
    /// Whether the surface has crashed and must not be reused.
    fn is_alive(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
}

/// The single long-lived authenticated context pages are drawn from.
#[async_trait]
pub trait Session: Send + Sync {
    /// Create a new page against this session.
    async fn new_page(&self) -> Result<Box<dyn PageHandle>, PoolError>;
    /// Export the durable artifacts for persistence before teardown.
    async fn export_artifacts(&self) -> Result<SessionArtifacts, PoolError>;
    /// Tear the session down. Pages created from it become unusable.
    async fn close(&self);
}

/// Factory for shared sessions, constructor-injected into the pool so
/// tests can substitute fakes.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Open a fresh session, hydrating from `artifacts` when provided and
    /// applying `policy` to every page the session will produce.
    async fn open(
        &self,
        artifacts: Option<SessionArtifacts>,
        policy: &FilterPolicy,
    ) -> Result<Arc<dyn Session>, PoolError>;
}
