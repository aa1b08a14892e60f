use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{PoolError, SessionArtifacts};

/// Durable store for session artifacts, keyed by account identity.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Load the most recent artifacts for `account`, if present and fresh.
    async fn load(&self, account: &str) -> Result<Option<SessionArtifacts>, PoolError>;
    /// Persist artifacts for `account`, replacing any previous bundle.
    async fn save(&self, account: &str, artifacts: &SessionArtifacts) -> Result<(), PoolError>;
}

/// Filesystem-backed store: one JSON file per sanitized account id.
///
/// Freshness is judged by the `saved_at` stamp inside the bundle against
/// the configured time-to-live; stale bundles load as `None`.
pub struct FsArtifactStore {
    dir: PathBuf,
    ttl: Duration,
}

impl FsArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            dir: dir.into(),
            ttl,
        }
    }

    fn path_for(&self, account: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize(account)))
    }
}

/// Account ids come from the outside; anything unsafe for a file name is
/// mapped to an underscore.
fn sanitize(account: &str) -> String {
    account
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn load(&self, account: &str) -> Result<Option<SessionArtifacts>, PoolError> {
        let path = self.path_for(account);
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PoolError::ArtifactStore(err.to_string())),
        };
        let artifacts: SessionArtifacts = match serde_json::from_slice(&raw) {
            Ok(a) => a,
            Err(err) => {
                warn!(account, %err, "discarding unreadable artifact bundle");
                return Ok(None);
            }
        };
        if artifacts.age_secs() > self.ttl.as_secs() {
            debug!(account, age_secs = artifacts.age_secs(), "artifacts expired");
            return Ok(None);
        }
        Ok(Some(artifacts))
    }

    async fn save(&self, account: &str, artifacts: &SessionArtifacts) -> Result<(), PoolError> {
        if let Some(parent) = self.path_for(account).parent()
            && parent != Path::new("")
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PoolError::ArtifactStore(e.to_string()))?;
        }
        let raw = serde_json::to_vec_pretty(artifacts)
            .map_err(|e| PoolError::ArtifactStore(e.to_string()))?;
        tokio::fs::write(self.path_for(account), raw)
            .await
            .map_err(|e| PoolError::ArtifactStore(e.to_string()))?;
        debug!(account, "artifacts saved");
        Ok(())
    }
}
