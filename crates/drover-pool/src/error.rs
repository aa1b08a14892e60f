use thiserror::Error;

/// Errors surfaced by the page pool to its immediate caller.
///
/// Clonable so a single session-creation failure can be propagated to
/// every caller waiting on that attempt.
#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("session create failed: {0}")]
    SessionCreate(String),
    #[error("page create failed: {0}")]
    PageCreate(String),
    #[error("artifact store: {0}")]
    ArtifactStore(String),
    #[error("pool terminated")]
    Terminated,
}
