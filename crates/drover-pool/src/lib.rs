pub mod error;
pub use error::PoolError;
pub mod policy;
pub use policy::FilterPolicy;
pub mod session;
pub use session::{PageHandle, Session, SessionArtifacts, SessionBackend};
pub mod store;
pub use store::{ArtifactStore, FsArtifactStore};
pub mod pool;
pub use pool::{PagePool, PoolConfig, PoolStats, PooledPage};
