pub mod error;
pub use error::AuthError;
pub mod gate;
pub use gate::{LoginGate, LoginPermit};
