use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("totp step must be non-zero")]
    ZeroStep,
}
