use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("verification failed: {0}")]
    VerificationError(String),

    #[error("invalid key material: {0}")]
    InvalidKey(String),

    #[error("prekey error: {0}")]
    PreKeyError(String),

    #[error("key storage error: {0}")]
    StorageError(String),
}
