use enroll_crypto::CryptoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The server confirmation could not be parsed. Fatal for the attempt;
    /// detected before any state is touched.
    #[error("malformed server response: {0}")]
    MalformedResponse(String),

    /// Storage or I/O failure. Safe to retry with the same inputs.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("registration already in progress")]
    InProgress,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl RegistrationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::InProgress)
    }
}

impl From<rusqlite::Error> for RegistrationError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<CryptoError> for RegistrationError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::StorageError(msg) => Self::Storage(msg),
            other => Self::Crypto(other),
        }
    }
}

/// Map a `rusqlite` failure into the store-facing error type.
pub(crate) fn storage_err(e: rusqlite::Error) -> CryptoError {
    CryptoError::StorageError(e.to_string())
}
