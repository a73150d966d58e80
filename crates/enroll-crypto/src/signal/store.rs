use serde::{Deserialize, Serialize};

use crate::identity::IdentityKeyPair;
use crate::signal::prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use crate::CryptoError;

/// How far a stored identity has been confirmed by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerifiedStatus {
    Default,
    Verified,
    Unverified,
}

impl VerifiedStatus {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Default => 0,
            Self::Verified => 1,
            Self::Unverified => 2,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => Self::Verified,
            2 => Self::Unverified,
            _ => Self::Default,
        }
    }
}

/// A saved identity key for some address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity_key: Vec<u8>,
    pub verified: VerifiedStatus,
    /// Trusted on first use.
    pub first_use: bool,
    /// UNIX milliseconds.
    pub timestamp: i64,
    pub nonblocking_approval: bool,
}

/// Storage trait for identity keys.
///
/// Holds our own identity key pair and the identity keys we have saved
/// for addresses (including our own, after registration).
pub trait IdentityKeyStore: Send + Sync {
    /// Our own identity key pair. Errors if none has been stored yet.
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError>;

    /// Replace our own identity key pair.
    fn set_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), CryptoError>;

    /// Upsert the identity record for `address`.
    fn save_identity(&self, address: &str, record: &IdentityRecord) -> Result<(), CryptoError>;

    fn get_identity(&self, address: &str) -> Result<Option<IdentityRecord>, CryptoError>;

    fn identity_count(&self) -> Result<usize, CryptoError>;
}

/// Storage trait for classical prekeys.
pub trait PreKeyStore: Send + Sync {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError>;

    /// Upsert a one-time prekey.
    fn store_prekey(&self, record: &PreKeyRecord) -> Result<(), CryptoError>;

    fn prekey_count(&self) -> Result<usize, CryptoError>;

    fn load_signed_prekey(&self, signed_prekey_id: u32) -> Result<Option<SignedPreKeyRecord>, CryptoError>;

    /// Upsert a signed prekey.
    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), CryptoError>;
}

/// Storage trait for post-quantum prekeys.
pub trait KyberPreKeyStore: Send + Sync {
    fn load_kyber_prekey(&self, prekey_id: u32) -> Result<Option<KyberPreKeyRecord>, CryptoError>;

    /// Upsert a post-quantum prekey, flagged as last-resort or one-time.
    fn store_kyber_prekey(&self, record: &KyberPreKeyRecord, last_resort: bool) -> Result<(), CryptoError>;

    fn is_last_resort_kyber_prekey(&self, prekey_id: u32) -> Result<bool, CryptoError>;

    fn kyber_prekey_count(&self) -> Result<usize, CryptoError>;
}

/// Storage trait for sessions.
///
/// Archiving keeps the session row but removes its active state, so it can
/// never be used to encrypt again.
pub trait SessionStore: Send + Sync {
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError>;

    /// Upsert an active session for `address`.
    fn store_session(&self, address: &str, session_data: &[u8]) -> Result<(), CryptoError>;

    fn archive_all_sessions(&self) -> Result<(), CryptoError>;

    fn active_session_count(&self) -> Result<usize, CryptoError>;
}

/// Group sender-key state, shared by both roles.
pub trait SenderKeyStore: Send + Sync {
    fn store_sender_key(&self, address: &str, distribution_id: &str, data: &[u8]) -> Result<(), CryptoError>;

    fn clear_all(&self) -> Result<(), CryptoError>;

    fn sender_key_count(&self) -> Result<usize, CryptoError>;
}

/// Everything one role needs persisted. Blanket-implemented for any type
/// that provides the narrow traits.
pub trait ProtocolStore: IdentityKeyStore + PreKeyStore + KyberPreKeyStore + SessionStore {}

impl<T> ProtocolStore for T where T: IdentityKeyStore + PreKeyStore + KyberPreKeyStore + SessionStore {}
