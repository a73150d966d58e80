//! Prekey records and the per-role bundles produced during registration.
//!
//! A [`PreKeyCollection`] holds private key material and only ever lives in
//! memory until the server confirms the account. [`PreKeyUpload`] is its
//! public half, the part that actually leaves the device.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;
use crate::identity::IdentityKeyPair;
use crate::role::ServiceIdRole;

/// A one-time classical (X25519) prekey.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PreKeyRecord {
    #[zeroize(skip)]
    pub id: u32,
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// A medium-lived X25519 prekey signed by the identity key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SignedPreKeyRecord {
    #[zeroize(skip)]
    pub id: u32,
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    pub private_key: Vec<u8>,
    #[zeroize(skip)]
    pub signature: Vec<u8>,
    /// Creation time, UNIX milliseconds.
    #[zeroize(skip)]
    pub timestamp: i64,
}

/// A post-quantum (ML-KEM-768) prekey signed by the identity key.
///
/// Used both for the reusable last-resort key and the one-time pool.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KyberPreKeyRecord {
    #[zeroize(skip)]
    pub id: u32,
    /// Encoded encapsulation key.
    #[zeroize(skip)]
    pub public_key: Vec<u8>,
    /// Encoded decapsulation key.
    pub secret_key: Vec<u8>,
    #[zeroize(skip)]
    pub signature: Vec<u8>,
    #[zeroize(skip)]
    pub timestamp: i64,
}

macro_rules! redacted_debug {
    ($ty:ty, $($field:ident),+) => {
        impl std::fmt::Debug for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($ty))
                    $(.field(stringify!($field), &self.$field))+
                    .finish_non_exhaustive()
            }
        }
    };
}

redacted_debug!(PreKeyRecord, id);
redacted_debug!(SignedPreKeyRecord, id, timestamp);
redacted_debug!(KyberPreKeyRecord, id, timestamp);

/// Everything generated for one role during a registration attempt.
///
/// The ID fields record where each range started in the role's metadata
/// store, so the finalizer can restore the active/last-resort pointers.
#[derive(Debug, Clone)]
pub struct PreKeyCollection {
    pub role: ServiceIdRole,
    pub identity_key_pair: IdentityKeyPair,
    pub next_signed_prekey_id: u32,
    pub ec_one_time_prekey_id_offset: u32,
    pub last_resort_kyber_prekey_id: u32,
    pub one_time_kyber_prekey_id_offset: u32,
    pub signed_prekey: SignedPreKeyRecord,
    pub one_time_ec_prekeys: Vec<PreKeyRecord>,
    pub last_resort_kyber_prekey: KyberPreKeyRecord,
    pub one_time_kyber_prekeys: Vec<KyberPreKeyRecord>,
}

/// Both roles' collections from one `generate_collections` call.
#[derive(Debug, Clone)]
pub struct PreKeyCollections {
    pub primary: PreKeyCollection,
    pub secondary: PreKeyCollection,
}

impl PreKeyCollections {
    pub fn for_role(&self, role: ServiceIdRole) -> &PreKeyCollection {
        match role {
            ServiceIdRole::Primary => &self.primary,
            ServiceIdRole::Secondary => &self.secondary,
        }
    }
}

/// Public key with its ID, as sent to the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
}

/// Public key with its ID and identity signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedSignedKey {
    pub key_id: u32,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

/// The public projection of a [`PreKeyCollection`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreKeyUpload {
    pub role: ServiceIdRole,
    pub identity_key: Vec<u8>,
    pub signed_prekey: UploadedSignedKey,
    pub one_time_ec_prekeys: Vec<UploadedKey>,
    pub last_resort_kyber_prekey: UploadedSignedKey,
    pub one_time_kyber_prekeys: Vec<UploadedSignedKey>,
}

impl PreKeyCollection {
    /// Strip private material for transmission.
    pub fn upload(&self) -> PreKeyUpload {
        PreKeyUpload {
            role: self.role,
            identity_key: self.identity_key_pair.public_key_bytes().to_vec(),
            signed_prekey: UploadedSignedKey {
                key_id: self.signed_prekey.id,
                public_key: self.signed_prekey.public_key.clone(),
                signature: self.signed_prekey.signature.clone(),
            },
            one_time_ec_prekeys: self
                .one_time_ec_prekeys
                .iter()
                .map(|k| UploadedKey {
                    key_id: k.id,
                    public_key: k.public_key.clone(),
                })
                .collect(),
            last_resort_kyber_prekey: signed_kyber(&self.last_resort_kyber_prekey),
            one_time_kyber_prekeys: self.one_time_kyber_prekeys.iter().map(signed_kyber).collect(),
        }
    }

    /// Check every signature in the collection against its identity key.
    pub fn verify(&self) -> Result<(), CryptoError> {
        let identity = self.identity_key_pair.public_key_bytes();

        IdentityKeyPair::verify(
            &identity,
            &self.signed_prekey.public_key,
            &self.signed_prekey.signature,
        )?;

        for kyber in std::iter::once(&self.last_resort_kyber_prekey).chain(&self.one_time_kyber_prekeys) {
            IdentityKeyPair::verify(&identity, &kyber.public_key, &kyber.signature).map_err(|e| {
                CryptoError::VerificationError(format!("kyber prekey {}: {e}", kyber.id))
            })?;
        }

        Ok(())
    }
}

fn signed_kyber(record: &KyberPreKeyRecord) -> UploadedSignedKey {
    UploadedSignedKey {
        key_id: record.id,
        public_key: record.public_key.clone(),
        signature: record.signature.clone(),
    }
}
