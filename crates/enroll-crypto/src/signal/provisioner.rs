//! Prekey generation for registration.
//!
//! IDs are reserved from the role's metadata store as soon as they are
//! generated. If the attempt is abandoned those IDs are simply never used;
//! nothing is written to a protocol store here.

use ml_kem::{EncodedSizeUser, KemCore, MlKem768};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};

use crate::identity::IdentityKeyPair;
use crate::role::ServiceIdRole;
use crate::signal::metadata::PreKeyMetadataStore;
use crate::signal::prekeys::{
    KyberPreKeyRecord, PreKeyCollection, PreKeyCollections, PreKeyRecord, SignedPreKeyRecord,
};
use crate::CryptoError;

/// Number of one-time keys generated per batch unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: u32 = 100;

/// Pool sizes for one provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    pub one_time_prekey_batch: u32,
    pub kyber_prekey_batch: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            one_time_prekey_batch: DEFAULT_BATCH_SIZE,
            kyber_prekey_batch: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Generates complete prekey bundles for registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyProvisioner {
    config: ProvisioningConfig,
}

impl KeyProvisioner {
    pub fn new(config: ProvisioningConfig) -> Result<Self, CryptoError> {
        if config.one_time_prekey_batch == 0 || config.kyber_prekey_batch == 0 {
            return Err(CryptoError::PreKeyError("prekey batch sizes must be non-zero".into()));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> ProvisioningConfig {
        self.config
    }

    /// Generate a fresh identity per role and a bundle for each.
    pub fn generate_collections(
        &self,
        primary: &dyn PreKeyMetadataStore,
        secondary: &dyn PreKeyMetadataStore,
    ) -> Result<PreKeyCollections, CryptoError> {
        let primary_identity = IdentityKeyPair::generate();
        let secondary_identity = IdentityKeyPair::generate();
        Ok(PreKeyCollections {
            primary: self.generate(ServiceIdRole::Primary, &primary_identity, primary)?,
            secondary: self.generate(ServiceIdRole::Secondary, &secondary_identity, secondary)?,
        })
    }

    /// Generate one role's bundle, signing with `identity`.
    ///
    /// Reservation order is fixed: signed prekey, one-time EC batch,
    /// last-resort kyber key, one-time kyber batch.
    pub fn generate(
        &self,
        role: ServiceIdRole,
        identity: &IdentityKeyPair,
        metadata: &dyn PreKeyMetadataStore,
    ) -> Result<PreKeyCollection, CryptoError> {
        let now = timestamp_now();

        let next_signed_prekey_id = metadata.next_signed_prekey_id()?;
        let signed_prekey = generate_signed_prekey(next_signed_prekey_id, identity, now);

        let ec_offset = metadata.next_one_time_prekey_ids(self.config.one_time_prekey_batch)?;
        let one_time_ec_prekeys = (0..self.config.one_time_prekey_batch)
            .map(|i| generate_prekey(ec_offset + i))
            .collect();

        let last_resort_id = metadata.next_kyber_prekey_ids(1)?;
        let last_resort_kyber_prekey = generate_kyber_prekey(last_resort_id, identity, now);

        let kyber_offset = metadata.next_kyber_prekey_ids(self.config.kyber_prekey_batch)?;
        let one_time_kyber_prekeys = (0..self.config.kyber_prekey_batch)
            .map(|i| generate_kyber_prekey(kyber_offset + i, identity, now))
            .collect();

        tracing::debug!(
            role = %role,
            signed_prekey_id = next_signed_prekey_id,
            ec_offset,
            last_resort_id,
            kyber_offset,
            "generated prekey collection"
        );

        Ok(PreKeyCollection {
            role,
            identity_key_pair: identity.clone(),
            next_signed_prekey_id,
            ec_one_time_prekey_id_offset: ec_offset,
            last_resort_kyber_prekey_id: last_resort_id,
            one_time_kyber_prekey_id_offset: kyber_offset,
            signed_prekey,
            one_time_ec_prekeys,
            last_resort_kyber_prekey,
            one_time_kyber_prekeys,
        })
    }
}

fn generate_prekey(id: u32) -> PreKeyRecord {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    PreKeyRecord {
        id,
        public_key: public.as_bytes().to_vec(),
        private_key: secret.to_bytes().to_vec(),
    }
}

fn generate_signed_prekey(id: u32, identity: &IdentityKeyPair, timestamp: i64) -> SignedPreKeyRecord {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = X25519Public::from(&secret);
    let signature = identity.sign(public.as_bytes()).to_bytes().to_vec();
    SignedPreKeyRecord {
        id,
        public_key: public.as_bytes().to_vec(),
        private_key: secret.to_bytes().to_vec(),
        signature,
        timestamp,
    }
}

fn generate_kyber_prekey(id: u32, identity: &IdentityKeyPair, timestamp: i64) -> KyberPreKeyRecord {
    let (decapsulation_key, encapsulation_key) = MlKem768::generate(&mut OsRng);
    let public_key = encapsulation_key.as_bytes().to_vec();
    let signature = identity.sign(&public_key).to_bytes().to_vec();
    KyberPreKeyRecord {
        id,
        public_key,
        secret_key: decapsulation_key.as_bytes().to_vec(),
        signature,
        timestamp,
    }
}

/// Current UNIX timestamp in milliseconds.
pub fn timestamp_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}
