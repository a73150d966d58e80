//! In-memory implementations of the protocol storage traits.
//!
//! These are suitable for:
//! - Testing and development
//! - Embedding the provisioning flow without a database
//!
//! **WARNING**: Data is lost on process exit.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::identity::IdentityKeyPair;
use crate::signal::prekeys::{KyberPreKeyRecord, PreKeyRecord, SignedPreKeyRecord};
use crate::signal::store::{
    IdentityKeyStore, IdentityRecord, KyberPreKeyStore, PreKeyStore, SenderKeyStore, SessionStore,
};
use crate::CryptoError;

#[derive(Debug)]
struct SessionEntry {
    data: Vec<u8>,
    archived: bool,
}

/// In-memory protocol store for one role.
#[derive(Default)]
pub struct MemoryProtocolStore {
    identity_key_pair: Mutex<Option<IdentityKeyPair>>,
    identities: Mutex<HashMap<String, IdentityRecord>>,
    prekeys: Mutex<HashMap<u32, PreKeyRecord>>,
    signed_prekeys: Mutex<HashMap<u32, SignedPreKeyRecord>>,
    kyber_prekeys: Mutex<HashMap<u32, (KyberPreKeyRecord, bool)>>,
    sessions: Mutex<HashMap<String, SessionEntry>>,
}

impl MemoryProtocolStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of session rows, archived or not.
    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}

impl IdentityKeyStore for MemoryProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError> {
        self.identity_key_pair
            .lock()
            .clone()
            .ok_or_else(|| CryptoError::StorageError("no identity key pair stored".into()))
    }

    fn set_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), CryptoError> {
        *self.identity_key_pair.lock() = Some(key_pair.clone());
        Ok(())
    }

    fn save_identity(&self, address: &str, record: &IdentityRecord) -> Result<(), CryptoError> {
        self.identities.lock().insert(address.to_string(), record.clone());
        Ok(())
    }

    fn get_identity(&self, address: &str) -> Result<Option<IdentityRecord>, CryptoError> {
        Ok(self.identities.lock().get(address).cloned())
    }

    fn identity_count(&self) -> Result<usize, CryptoError> {
        Ok(self.identities.lock().len())
    }
}

impl PreKeyStore for MemoryProtocolStore {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError> {
        Ok(self.prekeys.lock().get(&prekey_id).cloned())
    }

    fn store_prekey(&self, record: &PreKeyRecord) -> Result<(), CryptoError> {
        self.prekeys.lock().insert(record.id, record.clone());
        Ok(())
    }

    fn prekey_count(&self) -> Result<usize, CryptoError> {
        Ok(self.prekeys.lock().len())
    }

    fn load_signed_prekey(&self, signed_prekey_id: u32) -> Result<Option<SignedPreKeyRecord>, CryptoError> {
        Ok(self.signed_prekeys.lock().get(&signed_prekey_id).cloned())
    }

    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), CryptoError> {
        self.signed_prekeys.lock().insert(record.id, record.clone());
        Ok(())
    }
}

impl KyberPreKeyStore for MemoryProtocolStore {
    fn load_kyber_prekey(&self, prekey_id: u32) -> Result<Option<KyberPreKeyRecord>, CryptoError> {
        Ok(self.kyber_prekeys.lock().get(&prekey_id).map(|(record, _)| record.clone()))
    }

    fn store_kyber_prekey(&self, record: &KyberPreKeyRecord, last_resort: bool) -> Result<(), CryptoError> {
        self.kyber_prekeys
            .lock()
            .insert(record.id, (record.clone(), last_resort));
        Ok(())
    }

    fn is_last_resort_kyber_prekey(&self, prekey_id: u32) -> Result<bool, CryptoError> {
        Ok(self
            .kyber_prekeys
            .lock()
            .get(&prekey_id)
            .is_some_and(|(_, last_resort)| *last_resort))
    }

    fn kyber_prekey_count(&self) -> Result<usize, CryptoError> {
        Ok(self.kyber_prekeys.lock().len())
    }
}

impl SessionStore for MemoryProtocolStore {
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        Ok(self
            .sessions
            .lock()
            .get(address)
            .filter(|entry| !entry.archived)
            .map(|entry| entry.data.clone()))
    }

    fn store_session(&self, address: &str, session_data: &[u8]) -> Result<(), CryptoError> {
        self.sessions.lock().insert(
            address.to_string(),
            SessionEntry {
                data: session_data.to_vec(),
                archived: false,
            },
        );
        Ok(())
    }

    fn archive_all_sessions(&self) -> Result<(), CryptoError> {
        for entry in self.sessions.lock().values_mut() {
            entry.archived = true;
        }
        Ok(())
    }

    fn active_session_count(&self) -> Result<usize, CryptoError> {
        Ok(self.sessions.lock().values().filter(|e| !e.archived).count())
    }
}

/// In-memory sender-key store.
#[derive(Debug, Default)]
pub struct MemorySenderKeyStore {
    keys: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MemorySenderKeyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SenderKeyStore for MemorySenderKeyStore {
    fn store_sender_key(&self, address: &str, distribution_id: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.keys
            .lock()
            .insert((address.to_string(), distribution_id.to_string()), data.to_vec());
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CryptoError> {
        self.keys.lock().clear();
        Ok(())
    }

    fn sender_key_count(&self) -> Result<usize, CryptoError> {
        Ok(self.keys.lock().len())
    }
}
