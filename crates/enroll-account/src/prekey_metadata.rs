use enroll_crypto::signal::metadata::{reserve_range, PreKeyMetadataStore};
use enroll_crypto::{CryptoError, ServiceIdRole};

use crate::db::DbPool;
use crate::error::storage_err;
use crate::key_values::{read_u32, write, KeyValueStore};

/// SQLite-backed prekey metadata for one role.
///
/// Each reservation is a read-modify-write inside one transaction taken
/// under the connection lock, so concurrent callers are serialized.
#[derive(Clone)]
pub struct SqlitePreKeyMetadataStore {
    values: KeyValueStore,
    role: ServiceIdRole,
}

impl SqlitePreKeyMetadataStore {
    pub fn new(db: DbPool, role: ServiceIdRole) -> Self {
        Self {
            values: KeyValueStore::new(db),
            role,
        }
    }

    fn key(&self, name: &str) -> String {
        format!("prekeys.{}.{name}", self.role)
    }

    fn reserve(&self, name: &str, count: u32, kind: &str) -> Result<u32, CryptoError> {
        let key = self.key(name);
        let mut outcome = Ok(0);
        self.values
            .transaction(|conn| {
                let mut counter = read_u32(conn, &key)?.unwrap_or(0);
                outcome = reserve_range(&mut counter, count, kind);
                if outcome.is_ok() {
                    write(conn, &key, Some(&counter.to_string()))?;
                }
                Ok(())
            })
            .map_err(storage_err)?;
        outcome
    }

    fn get_id(&self, name: &str) -> Result<Option<u32>, CryptoError> {
        self.values.get_u32(&self.key(name)).map_err(storage_err)
    }

    fn set_id(&self, name: &str, id: u32) -> Result<(), CryptoError> {
        self.values.put_u32(&self.key(name), id).map_err(storage_err)
    }
}

impl PreKeyMetadataStore for SqlitePreKeyMetadataStore {
    fn next_signed_prekey_id(&self) -> Result<u32, CryptoError> {
        self.reserve("last_signed_id", 1, "signed prekey")
    }

    fn next_one_time_prekey_ids(&self, count: u32) -> Result<u32, CryptoError> {
        self.reserve("last_one_time_id", count, "one-time prekey")
    }

    fn next_kyber_prekey_ids(&self, count: u32) -> Result<u32, CryptoError> {
        self.reserve("last_kyber_id", count, "kyber prekey")
    }

    fn active_signed_prekey_id(&self) -> Result<Option<u32>, CryptoError> {
        self.get_id("active_signed_id")
    }

    fn set_active_signed_prekey_id(&self, id: u32) -> Result<(), CryptoError> {
        self.set_id("active_signed_id", id)
    }

    fn last_resort_kyber_prekey_id(&self) -> Result<Option<u32>, CryptoError> {
        self.get_id("last_resort_kyber_id")
    }

    fn set_last_resort_kyber_prekey_id(&self, id: u32) -> Result<(), CryptoError> {
        self.set_id("last_resort_kyber_id", id)
    }

    fn is_signed_prekey_registered(&self) -> Result<bool, CryptoError> {
        self.values
            .get_bool(&self.key("signed_registered"))
            .map_err(storage_err)
    }

    fn set_signed_prekey_registered(&self, registered: bool) -> Result<(), CryptoError> {
        self.values
            .put_bool(&self.key("signed_registered"), registered)
            .map_err(storage_err)
    }
}
