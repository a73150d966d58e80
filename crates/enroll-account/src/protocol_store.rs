//! SQLite-backed protocol stores.
//!
//! One [`SqliteProtocolStore`] per role; rows are partitioned by the role
//! tag. Key records are stored as JSON text.

use enroll_crypto::signal::{
    IdentityKeyStore, IdentityRecord, KyberPreKeyRecord, KyberPreKeyStore, PreKeyRecord, PreKeyStore,
    SenderKeyStore, SessionStore, SignedPreKeyRecord, VerifiedStatus,
};
use enroll_crypto::{CryptoError, IdentityKeyPair, ServiceIdRole};
use rusqlite::{params, OptionalExtension as _};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::DbPool;
use crate::error::storage_err;

#[derive(Clone)]
pub struct SqliteProtocolStore {
    db: DbPool,
    role: ServiceIdRole,
}

impl SqliteProtocolStore {
    pub fn new(db: DbPool, role: ServiceIdRole) -> Self {
        Self { db, role }
    }

    pub fn role(&self) -> ServiceIdRole {
        self.role
    }

    fn upsert_record<T: Serialize>(&self, table: &str, id: u32, record: &T) -> Result<(), CryptoError> {
        let json = to_json(record)?;
        self.db
            .lock()
            .execute(
                &format!(
                    "INSERT INTO {table} (role, key_id, record) VALUES (?1, ?2, ?3)
                     ON CONFLICT(role, key_id) DO UPDATE SET record = excluded.record"
                ),
                params![self.role.as_str(), id, json],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn load_record<T: DeserializeOwned>(&self, table: &str, id: u32) -> Result<Option<T>, CryptoError> {
        let json: Option<String> = self
            .db
            .lock()
            .query_row(
                &format!("SELECT record FROM {table} WHERE role = ?1 AND key_id = ?2"),
                params![self.role.as_str(), id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        json.map(|j| from_json(&j)).transpose()
    }

    fn count(&self, sql: &str) -> Result<usize, CryptoError> {
        let count: i64 = self
            .db
            .lock()
            .query_row(sql, params![self.role.as_str()], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn to_json<T: Serialize>(record: &T) -> Result<String, CryptoError> {
    serde_json::to_string(record).map_err(|e| CryptoError::StorageError(format!("encode record: {e}")))
}

fn from_json<T: DeserializeOwned>(json: &str) -> Result<T, CryptoError> {
    serde_json::from_str(json).map_err(|e| CryptoError::StorageError(format!("decode record: {e}")))
}

impl IdentityKeyStore for SqliteProtocolStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError> {
        let secret: Option<Vec<u8>> = self
            .db
            .lock()
            .query_row(
                "SELECT secret_key FROM own_identity_keys WHERE role = ?",
                params![self.role.as_str()],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        let secret = secret.ok_or_else(|| {
            CryptoError::StorageError(format!("no {} identity key pair stored", self.role))
        })?;
        IdentityKeyPair::from_secret_slice(&secret)
    }

    fn set_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), CryptoError> {
        self.db
            .lock()
            .execute(
                "INSERT INTO own_identity_keys (role, secret_key) VALUES (?1, ?2)
                 ON CONFLICT(role) DO UPDATE SET secret_key = excluded.secret_key",
                params![self.role.as_str(), key_pair.secret_key_bytes().as_slice()],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn save_identity(&self, address: &str, record: &IdentityRecord) -> Result<(), CryptoError> {
        self.db
            .lock()
            .execute(
                "INSERT INTO identities
                    (role, address, identity_key, verified, first_use, timestamp, nonblocking_approval)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(role, address) DO UPDATE SET
                    identity_key = excluded.identity_key,
                    verified = excluded.verified,
                    first_use = excluded.first_use,
                    timestamp = excluded.timestamp,
                    nonblocking_approval = excluded.nonblocking_approval",
                params![
                    self.role.as_str(),
                    address,
                    record.identity_key,
                    record.verified.as_i64(),
                    record.first_use,
                    record.timestamp,
                    record.nonblocking_approval,
                ],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn get_identity(&self, address: &str) -> Result<Option<IdentityRecord>, CryptoError> {
        self.db
            .lock()
            .query_row(
                "SELECT identity_key, verified, first_use, timestamp, nonblocking_approval
                 FROM identities WHERE role = ?1 AND address = ?2",
                params![self.role.as_str(), address],
                |row| {
                    Ok(IdentityRecord {
                        identity_key: row.get(0)?,
                        verified: VerifiedStatus::from_i64(row.get(1)?),
                        first_use: row.get(2)?,
                        timestamp: row.get(3)?,
                        nonblocking_approval: row.get(4)?,
                    })
                },
            )
            .optional()
            .map_err(storage_err)
    }

    fn identity_count(&self) -> Result<usize, CryptoError> {
        self.count("SELECT COUNT(*) FROM identities WHERE role = ?")
    }
}

impl PreKeyStore for SqliteProtocolStore {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError> {
        self.load_record("one_time_prekeys", prekey_id)
    }

    fn store_prekey(&self, record: &PreKeyRecord) -> Result<(), CryptoError> {
        self.upsert_record("one_time_prekeys", record.id, record)
    }

    fn prekey_count(&self) -> Result<usize, CryptoError> {
        self.count("SELECT COUNT(*) FROM one_time_prekeys WHERE role = ?")
    }

    fn load_signed_prekey(&self, signed_prekey_id: u32) -> Result<Option<SignedPreKeyRecord>, CryptoError> {
        self.load_record("signed_prekeys", signed_prekey_id)
    }

    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), CryptoError> {
        self.upsert_record("signed_prekeys", record.id, record)
    }
}

impl KyberPreKeyStore for SqliteProtocolStore {
    fn load_kyber_prekey(&self, prekey_id: u32) -> Result<Option<KyberPreKeyRecord>, CryptoError> {
        self.load_record("kyber_prekeys", prekey_id)
    }

    fn store_kyber_prekey(&self, record: &KyberPreKeyRecord, last_resort: bool) -> Result<(), CryptoError> {
        let json = to_json(record)?;
        self.db
            .lock()
            .execute(
                "INSERT INTO kyber_prekeys (role, key_id, record, last_resort) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(role, key_id) DO UPDATE SET
                    record = excluded.record,
                    last_resort = excluded.last_resort",
                params![self.role.as_str(), record.id, json, last_resort],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn is_last_resort_kyber_prekey(&self, prekey_id: u32) -> Result<bool, CryptoError> {
        let flag: Option<bool> = self
            .db
            .lock()
            .query_row(
                "SELECT last_resort FROM kyber_prekeys WHERE role = ?1 AND key_id = ?2",
                params![self.role.as_str(), prekey_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)?;
        Ok(flag.unwrap_or(false))
    }

    fn kyber_prekey_count(&self) -> Result<usize, CryptoError> {
        self.count("SELECT COUNT(*) FROM kyber_prekeys WHERE role = ?")
    }
}

impl SessionStore for SqliteProtocolStore {
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        self.db
            .lock()
            .query_row(
                "SELECT data FROM sessions WHERE role = ?1 AND address = ?2 AND archived = 0",
                params![self.role.as_str(), address],
                |row| row.get(0),
            )
            .optional()
            .map_err(storage_err)
    }

    fn store_session(&self, address: &str, session_data: &[u8]) -> Result<(), CryptoError> {
        self.db
            .lock()
            .execute(
                "INSERT INTO sessions (role, address, data, archived) VALUES (?1, ?2, ?3, 0)
                 ON CONFLICT(role, address) DO UPDATE SET data = excluded.data, archived = 0",
                params![self.role.as_str(), address, session_data],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn archive_all_sessions(&self) -> Result<(), CryptoError> {
        let archived = self
            .db
            .lock()
            .execute(
                "UPDATE sessions SET archived = 1 WHERE role = ? AND archived = 0",
                params![self.role.as_str()],
            )
            .map_err(storage_err)?;
        tracing::debug!(role = %self.role, archived, "archived sessions");
        Ok(())
    }

    fn active_session_count(&self) -> Result<usize, CryptoError> {
        self.count("SELECT COUNT(*) FROM sessions WHERE role = ? AND archived = 0")
    }
}

/// Sender-key state for group messaging. Not partitioned by role.
#[derive(Clone)]
pub struct SqliteSenderKeyStore {
    db: DbPool,
}

impl SqliteSenderKeyStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }
}

impl SenderKeyStore for SqliteSenderKeyStore {
    fn store_sender_key(&self, address: &str, distribution_id: &str, data: &[u8]) -> Result<(), CryptoError> {
        self.db
            .lock()
            .execute(
                "INSERT INTO sender_keys (address, distribution_id, data) VALUES (?1, ?2, ?3)
                 ON CONFLICT(address, distribution_id) DO UPDATE SET data = excluded.data",
                params![address, distribution_id, data],
            )
            .map_err(storage_err)?;
        Ok(())
    }

    fn clear_all(&self) -> Result<(), CryptoError> {
        self.db
            .lock()
            .execute("DELETE FROM sender_keys", [])
            .map_err(storage_err)?;
        Ok(())
    }

    fn sender_key_count(&self) -> Result<usize, CryptoError> {
        let count: i64 = self
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM sender_keys", [], |row| row.get(0))
            .map_err(storage_err)?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use enroll_crypto::signal::MemoryPreKeyMetadataStore;
    use enroll_crypto::KeyProvisioner;

    use super::*;
    use crate::db::open_database;

    fn stores() -> (SqliteProtocolStore, SqliteProtocolStore) {
        let db = open_database(":memory:").unwrap();
        (
            SqliteProtocolStore::new(db.clone(), ServiceIdRole::Primary),
            SqliteProtocolStore::new(db, ServiceIdRole::Secondary),
        )
    }

    #[test]
    fn identity_key_pair_roundtrip_per_role() {
        let (aci, pni) = stores();
        assert!(aci.get_identity_key_pair().is_err());

        let key = IdentityKeyPair::generate();
        aci.set_identity_key_pair(&key).unwrap();

        assert_eq!(
            aci.get_identity_key_pair().unwrap().public_key_bytes(),
            key.public_key_bytes()
        );
        assert!(pni.get_identity_key_pair().is_err());
    }

    #[test]
    fn identity_save_is_upsert() {
        let (aci, _) = stores();
        let mut record = IdentityRecord {
            identity_key: vec![1; 32],
            verified: VerifiedStatus::Default,
            first_use: false,
            timestamp: 1,
            nonblocking_approval: false,
        };
        aci.save_identity("1", &record).unwrap();

        record.verified = VerifiedStatus::Verified;
        record.timestamp = 2;
        aci.save_identity("1", &record).unwrap();

        assert_eq!(aci.identity_count().unwrap(), 1);
        assert_eq!(aci.get_identity("1").unwrap(), Some(record));
    }

    #[test]
    fn prekey_records_roundtrip() {
        let (aci, pni) = stores();
        let provisioner = KeyProvisioner::new(enroll_crypto::signal::ProvisioningConfig {
            one_time_prekey_batch: 3,
            kyber_prekey_batch: 2,
        })
        .unwrap();
        let collection = provisioner
            .generate(
                ServiceIdRole::Primary,
                &IdentityKeyPair::generate(),
                &MemoryPreKeyMetadataStore::new(),
            )
            .unwrap();

        aci.store_signed_prekey(&collection.signed_prekey).unwrap();
        for key in &collection.one_time_ec_prekeys {
            aci.store_prekey(key).unwrap();
        }
        aci.store_kyber_prekey(&collection.last_resort_kyber_prekey, true).unwrap();
        for key in &collection.one_time_kyber_prekeys {
            aci.store_kyber_prekey(key, false).unwrap();
        }

        assert_eq!(
            aci.load_signed_prekey(collection.signed_prekey.id).unwrap(),
            Some(collection.signed_prekey.clone())
        );
        assert_eq!(aci.prekey_count().unwrap(), 3);
        assert_eq!(aci.kyber_prekey_count().unwrap(), 3);
        assert!(aci.is_last_resort_kyber_prekey(collection.last_resort_kyber_prekey_id).unwrap());
        assert!(!aci.is_last_resort_kyber_prekey(collection.one_time_kyber_prekey_id_offset).unwrap());
        assert_eq!(pni.prekey_count().unwrap(), 0);
    }

    #[test]
    fn archive_hides_sessions_from_load() {
        let (aci, pni) = stores();
        aci.store_session("alice", b"state").unwrap();
        pni.store_session("alice", b"other").unwrap();

        aci.archive_all_sessions().unwrap();

        assert_eq!(aci.load_session("alice").unwrap(), None);
        assert_eq!(aci.active_session_count().unwrap(), 0);
        assert_eq!(pni.active_session_count().unwrap(), 1);

        aci.store_session("alice", b"fresh").unwrap();
        assert_eq!(aci.load_session("alice").unwrap().as_deref(), Some(&b"fresh"[..]));
    }

    #[test]
    fn sender_keys_clear_all() {
        let store = SqliteSenderKeyStore::new(open_database(":memory:").unwrap());
        store.store_sender_key("alice", "group-1", b"k").unwrap();
        store.store_sender_key("bob", "group-1", b"k").unwrap();
        assert_eq!(store.sender_key_count().unwrap(), 2);

        store.clear_all().unwrap();
        assert_eq!(store.sender_key_count().unwrap(), 0);
    }
}
