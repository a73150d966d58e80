//! The persisted account record.
//!
//! There is one `AccountState` per running process. It is constructed at
//! startup over the account database and handed to dependents as
//! `Arc<AccountState>`; re-registration replaces its contents, not the
//! instance.

use enroll_crypto::ServiceIdRole;
use rand::Rng;

use crate::db::DbPool;
use crate::error::RegistrationError;
use crate::key_values::{read_u32, write, KeyValueStore};
use crate::prekey_metadata::SqlitePreKeyMetadataStore;
use crate::service_id::ServiceId;

const KEY_ACI: &str = "account.aci";
const KEY_PNI: &str = "account.pni";
const KEY_E164: &str = "account.e164";
const KEY_SERVICE_PASSWORD: &str = "account.service_password";
const KEY_REGISTERED: &str = "account.registered";
const KEY_FCM_TOKEN: &str = "account.fcm_token";
const KEY_FCM_ENABLED: &str = "account.fcm_enabled";
const KEY_REGISTRATION_ID: &str = "account.registration_id";
const KEY_PNI_REGISTRATION_ID: &str = "account.pni_registration_id";
const KEY_UNAUTHORIZED_RECEIVED: &str = "account.unauthorized_received";
const KEY_NEEDS_REREGISTRATION: &str = "account.needs_reregistration";
const KEY_PROMPTED_PUSH_REGISTRATION: &str = "account.prompted_push_registration";

/// Largest registration ID the service accepts (14 bits, excluding the
/// top few values).
pub const MAX_REGISTRATION_ID: u32 = 16380;

pub struct AccountState {
    db: DbPool,
    values: KeyValueStore,
}

impl AccountState {
    pub fn new(db: DbPool) -> Self {
        Self {
            values: KeyValueStore::new(db.clone()),
            db,
        }
    }

    /// Prekey metadata for one role, backed by the same database.
    pub fn pre_keys(&self, role: ServiceIdRole) -> SqlitePreKeyMetadataStore {
        SqlitePreKeyMetadataStore::new(self.db.clone(), role)
    }

    pub fn service_id(&self, role: ServiceIdRole) -> Result<Option<ServiceId>, RegistrationError> {
        let key = match role {
            ServiceIdRole::Primary => KEY_ACI,
            ServiceIdRole::Secondary => KEY_PNI,
        };
        self.values
            .get_string(key)?
            .map(|raw| ServiceId::from_storage_string(&raw))
            .transpose()
    }

    pub fn aci(&self) -> Result<Option<ServiceId>, RegistrationError> {
        self.service_id(ServiceIdRole::Primary)
    }

    pub fn pni(&self) -> Result<Option<ServiceId>, RegistrationError> {
        self.service_id(ServiceIdRole::Secondary)
    }

    pub fn set_service_id(&self, id: &ServiceId) -> Result<(), RegistrationError> {
        let key = match id.role {
            ServiceIdRole::Primary => KEY_ACI,
            ServiceIdRole::Secondary => KEY_PNI,
        };
        self.values.put_string(key, Some(&id.to_storage_string()))?;
        Ok(())
    }

    pub fn e164(&self) -> Result<Option<String>, RegistrationError> {
        Ok(self.values.get_string(KEY_E164)?)
    }

    pub fn set_e164(&self, e164: &str) -> Result<(), RegistrationError> {
        Ok(self.values.put_string(KEY_E164, Some(e164))?)
    }

    pub fn service_password(&self) -> Result<Option<String>, RegistrationError> {
        Ok(self.values.get_string(KEY_SERVICE_PASSWORD)?)
    }

    pub fn set_service_password(&self, password: &str) -> Result<(), RegistrationError> {
        Ok(self.values.put_string(KEY_SERVICE_PASSWORD, Some(password))?)
    }

    pub fn is_registered(&self) -> Result<bool, RegistrationError> {
        Ok(self.values.get_bool(KEY_REGISTERED)?)
    }

    pub fn set_registered(&self, registered: bool) -> Result<(), RegistrationError> {
        Ok(self.values.put_bool(KEY_REGISTERED, registered)?)
    }

    pub fn fcm_token(&self) -> Result<Option<String>, RegistrationError> {
        Ok(self.values.get_string(KEY_FCM_TOKEN)?)
    }

    pub fn set_fcm_token(&self, token: Option<&str>) -> Result<(), RegistrationError> {
        Ok(self.values.put_string(KEY_FCM_TOKEN, token)?)
    }

    pub fn is_fcm_enabled(&self) -> Result<bool, RegistrationError> {
        Ok(self.values.get_bool(KEY_FCM_ENABLED)?)
    }

    pub fn set_fcm_enabled(&self, enabled: bool) -> Result<(), RegistrationError> {
        Ok(self.values.put_bool(KEY_FCM_ENABLED, enabled)?)
    }

    pub fn is_unauthorized_received(&self) -> Result<bool, RegistrationError> {
        Ok(self.values.get_bool(KEY_UNAUTHORIZED_RECEIVED)?)
    }

    pub fn set_unauthorized_received(&self, value: bool) -> Result<(), RegistrationError> {
        Ok(self.values.put_bool(KEY_UNAUTHORIZED_RECEIVED, value)?)
    }

    pub fn needs_reregistration(&self) -> Result<bool, RegistrationError> {
        Ok(self.values.get_bool(KEY_NEEDS_REREGISTRATION)?)
    }

    pub fn set_needs_reregistration(&self, value: bool) -> Result<(), RegistrationError> {
        Ok(self.values.put_bool(KEY_NEEDS_REREGISTRATION, value)?)
    }

    pub fn prompted_push_registration(&self) -> Result<bool, RegistrationError> {
        Ok(self.values.get_bool(KEY_PROMPTED_PUSH_REGISTRATION)?)
    }

    pub fn set_prompted_push_registration(&self, value: bool) -> Result<(), RegistrationError> {
        Ok(self.values.put_bool(KEY_PROMPTED_PUSH_REGISTRATION, value)?)
    }

    /// Flip the account to registered, clearing the sticky re-registration
    /// flags in the same transaction. `registered` is written last, so a
    /// failure leaves it at its prior value.
    pub fn commit_registered(&self) -> Result<(), RegistrationError> {
        self.values.transaction(|conn| {
            write(conn, KEY_PROMPTED_PUSH_REGISTRATION, Some("1"))?;
            write(conn, KEY_UNAUTHORIZED_RECEIVED, Some("0"))?;
            write(conn, KEY_NEEDS_REREGISTRATION, Some("0"))?;
            write(conn, KEY_REGISTERED, Some("1"))
        })?;
        Ok(())
    }

    /// The stored registration ID for `role`, generating and persisting one
    /// on first use. Stable across calls.
    pub fn registration_id(&self, role: ServiceIdRole) -> Result<u32, RegistrationError> {
        let key = match role {
            ServiceIdRole::Primary => KEY_REGISTRATION_ID,
            ServiceIdRole::Secondary => KEY_PNI_REGISTRATION_ID,
        };
        let id = self.values.transaction(|conn| {
            let existing = read_u32(conn, key)?.filter(|id| *id != 0);
            if let Some(id) = existing {
                return Ok(id);
            }
            let id = rand::thread_rng().gen_range(1..=MAX_REGISTRATION_ID);
            write(conn, key, Some(&id.to_string()))?;
            tracing::info!(role = %role, "generated new registration id");
            Ok(id)
        })?;
        Ok(id)
    }
}
