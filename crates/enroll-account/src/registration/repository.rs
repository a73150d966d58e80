//! Turning a server-confirmed registration into a committed local account.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use enroll_crypto::signal::provisioner::timestamp_now;
use enroll_crypto::signal::{
    IdentityRecord, PreKeyCollection, PreKeyCollections, PreKeyMetadataStore, ProtocolStore, SenderKeyStore,
    VerifiedStatus,
};
use enroll_crypto::{KeyProvisioner, ServiceIdRole};
use tokio::task::JoinHandle;

use crate::account::AccountState;
use crate::collaborators::{
    ConnectionManager, JobScheduler, MaintenanceJob, NotificationManager, PeriodicSchedule,
    PinStateHandler,
};
use crate::config::EnrollConfig;
use crate::db::{open_database, DbPool};
use crate::error::RegistrationError;
use crate::profile_key::ProfileKey;
use crate::protocol_store::{SqliteProtocolStore, SqliteSenderKeyStore};
use crate::recipients::{RecipientCache, RecipientId, RecipientTable};
use crate::registration::data::{RegistrationData, VerifyResponse};
use crate::service_id::ServiceId;

/// The stores belonging to one role.
#[derive(Clone)]
pub struct RoleStores {
    pub protocol: Arc<dyn ProtocolStore>,
    pub metadata: Arc<dyn PreKeyMetadataStore>,
}

/// Every store finalization writes to.
#[derive(Clone)]
pub struct AccountStores {
    pub account: Arc<AccountState>,
    pub primary: RoleStores,
    pub secondary: RoleStores,
    pub sender_keys: Arc<dyn SenderKeyStore>,
    pub recipients: Arc<RecipientTable>,
    pub recipient_cache: Arc<RecipientCache>,
}

impl AccountStores {
    /// All stores backed by one SQLite database.
    pub fn sqlite(db: DbPool) -> Self {
        let account = Arc::new(AccountState::new(db.clone()));
        let role = |role: ServiceIdRole| RoleStores {
            protocol: Arc::new(SqliteProtocolStore::new(db.clone(), role)),
            metadata: Arc::new(account.pre_keys(role)),
        };
        Self {
            primary: role(ServiceIdRole::Primary),
            secondary: role(ServiceIdRole::Secondary),
            sender_keys: Arc::new(SqliteSenderKeyStore::new(db.clone())),
            recipients: Arc::new(RecipientTable::new(db)),
            recipient_cache: Arc::new(RecipientCache::new()),
            account,
        }
    }

    pub fn role(&self, role: ServiceIdRole) -> &RoleStores {
        match role {
            ServiceIdRole::Primary => &self.primary,
            ServiceIdRole::Secondary => &self.secondary,
        }
    }
}

/// Services notified once the account is committed.
#[derive(Clone)]
pub struct Collaborators {
    pub pin_state: Arc<dyn PinStateHandler>,
    pub connections: Arc<dyn ConnectionManager>,
    pub jobs: Arc<dyn JobScheduler>,
    pub notifications: Arc<dyn NotificationManager>,
}

struct Inner {
    stores: AccountStores,
    collaborators: Collaborators,
    provisioner: KeyProvisioner,
    in_flight: AtomicBool,
}

/// Entry point for registration: registration IDs, profile key, prekey
/// generation, and finalization.
///
/// Cheap to clone; clones share the single-flight guard.
#[derive(Clone)]
pub struct RegistrationRepository {
    inner: Arc<Inner>,
}

impl RegistrationRepository {
    pub fn new(stores: AccountStores, collaborators: Collaborators, provisioner: KeyProvisioner) -> Self {
        Self {
            inner: Arc::new(Inner {
                stores,
                collaborators,
                provisioner,
                in_flight: AtomicBool::new(false),
            }),
        }
    }

    /// Open the configured database and build the SQLite-backed repository.
    pub fn open(config: &EnrollConfig, collaborators: Collaborators) -> Result<Self, RegistrationError> {
        let path = config
            .database_path
            .to_str()
            .ok_or_else(|| RegistrationError::Config("database path is not valid UTF-8".into()))?;
        let provisioner =
            KeyProvisioner::new(config.provisioning).map_err(|e| RegistrationError::Config(e.to_string()))?;
        let db = open_database(path)?;
        tracing::info!(path, "opened account database");
        Ok(Self::new(AccountStores::sqlite(db), collaborators, provisioner))
    }

    pub fn stores(&self) -> &AccountStores {
        &self.inner.stores
    }

    pub fn registration_id(&self) -> Result<u32, RegistrationError> {
        self.inner.stores.account.registration_id(ServiceIdRole::Primary)
    }

    pub fn pni_registration_id(&self) -> Result<u32, RegistrationError> {
        self.inner.stores.account.registration_id(ServiceIdRole::Secondary)
    }

    /// The profile key already known for `e164`, or a new one.
    pub fn profile_key(&self, e164: &str) -> Result<ProfileKey, RegistrationError> {
        if let Some(existing) = self.inner.stores.recipients.profile_key_for_e164(e164)? {
            return Ok(existing);
        }
        tracing::info!("no profile key found, created a new one");
        Ok(ProfileKey::generate())
    }

    /// Generate both roles' prekey bundles, reserving IDs from the account's
    /// metadata stores. Nothing is persisted besides the counters.
    pub fn generate_pre_keys(&self) -> Result<PreKeyCollections, RegistrationError> {
        let stores = &self.inner.stores;
        let collections = self
            .inner
            .provisioner
            .generate_collections(&*stores.primary.metadata, &*stores.secondary.metadata)
            .inspect_err(|e| tracing::error!(error = %e, "failed to generate prekeys"))?;
        Ok(collections)
    }

    /// Commit a server-confirmed registration.
    ///
    /// The work runs on Tokio's blocking pool, so this must be called from
    /// within a runtime. The returned handle resolves exactly once. While an
    /// attempt is running, further calls resolve to
    /// [`RegistrationError::InProgress`] without touching any state.
    pub fn register_account(
        &self,
        data: RegistrationData,
        response: VerifyResponse,
        enable_lock: bool,
    ) -> RegistrationHandle {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::warn!("registration already in progress");
            return RegistrationHandle::ready(Err(RegistrationError::InProgress));
        }

        let guard = InFlight(Arc::clone(&self.inner));
        let task = tokio::task::spawn_blocking(move || {
            let result = guard.0.register(data, response, enable_lock);
            drop(guard);
            result
        });
        RegistrationHandle::running(task)
    }
}

/// Clears the single-flight flag when the attempt ends, including by panic.
struct InFlight(Arc<Inner>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

impl Inner {
    fn register(
        &self,
        data: RegistrationData,
        response: VerifyResponse,
        enable_lock: bool,
    ) -> Result<VerifyResponse, RegistrationError> {
        self.register_internal(&data, &response, enable_lock)
            .inspect_err(|e| tracing::error!(error = %e, retryable = e.is_retryable(), "registration failed"))?;

        if let Some(pin) = response.pin.as_deref().filter(|p| !p.is_empty()) {
            if let Err(e) = self.collaborators.pin_state.on_pin_changed_or_created(pin) {
                tracing::warn!(error = %e, "pin update after registration failed");
            }
        }

        let jobs = &self.collaborators.jobs;
        jobs.enqueue(MaintenanceJob::DirectoryRefresh);
        jobs.enqueue(MaintenanceJob::RotateCertificate);
        jobs.schedule(PeriodicSchedule::DirectoryRefresh);
        jobs.schedule(PeriodicSchedule::RotateSignedPreKey);

        Ok(response)
    }

    fn register_internal(
        &self,
        data: &RegistrationData,
        response: &VerifyResponse,
        enable_lock: bool,
    ) -> Result<(), RegistrationError> {
        let confirmation = &response.confirmation;
        let aci = ServiceId::parse(ServiceIdRole::Primary, &confirmation.uuid)?;
        let pni = ServiceId::parse(ServiceIdRole::Secondary, &confirmation.pni)?;
        let storage_capable = confirmation.storage_capable;

        tracing::info!(aci = %aci, pni = %pni, "finalizing registration");

        let stores = &self.stores;
        let account = &stores.account;

        account.set_service_id(&aci)?;
        account.set_service_id(&pni)?;

        for role in ServiceIdRole::ALL {
            stores.role(role).protocol.archive_all_sessions()?;
        }
        stores.sender_keys.clear_all()?;
        tracing::debug!("archived sessions and cleared sender keys");

        for role in ServiceIdRole::ALL {
            store_pre_keys(stores.role(role), data.pre_key_collections.for_role(role))?;
        }

        let recipients = &stores.recipients;
        let self_id = recipients.get_or_insert_trusted_push(&aci, &pni, &data.e164)?;
        recipients.set_profile_sharing(self_id, true)?;
        recipients.mark_registered_or_throw(self_id, &aci)?;
        recipients.link_ids_for_self(&aci, &pni, &data.e164)?;
        recipients.set_profile_key(self_id, &data.profile_key)?;

        stores.recipient_cache.clear_self();

        account.set_e164(&data.e164)?;
        account.set_fcm_token(data.fcm_token.as_deref())?;
        account.set_fcm_enabled(data.is_fcm())?;
        account.set_service_password(&data.password)?;

        let now = timestamp_now();
        for role in ServiceIdRole::ALL {
            save_own_identity_key(self_id, &*stores.role(role).protocol, now)?;
        }

        account.commit_registered()?;
        self.collaborators.notifications.cancel_unregistered_notification();
        tracing::info!(recipient = %self_id, "account registered");

        if let Err(e) = self.collaborators.pin_state.on_registration(
            response.recovery_credential.as_ref(),
            response.pin.as_deref(),
            storage_capable,
            enable_lock,
        ) {
            tracing::warn!(error = %e, "registration lock setup failed");
        }

        let connections = &self.collaborators.connections;
        connections.close_connections();
        connections.start_incoming_observer();

        Ok(())
    }
}

/// Persist one role's bundle and point the metadata store at it.
fn store_pre_keys(stores: &RoleStores, collection: &PreKeyCollection) -> Result<(), RegistrationError> {
    let protocol = &stores.protocol;
    let metadata = &stores.metadata;

    protocol.set_identity_key_pair(&collection.identity_key_pair)?;

    protocol.store_signed_prekey(&collection.signed_prekey)?;
    metadata.set_active_signed_prekey_id(collection.next_signed_prekey_id)?;

    for prekey in &collection.one_time_ec_prekeys {
        protocol.store_prekey(prekey)?;
    }

    protocol.store_kyber_prekey(&collection.last_resort_kyber_prekey, true)?;
    metadata.set_last_resort_kyber_prekey_id(collection.last_resort_kyber_prekey_id)?;

    for prekey in &collection.one_time_kyber_prekeys {
        protocol.store_kyber_prekey(prekey, false)?;
    }

    metadata.set_signed_prekey_registered(true)?;

    tracing::info!(
        role = %collection.role,
        signed_prekey_id = collection.next_signed_prekey_id,
        one_time = collection.one_time_ec_prekeys.len(),
        kyber = collection.one_time_kyber_prekeys.len(),
        "stored prekeys"
    );
    Ok(())
}

fn save_own_identity_key(
    self_id: RecipientId,
    protocol: &dyn ProtocolStore,
    now: i64,
) -> Result<(), RegistrationError> {
    let key_pair = protocol.get_identity_key_pair()?;
    protocol.save_identity(
        &self_id.to_string(),
        &IdentityRecord {
            identity_key: key_pair.public_key_bytes().to_vec(),
            verified: VerifiedStatus::Verified,
            first_use: true,
            timestamp: now,
            nonblocking_approval: true,
        },
    )?;
    Ok(())
}

/// Resolves once to the outcome of [`RegistrationRepository::register_account`].
pub struct RegistrationHandle {
    state: HandleState,
}

enum HandleState {
    Ready(Option<Result<VerifyResponse, RegistrationError>>),
    Running(JoinHandle<Result<VerifyResponse, RegistrationError>>),
}

impl RegistrationHandle {
    fn ready(result: Result<VerifyResponse, RegistrationError>) -> Self {
        Self {
            state: HandleState::Ready(Some(result)),
        }
    }

    fn running(task: JoinHandle<Result<VerifyResponse, RegistrationError>>) -> Self {
        Self {
            state: HandleState::Running(task),
        }
    }
}

impl Future for RegistrationHandle {
    type Output = Result<VerifyResponse, RegistrationError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Ready(result) => Poll::Ready(
                result
                    .take()
                    .unwrap_or_else(|| Err(RegistrationError::Unknown("handle polled after completion".into()))),
            ),
            HandleState::Running(task) => Pin::new(task).poll(cx).map(|joined| {
                joined.unwrap_or_else(|e| Err(RegistrationError::Unknown(format!("registration worker failed: {e}"))))
            }),
        }
    }
}
