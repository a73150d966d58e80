//! Integration tests for registration finalization.
//!
//! Real `SQLite` stores and real key generation; only the outbound
//! collaborators are recorded, and failures are injected by wrapping a
//! protocol store.

use std::sync::mpsc;
use std::sync::Arc;

use enroll_account::collaborators::{
    ConnectionManager, JobScheduler, MaintenanceJob, NotificationManager, PeriodicSchedule,
    PinStateHandler,
};
use enroll_account::db::{self, DbPool};
use enroll_account::protocol_store::SqliteProtocolStore;
use enroll_account::registration::{RecoveryCredential, ServerConfirmation};
use enroll_account::{
    AccountStores, Collaborators, EnrollConfig, RegistrationData, RegistrationError, RegistrationRepository,
    VerifyResponse,
};
use enroll_crypto::signal::{
    IdentityKeyStore, IdentityRecord, KyberPreKeyRecord, KyberPreKeyStore, PreKeyRecord, PreKeyStore,
    ProvisioningConfig, SessionStore, SignedPreKeyRecord, VerifiedStatus,
};
use enroll_crypto::{CryptoError, IdentityKeyPair, KeyProvisioner, ServiceIdRole};
use parking_lot::Mutex;

const E164: &str = "+15551230001";
const ACI: &str = "11111111-1111-4111-8111-111111111111";
const PNI: &str = "22222222-2222-4222-8222-222222222222";

// ── Test doubles ─────────────────────────────────────────────────────

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    fail_pin: bool,
    panic_on_close: bool,
    gate: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Recorder {
    fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

impl PinStateHandler for Recorder {
    fn on_registration(
        &self,
        recovery: Option<&RecoveryCredential>,
        pin: Option<&str>,
        storage_capable: bool,
        enable_lock: bool,
    ) -> anyhow::Result<()> {
        let gate = self.gate.lock().take();
        if let Some(rx) = gate {
            let _ = rx.recv();
        }
        self.record(format!(
            "pin:registration recovery={} pin={} storage_capable={storage_capable} lock={enable_lock}",
            recovery.is_some(),
            pin.unwrap_or("-"),
        ));
        if self.fail_pin {
            anyhow::bail!("pin service unavailable");
        }
        Ok(())
    }

    fn on_pin_changed_or_created(&self, pin: &str) -> anyhow::Result<()> {
        self.record(format!("pin:changed {pin}"));
        Ok(())
    }
}

impl ConnectionManager for Recorder {
    fn close_connections(&self) {
        assert!(!self.panic_on_close, "transport exploded");
        self.record("connections:close");
    }

    fn start_incoming_observer(&self) {
        self.record("connections:observe");
    }
}

impl JobScheduler for Recorder {
    fn enqueue(&self, job: MaintenanceJob) {
        self.record(format!("enqueue:{job:?}"));
    }

    fn schedule(&self, schedule: PeriodicSchedule) {
        self.record(format!("schedule:{schedule:?}"));
    }
}

impl NotificationManager for Recorder {
    fn cancel_unregistered_notification(&self) {
        self.record("notification:cancel");
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FailPoint {
    ArchiveSessions,
    StorePreKey,
    SaveIdentity,
}

/// Delegates to a real store, failing one operation.
struct FailingStore {
    inner: SqliteProtocolStore,
    fail: FailPoint,
}

impl FailingStore {
    fn check(&self, point: FailPoint) -> Result<(), CryptoError> {
        if self.fail == point {
            return Err(CryptoError::StorageError("disk full".into()));
        }
        Ok(())
    }
}

impl IdentityKeyStore for FailingStore {
    fn get_identity_key_pair(&self) -> Result<IdentityKeyPair, CryptoError> {
        self.inner.get_identity_key_pair()
    }

    fn set_identity_key_pair(&self, key_pair: &IdentityKeyPair) -> Result<(), CryptoError> {
        self.inner.set_identity_key_pair(key_pair)
    }

    fn save_identity(&self, address: &str, record: &IdentityRecord) -> Result<(), CryptoError> {
        self.check(FailPoint::SaveIdentity)?;
        self.inner.save_identity(address, record)
    }

    fn get_identity(&self, address: &str) -> Result<Option<IdentityRecord>, CryptoError> {
        self.inner.get_identity(address)
    }

    fn identity_count(&self) -> Result<usize, CryptoError> {
        self.inner.identity_count()
    }
}

impl PreKeyStore for FailingStore {
    fn load_prekey(&self, prekey_id: u32) -> Result<Option<PreKeyRecord>, CryptoError> {
        self.inner.load_prekey(prekey_id)
    }

    fn store_prekey(&self, record: &PreKeyRecord) -> Result<(), CryptoError> {
        self.check(FailPoint::StorePreKey)?;
        self.inner.store_prekey(record)
    }

    fn prekey_count(&self) -> Result<usize, CryptoError> {
        self.inner.prekey_count()
    }

    fn load_signed_prekey(&self, signed_prekey_id: u32) -> Result<Option<SignedPreKeyRecord>, CryptoError> {
        self.inner.load_signed_prekey(signed_prekey_id)
    }

    fn store_signed_prekey(&self, record: &SignedPreKeyRecord) -> Result<(), CryptoError> {
        self.inner.store_signed_prekey(record)
    }
}

impl KyberPreKeyStore for FailingStore {
    fn load_kyber_prekey(&self, prekey_id: u32) -> Result<Option<KyberPreKeyRecord>, CryptoError> {
        self.inner.load_kyber_prekey(prekey_id)
    }

    fn store_kyber_prekey(&self, record: &KyberPreKeyRecord, last_resort: bool) -> Result<(), CryptoError> {
        self.inner.store_kyber_prekey(record, last_resort)
    }

    fn is_last_resort_kyber_prekey(&self, prekey_id: u32) -> Result<bool, CryptoError> {
        self.inner.is_last_resort_kyber_prekey(prekey_id)
    }

    fn kyber_prekey_count(&self) -> Result<usize, CryptoError> {
        self.inner.kyber_prekey_count()
    }
}

impl SessionStore for FailingStore {
    fn load_session(&self, address: &str) -> Result<Option<Vec<u8>>, CryptoError> {
        self.inner.load_session(address)
    }

    fn store_session(&self, address: &str, session_data: &[u8]) -> Result<(), CryptoError> {
        self.inner.store_session(address, session_data)
    }

    fn archive_all_sessions(&self) -> Result<(), CryptoError> {
        self.check(FailPoint::ArchiveSessions)?;
        self.inner.archive_all_sessions()
    }

    fn active_session_count(&self) -> Result<usize, CryptoError> {
        self.inner.active_session_count()
    }
}

// ── Helpers ──────────────────────────────────────────────────────────

struct Harness {
    db: DbPool,
    repo: RegistrationRepository,
    recorder: Arc<Recorder>,
}

fn small_batches() -> KeyProvisioner {
    KeyProvisioner::new(ProvisioningConfig {
        one_time_prekey_batch: 5,
        kyber_prekey_batch: 3,
    })
    .unwrap()
}

fn harness_with(recorder: Recorder, provisioner: KeyProvisioner, fail: Option<FailPoint>) -> Harness {
    let db = db::open_database(":memory:").expect("in-memory SQLite");
    let mut stores = AccountStores::sqlite(db.clone());
    if let Some(fail) = fail {
        // Only the secondary role fails, so the primary's writes land first.
        stores.secondary.protocol = Arc::new(FailingStore {
            inner: SqliteProtocolStore::new(db.clone(), ServiceIdRole::Secondary),
            fail,
        });
    }
    let recorder = Arc::new(recorder);
    let collaborators = Collaborators {
        pin_state: recorder.clone(),
        connections: recorder.clone(),
        jobs: recorder.clone(),
        notifications: recorder.clone(),
    };
    Harness {
        db,
        repo: RegistrationRepository::new(stores, collaborators, provisioner),
        recorder,
    }
}

fn harness() -> Harness {
    harness_with(Recorder::default(), small_batches(), None)
}

fn registration_data(repo: &RegistrationRepository, e164: &str) -> RegistrationData {
    RegistrationData {
        e164: e164.to_string(),
        password: "service-password".into(),
        registration_id: repo.registration_id().unwrap(),
        pni_registration_id: repo.pni_registration_id().unwrap(),
        profile_key: repo.profile_key(e164).unwrap(),
        pre_key_collections: repo.generate_pre_keys().unwrap(),
        fcm_token: Some("fcm-token".into()),
        recovery_password: None,
    }
}

fn response(pin: Option<&str>) -> VerifyResponse {
    VerifyResponse {
        confirmation: ServerConfirmation {
            uuid: ACI.into(),
            pni: PNI.into(),
            storage_capable: true,
        },
        pin: pin.map(str::to_string),
        recovery_credential: None,
    }
}

// ── Happy path ───────────────────────────────────────────────────────

#[tokio::test]
async fn fresh_number_registers_and_links_self() {
    let h = harness_with(Recorder::default(), KeyProvisioner::default(), None);
    let data = registration_data(&h.repo, E164);

    for role in ServiceIdRole::ALL {
        let collection = data.pre_key_collections.for_role(role);
        assert_eq!(collection.signed_prekey.id, 1);
        assert_eq!(collection.one_time_ec_prekeys.len(), 100);
        assert_eq!(collection.last_resort_kyber_prekey.id, 1);
        assert_eq!(collection.one_time_kyber_prekeys.len(), 100);
        collection.verify().unwrap();
    }

    let profile_key = data.profile_key.clone();
    let collections = data.pre_key_collections.clone();
    let echoed = h.repo.register_account(data, response(None), false).await.unwrap();
    assert_eq!(echoed.confirmation.uuid, ACI);

    let stores = h.repo.stores();
    let account = &stores.account;
    assert!(account.is_registered().unwrap());
    assert_eq!(account.aci().unwrap().unwrap().to_string(), ACI);
    assert_eq!(account.pni().unwrap().unwrap().uuid.to_string(), PNI);
    assert_eq!(account.e164().unwrap().as_deref(), Some(E164));
    assert_eq!(account.service_password().unwrap().as_deref(), Some("service-password"));
    assert_eq!(account.fcm_token().unwrap().as_deref(), Some("fcm-token"));
    assert!(account.is_fcm_enabled().unwrap());
    assert!(account.prompted_push_registration().unwrap());
    assert!(!account.is_unauthorized_received().unwrap());
    assert!(!account.needs_reregistration().unwrap());

    let self_id = stores.recipients.get_by_e164(E164).unwrap().expect("self recipient");
    let recipient = stores.recipients.get_record(self_id).unwrap().unwrap();
    assert_eq!(recipient.aci, account.aci().unwrap());
    assert_eq!(recipient.pni, account.pni().unwrap());
    assert!(recipient.registered);
    assert!(recipient.profile_sharing);
    assert_eq!(recipient.profile_key, Some(profile_key));

    for role in ServiceIdRole::ALL {
        let collection = collections.for_role(role);
        let role_stores = stores.role(role);
        let protocol = &role_stores.protocol;

        assert_eq!(protocol.prekey_count().unwrap(), 100);
        assert_eq!(protocol.kyber_prekey_count().unwrap(), 101);
        assert!(protocol.is_last_resort_kyber_prekey(1).unwrap());
        assert_eq!(role_stores.metadata.active_signed_prekey_id().unwrap(), Some(1));
        assert_eq!(role_stores.metadata.last_resort_kyber_prekey_id().unwrap(), Some(1));
        assert!(role_stores.metadata.is_signed_prekey_registered().unwrap());

        let own = protocol.get_identity_key_pair().unwrap();
        assert_eq!(own.public_key_bytes(), collection.identity_key_pair.public_key_bytes());

        let identity = protocol.get_identity(&self_id.to_string()).unwrap().unwrap();
        assert_eq!(identity.identity_key, own.public_key_bytes().to_vec());
        assert_eq!(identity.verified, VerifiedStatus::Verified);
        assert!(identity.first_use);
        assert!(identity.nonblocking_approval);
    }

    assert_eq!(
        h.recorder.events(),
        vec![
            "notification:cancel",
            "pin:registration recovery=false pin=- storage_capable=true lock=false",
            "connections:close",
            "connections:observe",
            "enqueue:DirectoryRefresh",
            "enqueue:RotateCertificate",
            "schedule:DirectoryRefresh",
            "schedule:RotateSignedPreKey",
        ]
    );
}

#[tokio::test]
async fn both_roles_share_one_commit_timestamp() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    h.repo.register_account(data, response(None), false).await.unwrap();

    let stores = h.repo.stores();
    let self_id = stores.recipients.get_by_e164(E164).unwrap().unwrap().to_string();
    let aci = stores.primary.protocol.get_identity(&self_id).unwrap().unwrap();
    let pni = stores.secondary.protocol.get_identity(&self_id).unwrap().unwrap();
    assert_eq!(aci.timestamp, pni.timestamp);
    assert_ne!(aci.identity_key, pni.identity_key);
}

#[tokio::test]
async fn prior_sessions_and_sender_keys_are_invalidated() {
    let h = harness();
    let stores = h.repo.stores().clone();
    stores.primary.protocol.store_session("alice", b"old-aci").unwrap();
    stores.primary.protocol.store_session("bob", b"old-aci").unwrap();
    stores.secondary.protocol.store_session("alice", b"old-pni").unwrap();
    stores.sender_keys.store_sender_key("alice", "group-1", b"k").unwrap();

    let data = registration_data(&h.repo, E164);
    h.repo.register_account(data, response(None), false).await.unwrap();

    for role in ServiceIdRole::ALL {
        let protocol = &stores.role(role).protocol;
        assert_eq!(protocol.active_session_count().unwrap(), 0);
        assert_eq!(protocol.load_session("alice").unwrap(), None);
    }
    assert_eq!(stores.sender_keys.sender_key_count().unwrap(), 0);
}

#[tokio::test]
async fn rerun_with_same_inputs_is_idempotent() {
    let h = harness();
    let data = registration_data(&h.repo, E164);

    h.repo.register_account(data.clone(), response(None), false).await.unwrap();
    h.repo.register_account(data, response(None), false).await.unwrap();

    let stores = h.repo.stores();
    assert!(stores.account.is_registered().unwrap());
    assert_eq!(stores.recipients.count().unwrap(), 1);
    for role in ServiceIdRole::ALL {
        let protocol = &stores.role(role).protocol;
        assert_eq!(protocol.identity_count().unwrap(), 1);
        assert_eq!(protocol.prekey_count().unwrap(), 5);
        assert_eq!(protocol.kyber_prekey_count().unwrap(), 4);
    }

    let sessions: i64 = h
        .db
        .lock()
        .query_row("SELECT COUNT(*) FROM sessions", [], |row| row.get(0))
        .unwrap();
    assert_eq!(sessions, 0);
}

#[tokio::test]
async fn reregistration_reuses_known_profile_key() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    let first_key = data.profile_key.clone();
    h.repo.register_account(data, response(None), false).await.unwrap();

    assert_eq!(h.repo.profile_key(E164).unwrap(), first_key);

    let other = h.repo.profile_key("+15559990000").unwrap();
    assert_ne!(other, first_key);
    assert_ne!(h.repo.profile_key("+15559990000").unwrap(), other);
}

#[tokio::test]
async fn second_generation_continues_id_ranges() {
    let h = harness();
    let first = h.repo.generate_pre_keys().unwrap();
    let second = h.repo.generate_pre_keys().unwrap();

    for role in ServiceIdRole::ALL {
        let a = first.for_role(role);
        let b = second.for_role(role);
        assert!(b.next_signed_prekey_id > a.next_signed_prekey_id);
        assert_eq!(b.ec_one_time_prekey_id_offset, a.ec_one_time_prekey_id_offset + 5);
        assert!(b.last_resort_kyber_prekey_id > a.one_time_kyber_prekey_id_offset + 2);
    }
}

// ── Collaborators ────────────────────────────────────────────────────

#[tokio::test]
async fn pin_is_forwarded_and_failure_is_not_fatal() {
    let recorder = Recorder {
        fail_pin: true,
        ..Recorder::default()
    };
    let h = harness_with(recorder, small_batches(), None);
    let data = registration_data(&h.repo, E164);

    let mut response = response(Some("1234"));
    response.recovery_credential = Some(RecoveryCredential {
        master_key: vec![9; 32],
        tries_remaining: 10,
    });
    h.repo.register_account(data, response, true).await.unwrap();

    assert!(h.repo.stores().account.is_registered().unwrap());
    let events = h.recorder.events();
    assert!(events.contains(&"pin:registration recovery=true pin=1234 storage_capable=true lock=true".to_string()));
    assert!(events.contains(&"pin:changed 1234".to_string()));
    assert!(events.contains(&"enqueue:DirectoryRefresh".to_string()));
}

#[tokio::test]
async fn empty_pin_is_not_reported_as_changed() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    h.repo.register_account(data, response(Some("")), false).await.unwrap();

    assert!(!h.recorder.events().iter().any(|e| e.starts_with("pin:changed")));
}

// ── Failures ─────────────────────────────────────────────────────────

#[tokio::test]
async fn malformed_identifier_mutates_nothing() {
    let h = harness();
    h.repo.stores().account.set_registered(true).unwrap();
    let data = registration_data(&h.repo, E164);

    let mut bad = response(None);
    bad.confirmation.pni = "not-a-uuid".into();
    let err = h.repo.register_account(data, bad, false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::MalformedResponse(_)));
    assert!(!err.is_retryable());
    let account = &h.repo.stores().account;
    assert!(account.is_registered().unwrap());
    assert_eq!(account.aci().unwrap(), None);
    assert!(h.recorder.events().is_empty());
}

async fn assert_fails_unregistered(fail: FailPoint) -> Harness {
    let h = harness_with(Recorder::default(), small_batches(), Some(fail));
    let data = registration_data(&h.repo, E164);

    let err = h.repo.register_account(data, response(None), false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Storage(_)), "{err}");
    assert!(err.is_retryable());
    assert!(!h.repo.stores().account.is_registered().unwrap());
    assert!(h.recorder.events().is_empty());
    h
}

#[tokio::test]
async fn session_archive_failure_stops_before_prekeys() {
    let h = assert_fails_unregistered(FailPoint::ArchiveSessions).await;
    let stores = h.repo.stores();
    assert!(stores.account.aci().unwrap().is_some());
    assert_eq!(stores.primary.protocol.prekey_count().unwrap(), 0);
}

#[tokio::test]
async fn prekey_store_failure_leaves_account_unregistered() {
    let h = assert_fails_unregistered(FailPoint::StorePreKey).await;
    let stores = h.repo.stores();
    assert!(!stores.secondary.metadata.is_signed_prekey_registered().unwrap());
    assert_eq!(stores.recipients.count().unwrap(), 0);
}

#[tokio::test]
async fn identity_save_failure_leaves_account_unregistered() {
    let h = assert_fails_unregistered(FailPoint::SaveIdentity).await;
    assert_eq!(h.repo.stores().account.e164().unwrap().as_deref(), Some(E164));
}

#[tokio::test]
async fn recipient_failure_leaves_account_unregistered() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    h.db.lock().execute_batch("DROP TABLE recipients;").unwrap();

    let err = h.repo.register_account(data, response(None), false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Storage(_)));
    assert!(!h.repo.stores().account.is_registered().unwrap());
    assert!(h.repo.stores().primary.metadata.is_signed_prekey_registered().unwrap());
}

/// Abort any insert of `key` into the account's key-value table.
fn fail_writes_to(db: &DbPool, key: &str) {
    db.lock()
        .execute_batch(&format!(
            "CREATE TRIGGER fail_{name} BEFORE INSERT ON key_values WHEN NEW.key = '{key}'
             BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            name = key.replace('.', "_"),
        ))
        .unwrap();
}

#[tokio::test]
async fn service_id_failure_stops_before_sessions() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    fail_writes_to(&h.db, "account.pni");

    let err = h.repo.register_account(data, response(None), false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Storage(_)), "{err}");
    assert!(err.is_retryable());
    let stores = h.repo.stores();
    assert!(!stores.account.is_registered().unwrap());
    assert_eq!(stores.account.pni().unwrap(), None);
    assert_eq!(stores.primary.protocol.prekey_count().unwrap(), 0);
    assert!(!stores.primary.metadata.is_signed_prekey_registered().unwrap());
    assert!(h.recorder.events().is_empty());
}

#[tokio::test]
async fn account_field_failure_leaves_account_unregistered() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    fail_writes_to(&h.db, "account.service_password");

    let err = h.repo.register_account(data, response(None), false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Storage(_)), "{err}");
    let stores = h.repo.stores();
    assert!(!stores.account.is_registered().unwrap());
    assert_eq!(stores.account.e164().unwrap().as_deref(), Some(E164));
    assert_eq!(stores.account.service_password().unwrap(), None);
    assert_eq!(stores.recipients.count().unwrap(), 1);
    assert!(stores.primary.metadata.is_signed_prekey_registered().unwrap());
    assert!(h.recorder.events().is_empty());
}

#[tokio::test]
async fn final_flag_failure_rolls_back_every_flag() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    h.repo.stores().account.set_needs_reregistration(true).unwrap();
    fail_writes_to(&h.db, "account.needs_reregistration");

    let err = h.repo.register_account(data, response(None), false).await.unwrap_err();

    assert!(matches!(err, RegistrationError::Storage(_)), "{err}");
    assert!(err.is_retryable());
    let account = &h.repo.stores().account;
    assert!(!account.is_registered().unwrap());
    assert!(!account.prompted_push_registration().unwrap());
    assert!(account.needs_reregistration().unwrap());
    assert!(h.recorder.events().is_empty());
}

#[tokio::test]
async fn retry_after_failure_succeeds() {
    let h = harness();
    let data = registration_data(&h.repo, E164);
    h.db.lock().execute_batch("DROP TABLE sender_keys;").unwrap();

    let err = h.repo.register_account(data.clone(), response(None), false).await.unwrap_err();
    assert!(err.is_retryable());

    h.db
        .lock()
        .execute_batch(
            "CREATE TABLE sender_keys (
                address TEXT NOT NULL,
                distribution_id TEXT NOT NULL,
                data BLOB NOT NULL,
                PRIMARY KEY (address, distribution_id)
            );",
        )
        .unwrap();
    h.repo.register_account(data, response(None), false).await.unwrap();
    assert!(h.repo.stores().account.is_registered().unwrap());
}

#[tokio::test]
async fn opens_from_config_and_persists_across_restart() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = EnrollConfig {
        database_path: dir.path().join("account.db"),
        provisioning: ProvisioningConfig {
            one_time_prekey_batch: 2,
            kyber_prekey_batch: 2,
        },
    };
    let collaborators = |recorder: &Arc<Recorder>| Collaborators {
        pin_state: recorder.clone(),
        connections: recorder.clone(),
        jobs: recorder.clone(),
        notifications: recorder.clone(),
    };
    let recorder = Arc::new(Recorder::default());

    let repo = RegistrationRepository::open(&config, collaborators(&recorder)).unwrap();
    let data = registration_data(&repo, E164);
    assert_eq!(data.pre_key_collections.primary.one_time_ec_prekeys.len(), 2);
    repo.register_account(data, response(None), false).await.unwrap();
    drop(repo);

    let reopened = RegistrationRepository::open(&config, collaborators(&recorder)).unwrap();
    assert!(reopened.stores().account.is_registered().unwrap());
    assert_eq!(reopened.generate_pre_keys().unwrap().primary.next_signed_prekey_id, 2);
}

#[test]
fn zero_batch_config_is_rejected() {
    let config = EnrollConfig {
        database_path: ":memory:".into(),
        provisioning: ProvisioningConfig {
            one_time_prekey_batch: 0,
            kyber_prekey_batch: 100,
        },
    };
    let recorder = Arc::new(Recorder::default());
    let collaborators = Collaborators {
        pin_state: recorder.clone(),
        connections: recorder.clone(),
        jobs: recorder.clone(),
        notifications: recorder,
    };
    let err = RegistrationRepository::open(&config, collaborators).err().unwrap();
    assert!(matches!(err, RegistrationError::Config(_)));
}

// ── Single flight ────────────────────────────────────────────────────

#[tokio::test]
async fn concurrent_attempt_is_rejected() {
    let (release, gate) = mpsc::channel();
    let recorder = Recorder {
        gate: Mutex::new(Some(gate)),
        ..Recorder::default()
    };
    let h = harness_with(recorder, small_batches(), None);
    let data = registration_data(&h.repo, E164);

    let first = h.repo.register_account(data.clone(), response(None), false);
    let second = h.repo.register_account(data.clone(), response(None), false).await;
    assert!(matches!(second, Err(RegistrationError::InProgress)));

    release.send(()).unwrap();
    first.await.unwrap();

    h.repo.register_account(data, response(None), false).await.unwrap();
}

#[tokio::test]
async fn worker_panic_is_reported_and_releases_guard() {
    let recorder = Recorder {
        panic_on_close: true,
        ..Recorder::default()
    };
    let h = harness_with(recorder, small_batches(), None);
    let data = registration_data(&h.repo, E164);

    let err = h.repo.register_account(data.clone(), response(None), false).await.unwrap_err();
    assert!(matches!(err, RegistrationError::Unknown(_)));

    let again = h.repo.register_account(data, response(None), false).await.unwrap_err();
    assert!(matches!(again, RegistrationError::Unknown(_)));
}
