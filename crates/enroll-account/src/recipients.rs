//! Recipient directory: one row per known person, including ourselves.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension as _, Row};

use crate::db::DbPool;
use crate::error::RegistrationError;
use crate::profile_key::ProfileKey;
use crate::service_id::ServiceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecipientId(pub i64);

impl std::fmt::Display for RecipientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: RecipientId,
    pub aci: Option<ServiceId>,
    pub pni: Option<ServiceId>,
    pub e164: Option<String>,
    pub registered: bool,
    pub profile_sharing: bool,
    pub profile_key: Option<ProfileKey>,
}

const RECIPIENT_COLUMNS: &str = "id, aci, pni, e164, registered, profile_sharing, profile_key";

fn recipient_from_row(row: &Row<'_>) -> Result<Recipient, rusqlite::Error> {
    let aci: Option<String> = row.get("aci")?;
    let pni: Option<String> = row.get("pni")?;
    let profile_key: Option<String> = row.get("profile_key")?;
    Ok(Recipient {
        id: RecipientId(row.get("id")?),
        aci: aci.and_then(|raw| ServiceId::from_storage_string(&raw).ok()),
        pni: pni.and_then(|raw| ServiceId::from_storage_string(&raw).ok()),
        e164: row.get("e164")?,
        registered: row.get::<_, i64>("registered")? != 0,
        profile_sharing: row.get::<_, i64>("profile_sharing")? != 0,
        profile_key: profile_key.as_deref().and_then(ProfileKey::from_hex),
    })
}

pub struct RecipientTable {
    db: DbPool,
}

impl RecipientTable {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn get_by_e164(&self, e164: &str) -> Result<Option<RecipientId>, RegistrationError> {
        Ok(find_id(&self.db.lock(), "e164", e164)?)
    }

    pub fn get_by_service_id(&self, id: &ServiceId) -> Result<Option<RecipientId>, RegistrationError> {
        let column = column_for(id);
        Ok(find_id(&self.db.lock(), column, &id.to_storage_string())?)
    }

    pub fn get_record(&self, id: RecipientId) -> Result<Option<Recipient>, RegistrationError> {
        let conn = self.db.lock();
        let record = conn
            .query_row(
                &format!("SELECT {RECIPIENT_COLUMNS} FROM recipients WHERE id = ?"),
                params![id.0],
                recipient_from_row,
            )
            .optional()?;
        Ok(record)
    }

    /// Resolve the row for a server-verified identity, creating it if none
    /// of the three identifiers is known yet. Matching prefers the ACI,
    /// then the PNI, then the phone number.
    pub fn get_or_insert_trusted_push(
        &self,
        aci: &ServiceId,
        pni: &ServiceId,
        e164: &str,
    ) -> Result<RecipientId, RegistrationError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let aci_raw = aci.to_storage_string();
        let pni_raw = pni.to_storage_string();

        let existing = match find_id(&tx, "aci", &aci_raw)? {
            Some(id) => Some(id),
            None => match find_id(&tx, "pni", &pni_raw)? {
                Some(id) => Some(id),
                None => find_id(&tx, "e164", e164)?,
            },
        };

        let id = if let Some(id) = existing {
            id
        } else {
            tx.execute(
                "INSERT INTO recipients (aci, pni, e164) VALUES (?1, ?2, ?3)",
                params![aci_raw, pni_raw, e164],
            )?;
            let id = RecipientId(tx.last_insert_rowid());
            tracing::debug!(recipient = %id, "created recipient for trusted push identity");
            id
        };

        tx.commit()?;
        Ok(id)
    }

    pub fn set_profile_sharing(&self, id: RecipientId, enabled: bool) -> Result<(), RegistrationError> {
        self.db.lock().execute(
            "UPDATE recipients SET profile_sharing = ?1 WHERE id = ?2",
            params![i64::from(enabled), id.0],
        )?;
        Ok(())
    }

    /// Mark a recipient registered under `aci`. Errors if the row is gone.
    pub fn mark_registered_or_throw(&self, id: RecipientId, aci: &ServiceId) -> Result<(), RegistrationError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let aci_raw = aci.to_storage_string();
        tx.execute(
            "UPDATE recipients SET aci = NULL WHERE aci = ?1 AND id != ?2",
            params![aci_raw, id.0],
        )?;
        let updated = tx.execute(
            "UPDATE recipients SET registered = 1, aci = ?1 WHERE id = ?2",
            params![aci_raw, id.0],
        )?;
        if updated == 0 {
            return Err(RegistrationError::Storage(format!("recipient {id} not found")));
        }
        tx.commit()?;
        Ok(())
    }

    /// Make sure a single row, the one holding `aci`, carries all three of
    /// our identifiers. Any other row holding the PNI or phone number loses
    /// it.
    pub fn link_ids_for_self(&self, aci: &ServiceId, pni: &ServiceId, e164: &str) -> Result<RecipientId, RegistrationError> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;

        let aci_raw = aci.to_storage_string();
        let pni_raw = pni.to_storage_string();
        let self_id = find_id(&tx, "aci", &aci_raw)?
            .ok_or_else(|| RegistrationError::Storage("self recipient missing while linking ids".into()))?;

        tx.execute(
            "UPDATE recipients SET pni = NULL WHERE pni = ?1 AND id != ?2",
            params![pni_raw, self_id.0],
        )?;
        tx.execute(
            "UPDATE recipients SET e164 = NULL WHERE e164 = ?1 AND id != ?2",
            params![e164, self_id.0],
        )?;
        tx.execute(
            "UPDATE recipients SET pni = ?1, e164 = ?2 WHERE id = ?3",
            params![pni_raw, e164, self_id.0],
        )?;

        tx.commit()?;
        Ok(self_id)
    }

    pub fn set_profile_key(&self, id: RecipientId, key: &ProfileKey) -> Result<(), RegistrationError> {
        self.db.lock().execute(
            "UPDATE recipients SET profile_key = ?1 WHERE id = ?2",
            params![key.to_hex(), id.0],
        )?;
        Ok(())
    }

    /// The profile key stored for whoever owns `e164`, if any.
    pub fn profile_key_for_e164(&self, e164: &str) -> Result<Option<ProfileKey>, RegistrationError> {
        let Some(id) = self.get_by_e164(e164)? else {
            return Ok(None);
        };
        Ok(self.get_record(id)?.and_then(|r| r.profile_key))
    }

    pub fn count(&self) -> Result<usize, RegistrationError> {
        let count: i64 = self
            .db
            .lock()
            .query_row("SELECT COUNT(*) FROM recipients", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

fn column_for(id: &ServiceId) -> &'static str {
    match id.role {
        enroll_crypto::ServiceIdRole::Primary => "aci",
        enroll_crypto::ServiceIdRole::Secondary => "pni",
    }
}

fn find_id(conn: &Connection, column: &str, value: &str) -> Result<Option<RecipientId>, rusqlite::Error> {
    conn.query_row(
        &format!("SELECT id FROM recipients WHERE {column} = ?"),
        params![value],
        |row| row.get(0).map(RecipientId),
    )
    .optional()
}

/// Cache of the self recipient for readers elsewhere in the process.
///
/// Anything that changes the self row must call [`RecipientCache::clear_self`]
/// so the next read goes back to the table.
#[derive(Default)]
pub struct RecipientCache {
    self_recipient: Mutex<Option<Recipient>>,
}

impl RecipientCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The self recipient, loading it from `table` via `aci` when not cached.
    pub fn get_self(&self, table: &RecipientTable, aci: &ServiceId) -> Result<Option<Recipient>, RegistrationError> {
        if let Some(cached) = self.self_recipient.lock().clone() {
            return Ok(Some(cached));
        }
        let Some(id) = table.get_by_service_id(aci)? else {
            return Ok(None);
        };
        let record = table.get_record(id)?;
        self.self_recipient.lock().clone_from(&record);
        Ok(record)
    }

    pub fn clear_self(&self) {
        *self.self_recipient.lock() = None;
    }
}
