//! Typed access to the `key_values` table.
//!
//! Account-wide scalars live here as text. Absent keys read as `None`;
//! writing `None` deletes the key.

use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension as _};

use crate::db::DbPool;

#[derive(Clone)]
pub struct KeyValueStore {
    db: DbPool,
}

impl KeyValueStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn get_string(&self, key: &str) -> Result<Option<String>, rusqlite::Error> {
        read(&self.db.lock(), key)
    }

    pub fn put_string(&self, key: &str, value: Option<&str>) -> Result<(), rusqlite::Error> {
        write(&self.db.lock(), key, value)
    }

    pub fn get_bool(&self, key: &str) -> Result<bool, rusqlite::Error> {
        Ok(self.get_string(key)?.is_some_and(|v| v == "1"))
    }

    pub fn put_bool(&self, key: &str, value: bool) -> Result<(), rusqlite::Error> {
        self.put_string(key, Some(if value { "1" } else { "0" }))
    }

    /// Absent keys read as `None`; a present value that is not a `u32` is
    /// an error.
    pub fn get_u32(&self, key: &str) -> Result<Option<u32>, rusqlite::Error> {
        read_u32(&self.db.lock(), key)
    }

    pub fn put_u32(&self, key: &str, value: u32) -> Result<(), rusqlite::Error> {
        self.put_string(key, Some(&value.to_string()))
    }

    /// Run `f` inside one transaction while holding the connection lock.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, rusqlite::Error> {
        let mut conn = self.db.lock();
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Read a key on an already-locked connection.
pub fn read(conn: &Connection, key: &str) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT value FROM key_values WHERE key = ?",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

/// Read a numeric key on an already-locked connection.
pub fn read_u32(conn: &Connection, key: &str) -> Result<Option<u32>, rusqlite::Error> {
    read(conn, key)?
        .map(|raw| {
            raw.parse::<u32>().map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(0, Type::Text, format!("{key} = {raw:?}: {e}").into())
            })
        })
        .transpose()
}

/// Write or delete a key on an already-locked connection.
pub fn write(conn: &Connection, key: &str, value: Option<&str>) -> Result<(), rusqlite::Error> {
    match value {
        Some(value) => conn.execute(
            "INSERT INTO key_values (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?,
        None => conn.execute("DELETE FROM key_values WHERE key = ?", params![key])?,
    };
    Ok(())
}
