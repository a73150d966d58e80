use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

/// Shared handle to the account database. One connection, serialized by
/// the mutex; every store in this crate borrows it per call.
pub type DbPool = Arc<Mutex<Connection>>;

/// Bump when `SCHEMA` changes. On mismatch every table is dropped and the
/// schema re-applied.
const SCHEMA_VERSION: i64 = 3;

/// Open (or create) the account database at `path` and run migrations.
///
/// `":memory:"` opens a private in-memory database.
pub fn open_database(path: &str) -> Result<DbPool, rusqlite::Error> {
    let conn = Connection::open(path)?;

    // WAL is not available for in-memory databases; SQLite silently keeps
    // the "memory" journal there.
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    let current: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .unwrap_or(0);

    if current != SCHEMA_VERSION {
        if current != 0 {
            tracing::info!(
                old = current,
                new = SCHEMA_VERSION,
                "account schema version mismatch, recreating"
            );
            drop_all_tables(&conn)?;
        }
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    }

    Ok(Arc::new(Mutex::new(conn)))
}

/// Drop every user table so the schema can be cleanly re-applied.
fn drop_all_tables(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch("PRAGMA foreign_keys=OFF;")?;

    let mut stmt =
        conn.prepare("SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%'")?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get(0))?
        .filter_map(Result::ok)
        .collect();
    drop(stmt);

    for table in &tables {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS \"{table}\";"))?;
    }

    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    Ok(())
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS key_values (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS recipients (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    aci TEXT UNIQUE,
    pni TEXT UNIQUE,
    e164 TEXT UNIQUE,
    registered INTEGER NOT NULL DEFAULT 0,
    profile_sharing INTEGER NOT NULL DEFAULT 0,
    profile_key TEXT
);

CREATE TABLE IF NOT EXISTS identities (
    role TEXT NOT NULL,
    address TEXT NOT NULL,
    identity_key BLOB NOT NULL,
    verified INTEGER NOT NULL DEFAULT 0,
    first_use INTEGER NOT NULL DEFAULT 0,
    timestamp INTEGER NOT NULL,
    nonblocking_approval INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (role, address)
);

CREATE TABLE IF NOT EXISTS own_identity_keys (
    role TEXT PRIMARY KEY,
    secret_key BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS signed_prekeys (
    role TEXT NOT NULL,
    key_id INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (role, key_id)
);

CREATE TABLE IF NOT EXISTS one_time_prekeys (
    role TEXT NOT NULL,
    key_id INTEGER NOT NULL,
    record TEXT NOT NULL,
    PRIMARY KEY (role, key_id)
);

CREATE TABLE IF NOT EXISTS kyber_prekeys (
    role TEXT NOT NULL,
    key_id INTEGER NOT NULL,
    record TEXT NOT NULL,
    last_resort INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (role, key_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    role TEXT NOT NULL,
    address TEXT NOT NULL,
    data BLOB NOT NULL,
    archived INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (role, address)
);

CREATE TABLE IF NOT EXISTS sender_keys (
    address TEXT NOT NULL,
    distribution_id TEXT NOT NULL,
    data BLOB NOT NULL,
    PRIMARY KEY (address, distribution_id)
);
";
