//! Database schema migrations for the durable store.
//!
//! Migrations are versioned and applied automatically when the store is
//! opened. The `schema_version` table tracks the current migration version.
//! A database stamped with a version newer than [`CURRENT_SCHEMA_VERSION`]
//! is refused rather than guessed at.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
///
/// Increment this when adding new migrations.
pub const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Outcome of a migration attempt that did not fail at the SQL level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    /// Schema is at [`CURRENT_SCHEMA_VERSION`].
    Current,
    /// Database was written by newer code.
    Newer { found: i32 },
}

/// Apply all pending migrations to bring the database to the current schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<MigrationStatus> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn)?;
    if current_version > CURRENT_SCHEMA_VERSION {
        return Ok(MigrationStatus::Newer {
            found: current_version,
        });
    }

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }

    Ok(MigrationStatus::Current)
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    match conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i32>>(0)
    }) {
        Ok(version) => Ok(version.unwrap_or(0)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
        Err(e) => Err(e),
    }
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Migration v1: key/value records grouped by collection.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "CREATE TABLE IF NOT EXISTS records (
            collection TEXT NOT NULL,
            key        TEXT NOT NULL,
            value      TEXT NOT NULL,
            PRIMARY KEY (collection, key)
        );",
    )?;
    set_schema_version(&tx, 1)?;
    tx.commit()
}

/// Migration v2: track when each record was last written.
///
/// Lets housekeeping and debugging tell stale ledger entries from fresh ones
/// without decoding every value.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(
        "ALTER TABLE records ADD COLUMN updated_at TEXT NOT NULL DEFAULT '';
         CREATE INDEX IF NOT EXISTS idx_records_updated_at ON records(collection, updated_at);",
    )?;
    set_schema_version(&tx, 2)?;
    tx.commit()
}
