//! Versioned schema migrations
//!
//! Migrations are compiled into the binary and applied in order at startup.
//! The applied version lives in SQLite's `user_version` pragma, so re-running
//! against an up-to-date database does nothing.

use crate::common::{Error, Result};
use rusqlite::Connection;

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub sql: &'static str,
}

/// All known migrations, ordered by version starting at 1.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    name: "create_keyvalue",
    sql: include_str!("../../migrations/0001_create_keyvalue.sql"),
}];

/// Newest schema version this binary knows about.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Schema version recorded in the database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Apply every pending migration. Returns the number applied.
pub fn run(conn: &mut Connection) -> Result<usize> {
    apply(conn, MIGRATIONS)
}

pub(crate) fn apply(conn: &mut Connection, migrations: &[Migration]) -> Result<usize> {
    let current = current_version(conn)?;
    let latest = migrations.last().map(|m| m.version).unwrap_or(0);
    if current > latest {
        return Err(Error::Migration(format!(
            "database schema version {} is newer than supported version {}",
            current, latest
        )));
    }

    let mut applied = 0;
    for migration in migrations.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql).map_err(|e| {
            Error::Migration(format!(
                "{:04}_{}: {}",
                migration.version, migration.name, e
            ))
        })?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;

        tracing::info!(
            version = migration.version,
            name = migration.name,
            "applied migration"
        );
        applied += 1;
    }

    Ok(applied)
}
