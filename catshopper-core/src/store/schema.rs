//! Record table layout
//!
//! Each migration runs in its own transaction and bumps `PRAGMA user_version`
//! on commit, so a store opened by an older build picks up where it stopped.

use rusqlite::Connection;

use crate::error::Result;

struct Migration {
    version: i32,
    description: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "key-value records",
    sql: r#"
    CREATE TABLE IF NOT EXISTS records (
        key         TEXT PRIMARY KEY,
        value       TEXT NOT NULL,
        updated_at  DATETIME NOT NULL
    );
    "#,
}];

/// Layout version written by this build
pub const SCHEMA_VERSION: i32 = 1;

/// Version recorded in the store file; 0 for a fresh file
pub fn stored_version(conn: &Connection) -> Result<i32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Bring the store up to [`SCHEMA_VERSION`]
pub fn apply_pending(conn: &Connection) -> Result<()> {
    let from = stored_version(conn)?;
    if from >= SCHEMA_VERSION {
        tracing::debug!(version = from, "Store layout is current");
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > from) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.pragma_update(None, "user_version", migration.version)?;
        tx.commit()?;
        tracing::info!(
            version = migration.version,
            description = migration.description,
            "Applied store migration"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_pending_twice() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(stored_version(&conn).unwrap(), 0);

        apply_pending(&conn).unwrap();
        apply_pending(&conn).unwrap();

        assert_eq!(stored_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_records_table_created() {
        let conn = Connection::open_in_memory().unwrap();
        apply_pending(&conn).unwrap();

        let exists: i32 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'records'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 1);
    }

    #[test]
    fn test_latest_migration_matches_schema_version() {
        assert_eq!(MIGRATIONS.last().map(|m| m.version), Some(SCHEMA_VERSION));
    }
}
