use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};
use tracing::info;

use crate::errors::AppResult;

pub struct DatabaseContext {
    pub connection: Connection,
    pub path: PathBuf,
}

pub fn bootstrap<P: AsRef<Path>>(database_path: P) -> AppResult<DatabaseContext> {
    let path = database_path.as_ref().to_path_buf();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }

    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
    let connection = Connection::open_with_flags(&path, flags)?;
    apply_pragmas(&connection)?;
    run_migrations(&connection)?;

    info!(
        target: "database_bootstrap",
        path = %path.display(),
        "station store ready"
    );
    Ok(DatabaseContext { connection, path })
}

/// Opens an existing store without creating or migrating it.
pub fn open_existing<P: AsRef<Path>>(database_path: P) -> AppResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE;
    Ok(Connection::open_with_flags(database_path, flags)?)
}

fn apply_pragmas(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        "#,
    )?;
    Ok(())
}

fn run_migrations(connection: &Connection) -> AppResult<()> {
    connection.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stations (
            id INTEGER PRIMARY KEY,
            name TEXT,
            latitude REAL,
            longitude REAL,
            address TEXT,
            operator_clean TEXT,
            city TEXT,
            is_offline INTEGER NOT NULL DEFAULT 0 CHECK (is_offline IN (0, 1)),
            days_since_update INTEGER,
            last_updated TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_city ON stations(city);
        CREATE INDEX IF NOT EXISTS idx_operator ON stations(operator_clean);
        CREATE INDEX IF NOT EXISTS idx_offline ON stations(is_offline);
        CREATE INDEX IF NOT EXISTS idx_lat_lon ON stations(latitude, longitude);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn runs_migrations_and_creates_indexes() {
        let dir = tempdir().unwrap();
        let ctx = bootstrap(dir.path().join("nested").join("stations.db")).unwrap();

        let tables: i64 = ctx
            .connection
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name = 'stations'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 1);

        let mut stmt = ctx
            .connection
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='index' AND name IN ('idx_city','idx_operator','idx_offline','idx_lat_lon')",
            )
            .unwrap();
        let indexes = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .unwrap()
            .count();
        assert_eq!(indexes, 4);
        assert!(ctx.path.ends_with("stations.db"));
    }

    #[test]
    fn bootstrap_is_repeatable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stations.db");
        drop(bootstrap(&path).unwrap());
        let again = bootstrap(&path).unwrap();
        drop(again);
        assert!(open_existing(&path).is_ok());
    }

    #[test]
    fn open_existing_refuses_missing_file() {
        let dir = tempdir().unwrap();
        assert!(open_existing(dir.path().join("missing.db")).is_err());
    }
}
