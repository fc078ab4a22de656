use std::{path::Path, sync::Mutex};

use miette::{Context, IntoDiagnostic};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef},
    Connection, OptionalExtension, ToSql,
};
use tracing::debug;

use crate::{result::Result, utils::MutexUtils};

use super::{SegmentDb, SegmentRecord};

#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl SegmentDb for Sqlite {
    fn read_or_create(p: &Path) -> Result<Self> {
        if let Some(parent) = p.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(p)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not open sqlite file {}", p.display()))?;
        Self::with_connection(conn)
    }

    #[cfg(test)]
    fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .into_diagnostic()
            .wrap_err("Could not open in-memory sqlite database")?;
        Self::with_connection(conn)
    }

    fn record(&self, key: &str, record: &SegmentRecord) -> Result<()> {
        debug!("Recording segment {key}: {:?}", record.tokens);
        self.conn.with_lock(|conn| {
            conn.execute(
                "INSERT INTO segments (key, tokens, missing)
                VALUES (?1, ?2, ?3)
                ON CONFLICT (key) DO UPDATE
                SET tokens = excluded.tokens, missing = excluded.missing",
                params![key, JsonList(&record.tokens), JsonList(&record.missing)],
            )
            .into_diagnostic()
            .wrap_err("Could not insert segment row")
        })?;
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<SegmentRecord>> {
        let record = self.conn.with_lock(|conn| {
            conn.query_row(
                "SELECT tokens, missing FROM segments WHERE key = ?",
                [key],
                |row| {
                    let tokens: OwnedJsonList = row.get(0)?;
                    let missing: OwnedJsonList = row.get(1)?;
                    Ok(SegmentRecord {
                        tokens: tokens.0,
                        missing: missing.0,
                    })
                },
            )
            .optional()
            .into_diagnostic()
            .wrap_err("Could not query segment row")
        })?;
        Ok(record)
    }

    fn forget(&self, key: &str) -> Result<()> {
        debug!("Forgetting segment {key}");
        self.conn.with_lock(|conn| {
            conn.execute("DELETE FROM segments WHERE key = ?", [key])
                .into_diagnostic()
                .wrap_err("Could not delete segment row")
        })?;
        Ok(())
    }

    fn count(&self) -> Result<usize> {
        let count: usize = self.conn.with_lock(|conn| {
            conn.query_row("SELECT COUNT(key) FROM segments", [], |row| row.get(0))
                .into_diagnostic()
        })?;
        Ok(count)
    }
}

impl Sqlite {
    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables()
            .map_err(|err| err.wrap_err_with(|| "Could not create tables"))?;
        Ok(db)
    }

    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS segments (
                    key         TEXT PRIMARY KEY,
                    tokens      TEXT NOT NULL,
                    missing     TEXT NOT NULL
                );",
            )
            .into_diagnostic()
        })?;
        Ok(())
    }
}

/// Write a list of strings as a JSON array column
struct JsonList<'a>(&'a [String]);

impl ToSql for JsonList<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let json = serde_json::to_string(self.0)
            .map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        Ok(ToSqlOutput::from(json))
    }
}

/// Read a JSON array column back into a list of strings
struct OwnedJsonList(Vec<String>);

impl FromSql for OwnedJsonList {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        serde_json::from_str(text)
            .map(OwnedJsonList)
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tokens: &[&str], missing: &[&str]) -> SegmentRecord {
        SegmentRecord {
            tokens: tokens.iter().map(|s| s.to_string()).collect(),
            missing: missing.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn records_and_looks_up() {
        let db = Sqlite::in_memory().unwrap();
        assert_eq!(db.lookup("k").unwrap(), None);

        db.record("k", &record(&["hello", "world"], &["zzz"])).unwrap();
        assert_eq!(
            db.lookup("k").unwrap(),
            Some(record(&["hello", "world"], &["zzz"]))
        );
        assert_eq!(db.count().unwrap(), 1);
    }

    #[test]
    fn record_replaces_previous_one() {
        let db = Sqlite::in_memory().unwrap();
        db.record("k", &record(&["a"], &[])).unwrap();
        db.record("k", &record(&["b"], &[])).unwrap();

        assert_eq!(db.lookup("k").unwrap(), Some(record(&["b"], &[])));
        assert_eq!(db.count().unwrap(), 1);

        db.forget("k").unwrap();
        db.forget("k").unwrap();
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn persists_between_openings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("segments.sqlite");

        Sqlite::read_or_create(&path)
            .unwrap()
            .record("k", &record(&["book"], &[]))
            .unwrap();

        let db = Sqlite::read_or_create(&path).unwrap();
        assert_eq!(db.lookup("k").unwrap(), Some(record(&["book"], &[])));
    }

    #[test]
    fn rejects_non_database_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("segments.sqlite");
        std::fs::write(&path, "definitely not sqlite ".repeat(100)).unwrap();

        assert!(Sqlite::read_or_create(&path).is_err());
    }
}
