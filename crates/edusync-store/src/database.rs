//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`].
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Default database location in the platform data directory:
    /// - Linux:   `~/.local/share/edusync/edusync.db`
    /// - macOS:   `~/Library/Application Support/org.edusync.edusync/edusync.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\edusync\edusync\data\edusync.db`
    pub fn default_path() -> Result<PathBuf> {
        let project_dirs =
            ProjectDirs::from("org", "edusync", "edusync").ok_or(StoreError::NoDataDir)?;
        Ok(project_dirs.data_dir().join("edusync.db"))
    }

    /// Open (or create) the default application database.
    pub fn new(max_pages: Option<u32>) -> Result<Self> {
        let db_path = Self::default_path()?;
        tracing::info!(path = %db_path.display(), "opening database");
        Self::open_at(&db_path, max_pages)
    }

    /// Open (or create) a database at an explicit path.
    ///
    /// `max_pages` caps the file size in SQLite pages. Writes past the cap
    /// fail with `SQLITE_FULL`, the same way they would on a full device.
    pub fn open_at(path: &Path, max_pages: Option<u32>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;

        migrations::run_migrations(&conn)?;

        // Not persistent, so it is applied on every open.
        if let Some(pages) = max_pages {
            tracing::debug!(pages, "setting page budget");
            conn.pragma_update(None, "max_page_count", pages)?;
        }

        Ok(Self { conn })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn.path().map(PathBuf::from)
    }

    pub fn get_value(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn()
            .query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete_value(&self, key: &str) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM kv_store WHERE key = ?1", params![key])?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path, None).expect("should open");
        assert!(db.path().is_some());
    }

    #[test]
    fn kv_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("kv.db"), None).unwrap();

        assert_eq!(db.get_value("k").unwrap(), None);
        db.put_value("k", "one").unwrap();
        db.put_value("k", "two").unwrap();
        assert_eq!(db.get_value("k").unwrap().as_deref(), Some("two"));
        assert!(db.delete_value("k").unwrap());
        assert!(!db.delete_value("k").unwrap());
    }

    #[test]
    fn migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.db");
        drop(Database::open_at(&path, None).unwrap());

        let db = Database::open_at(&path, None).unwrap();
        let version: u32 = db
            .conn()
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .unwrap();
        assert_eq!(version, migrations::CURRENT_VERSION);
    }
}
