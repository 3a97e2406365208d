//! SQLite-backed store for accounts, activity facts, and health rows.
//!
//! The database lives at `~/.crmhealth/crmhealth.db` unless `dbPath` is set.
//! Every table carries `org_id`; every query in this module filters on it, so
//! two tenants can share one file without seeing each other's rows. When a
//! key is configured the file is encrypted with SQLCipher, which is also where
//! MCP integration credentials rest.

use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags};

pub mod types;
pub use types::*;

pub mod accounts;
pub mod activity;
pub mod health;
pub mod integrations;

/// Canonical timestamp encoding for every time column.
///
/// Second precision with a literal `Z`, so lexicographic order in SQL matches
/// chronological order.
pub fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Re-encode a caller-supplied time column with [`timestamp`].
///
/// Accepts RFC 3339 with any offset and SQLite `YYYY-MM-DD HH:MM:SS` (read as
/// UTC). Anything else is rejected so range comparisons in SQL stay valid.
pub fn canonical_timestamp(column: &'static str, raw: &str) -> Result<String, DbError> {
    crate::health::decay::parse_timestamp(raw)
        .map(timestamp)
        .ok_or_else(|| DbError::InvalidTimestamp {
            column,
            value: raw.to_string(),
        })
}

fn canonical_opt(column: &'static str, raw: Option<&str>) -> Result<Option<String>, DbError> {
    raw.map(|r| canonical_timestamp(column, r)).transpose()
}

pub struct HealthDb {
    conn: Connection,
    keyed: bool,
}

impl HealthDb {
    /// Whether the file was opened with a SQLCipher key.
    pub fn is_encrypted(&self) -> bool {
        self.keyed
    }

    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::Sqlite(e)))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| E::from(DbError::Sqlite(e)))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database at the default path and apply the schema.
    pub fn open(key: Option<&str>) -> Result<Self, DbError> {
        let path = Self::default_path()?;
        Self::open_at(path, key)
    }

    /// Open a database at an explicit path.
    pub fn open_at(path: PathBuf, key: Option<&str>) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // SQLCipher requires the key before any other statement touches the file.
        let key = key.filter(|k| !k.is_empty());
        if let Some(key) = key {
            conn.pragma_update(None, "key", key)?;
        }

        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn, key).map_err(DbError::Migration)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self {
            conn,
            keyed: key.is_some(),
        })
    }

    /// Open a database in read-only mode.
    pub fn open_readonly_at(path: &Path, key: Option<&str>) -> Result<Self, DbError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let key = key.filter(|k| !k.is_empty());
        if let Some(key) = key {
            conn.pragma_update(None, "key", key)?;
        }
        Ok(Self {
            conn,
            keyed: key.is_some(),
        })
    }

    /// Resolve the default database path: `~/.crmhealth/crmhealth.db`.
    pub fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".crmhealth").join("crmhealth.db"))
    }

    // =========================================================================
    // Organizations
    // =========================================================================

    /// Insert an organization if it does not exist yet.
    pub fn ensure_organization(&self, id: &str, name: &str) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO organizations (id, name, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name, timestamp(Utc::now())],
        )?;
        Ok(())
    }

    pub fn get_organization(&self, id: &str) -> Result<Option<DbOrganization>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM organizations WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| {
            Ok(DbOrganization {
                id: row.get(0)?,
                name: row.get(1)?,
                created_at: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Shared test utilities
// =============================================================================

#[cfg(test)]
pub mod test_utils {
    use super::HealthDb;

    /// Create a temporary database for testing.
    ///
    /// We leak the `TempDir` so the directory persists for the duration of the test.
    /// Test temp dirs are cleaned up by the OS.
    pub fn test_db() -> HealthDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test.db");
        std::mem::forget(dir);
        HealthDb::open_at(path, None).expect("Failed to open test database")
    }

    /// Like [`test_db`] but encrypted with a fixed SQLCipher key.
    pub fn test_db_keyed() -> HealthDb {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("test-keyed.db");
        std::mem::forget(dir);
        HealthDb::open_at(path, Some("test-key")).expect("Failed to open keyed test database")
    }

    /// A test database seeded with one organization and one account per id.
    pub fn seeded_db(org_id: &str, account_ids: &[&str]) -> HealthDb {
        let db = test_db();
        db.ensure_organization(org_id, org_id).expect("org");
        for id in account_ids {
            db.upsert_account(&crate::db::DbAccount {
                id: id.to_string(),
                org_id: org_id.to_string(),
                name: format!("Account {}", id),
                lifecycle: Some("active".to_string()),
                arr: None,
                archived: false,
                updated_at: super::timestamp(chrono::Utc::now()),
            })
            .expect("account");
        }
        db
    }
}

// =============================================================================
// Tests
// =============================================================================
