//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("migrations/001_baseline.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("migrations/002_mcp_integrations.sql"),
    },
];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Back up the database before applying migrations to an existing schema.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. The copy is keyed with the same SQLCipher
/// key as the source so credentials never land in a plaintext file.
fn backup_before_migration(conn: &Connection, key: Option<&str>) -> Result<(), String> {
    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;
    if let Some(key) = key.filter(|k| !k.is_empty()) {
        backup_conn
            .pragma_update(None, "key", key)
            .map_err(|e| format!("Failed to key backup file: {}", e))?;
    }

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
///
/// Forward-compat guard: if the database has a higher version than the highest
/// known migration, returns an error telling the user to upgrade.
pub fn run_migrations(conn: &Connection, key: Option<&str>) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this version of crmhealth supports ({}). \
             Please upgrade crmhealth.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    // A fresh database has nothing worth backing up.
    if current > 0 {
        backup_before_migration(conn, key)?;
    }

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_all() {
        let conn = mem_db();
        let applied = run_migrations(&conn, None).expect("migrations should succeed");
        assert_eq!(applied, MIGRATIONS.len());
        assert_eq!(current_version(&conn).unwrap(), 2);

        conn.execute(
            "INSERT INTO organizations (id, name, created_at) VALUES ('o1', 'Acme', '2025-01-01')",
            [],
        )
        .expect("organizations table should exist");
        conn.execute(
            "INSERT INTO accounts (id, org_id, name, updated_at) VALUES ('a1', 'o1', 'Acme', '2025-01-01')",
            [],
        )
        .expect("accounts table should exist");
        conn.execute(
            "INSERT INTO mcp_integrations (id, org_id, name, transport, updated_at)
             VALUES ('i1', 'o1', 'Tickets', 'stdio', '2025-01-01')",
            [],
        )
        .expect("mcp_integrations table should exist");
    }

    #[test]
    fn test_health_score_check_constraint() {
        let conn = mem_db();
        run_migrations(&conn, None).unwrap();
        let result = conn.execute(
            "INSERT INTO account_health (org_id, account_id, score, engagement_score, support_score,
             relationship_score, financial_score, adoption_score, risk_level, calculated_at, updated_at)
             VALUES ('o1', 'a1', 140, 0, 0, 0, 0, 0, 'LOW', 'x', 'x')",
            [],
        );
        assert!(result.is_err(), "score above 100 must be rejected");
    }

    #[test]
    fn test_forward_compat_guard() {
        let conn = mem_db();
        ensure_schema_version_table(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn, None).unwrap_err();
        assert!(
            err.contains("newer than this version"),
            "error should mention version mismatch: {}",
            err
        );
    }

    #[test]
    fn test_idempotency() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn, None).unwrap(), 2);
        assert_eq!(run_migrations(&conn, None).unwrap(), 0);
        assert_eq!(current_version(&conn).unwrap(), 2);
    }

    #[test]
    fn test_pre_migration_backup_only_for_existing_schema() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("test_backup.db");
        let backup_path = dir.path().join("test_backup.db.pre-migration.bak");

        let conn = Connection::open(&db_path).expect("open db");
        ensure_schema_version_table(&conn).unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
            .unwrap();

        let applied = run_migrations(&conn, None).expect("migrations should succeed");
        assert_eq!(applied, 1);
        assert!(backup_path.exists(), "backup should exist at {}", backup_path.display());

        let fresh_path = dir.path().join("fresh.db");
        let fresh = Connection::open(&fresh_path).unwrap();
        run_migrations(&fresh, None).unwrap();
        assert!(!dir.path().join("fresh.db.pre-migration.bak").exists());
    }
}
