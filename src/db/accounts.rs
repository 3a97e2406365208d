use super::*;

impl HealthDb {
    // =========================================================================
    // Accounts
    // =========================================================================

    /// Insert or update an account within its organization.
    pub fn upsert_account(&self, account: &DbAccount) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO accounts (id, org_id, name, lifecycle, arr, archived, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(org_id, id) DO UPDATE SET
                name = excluded.name,
                lifecycle = excluded.lifecycle,
                arr = excluded.arr,
                archived = excluded.archived,
                updated_at = excluded.updated_at",
            params![
                account.id,
                account.org_id,
                account.name,
                account.lifecycle,
                account.arr,
                account.archived as i32,
                account.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Get an account by ID within an organization.
    pub fn get_account(&self, org_id: &str, id: &str) -> Result<Option<DbAccount>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, org_id, name, lifecycle, arr, archived, updated_at
             FROM accounts
             WHERE org_id = ?1 AND id = ?2",
        )?;

        let mut rows = stmt.query_map(params![org_id, id], Self::map_account_row)?;

        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Get all non-archived accounts of an organization, ordered by name.
    pub fn get_all_accounts(&self, org_id: &str) -> Result<Vec<DbAccount>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, org_id, name, lifecycle, arr, archived, updated_at
             FROM accounts WHERE org_id = ?1 AND archived = 0 ORDER BY name",
        )?;
        let rows = stmt.query_map(params![org_id], Self::map_account_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Resolve an identifier typed by a person: exact ID first, then
    /// case-insensitive name.
    pub fn find_account(&self, org_id: &str, query: &str) -> Result<Option<DbAccount>, DbError> {
        if let Some(account) = self.get_account(org_id, query)? {
            return Ok(Some(account));
        }
        let mut stmt = self.conn.prepare(
            "SELECT id, org_id, name, lifecycle, arr, archived, updated_at
             FROM accounts
             WHERE org_id = ?1 AND LOWER(name) = LOWER(?2)
             ORDER BY archived, name
             LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![org_id, query], Self::map_account_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Mark an account archived. Returns `true` if a row was updated.
    pub fn archive_account(&self, org_id: &str, id: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE accounts SET archived = 1, updated_at = ?3 WHERE org_id = ?1 AND id = ?2",
            params![org_id, id, timestamp(chrono::Utc::now())],
        )?;
        Ok(rows > 0)
    }

    fn map_account_row(row: &rusqlite::Row) -> rusqlite::Result<DbAccount> {
        Ok(DbAccount {
            id: row.get(0)?,
            org_id: row.get(1)?,
            name: row.get(2)?,
            lifecycle: row.get(3)?,
            arr: row.get(4)?,
            archived: row.get::<_, i32>(5)? != 0,
            updated_at: row.get(6)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::{seeded_db, test_db};
    use crate::db::DbAccount;

    fn account(org: &str, id: &str, name: &str) -> DbAccount {
        DbAccount {
            id: id.to_string(),
            org_id: org.to_string(),
            name: name.to_string(),
            lifecycle: None,
            arr: Some(120_000.0),
            archived: false,
            updated_at: crate::db::timestamp(chrono::Utc::now()),
        }
    }

    #[test]
    fn test_upsert_and_get_account() {
        let db = test_db();
        db.ensure_organization("org-1", "Org").unwrap();
        db.upsert_account(&account("org-1", "acme", "Acme Corp")).unwrap();

        let got = db.get_account("org-1", "acme").unwrap().unwrap();
        assert_eq!(got.name, "Acme Corp");
        assert_eq!(got.arr, Some(120_000.0));
        assert!(!got.archived);
    }

    #[test]
    fn test_accounts_are_tenant_scoped() {
        let db = test_db();
        db.ensure_organization("org-1", "One").unwrap();
        db.ensure_organization("org-2", "Two").unwrap();
        db.upsert_account(&account("org-1", "acme", "Acme")).unwrap();
        db.upsert_account(&account("org-2", "acme", "Acme (other tenant)")).unwrap();

        assert_eq!(db.get_account("org-1", "acme").unwrap().unwrap().name, "Acme");
        assert_eq!(
            db.get_account("org-2", "acme").unwrap().unwrap().name,
            "Acme (other tenant)"
        );
        assert!(db.get_account("org-3", "acme").unwrap().is_none());
        assert_eq!(db.get_all_accounts("org-1").unwrap().len(), 1);
    }

    #[test]
    fn test_archived_accounts_hidden_from_listing() {
        let db = seeded_db("org-1", &["a", "b"]);
        assert!(db.archive_account("org-1", "a").unwrap());
        let all = db.get_all_accounts("org-1").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].id, "b");
        assert!(db.get_account("org-1", "a").unwrap().unwrap().archived);
    }

    #[test]
    fn test_find_account_by_name() {
        let db = test_db();
        db.ensure_organization("org-1", "Org").unwrap();
        db.upsert_account(&account("org-1", "acme", "Acme Corp")).unwrap();
        assert_eq!(
            db.find_account("org-1", "acme corp").unwrap().unwrap().id,
            "acme"
        );
        assert_eq!(db.find_account("org-1", "acme").unwrap().unwrap().id, "acme");
        assert!(db.find_account("org-1", "globex").unwrap().is_none());
    }
}
