use super::*;

const INTEGRATION_COLUMNS: &str = "id, org_id, name, transport, command, args, url,
    credential, credential_env, credential_fingerprint, status, last_error, tools,
    connected_at, updated_at";

impl HealthDb {
    // =========================================================================
    // MCP integrations
    // =========================================================================

    /// Insert or replace an integration definition. Connection state columns
    /// are reset because the definition may point somewhere new.
    pub fn upsert_integration(&self, row: &DbIntegration) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO mcp_integrations (
                id, org_id, name, transport, command, args, url,
                credential, credential_env, credential_fingerprint,
                status, last_error, tools, connected_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(org_id, id) DO UPDATE SET
                name = excluded.name,
                transport = excluded.transport,
                command = excluded.command,
                args = excluded.args,
                url = excluded.url,
                credential = excluded.credential,
                credential_env = excluded.credential_env,
                credential_fingerprint = excluded.credential_fingerprint,
                status = excluded.status,
                last_error = excluded.last_error,
                tools = excluded.tools,
                connected_at = excluded.connected_at,
                updated_at = excluded.updated_at",
            params![
                row.id,
                row.org_id,
                row.name,
                row.transport,
                row.command,
                row.args,
                row.url,
                row.credential,
                row.credential_env,
                row.credential_fingerprint,
                row.status,
                row.last_error,
                row.tools,
                row.connected_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_integration(&self, org_id: &str, id: &str) -> Result<Option<DbIntegration>, DbError> {
        let sql = format!(
            "SELECT {} FROM mcp_integrations WHERE org_id = ?1 AND id = ?2",
            INTEGRATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![org_id, id], Self::map_integration_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    pub fn list_integrations(&self, org_id: &str) -> Result<Vec<DbIntegration>, DbError> {
        let sql = format!(
            "SELECT {} FROM mcp_integrations WHERE org_id = ?1 ORDER BY name",
            INTEGRATION_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id], Self::map_integration_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record a successful connect along with the tools it advertised.
    pub fn mark_integration_connected(
        &self,
        org_id: &str,
        id: &str,
        tools_json: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let now = timestamp(at);
        let rows = self.conn.execute(
            "UPDATE mcp_integrations
             SET status = 'connected', last_error = NULL, tools = ?3,
                 connected_at = ?4, updated_at = ?4
             WHERE org_id = ?1 AND id = ?2",
            params![org_id, id, tools_json, now],
        )?;
        Ok(rows > 0)
    }

    /// Record a disconnect. The tool list is cleared with the session.
    pub fn mark_integration_disconnected(
        &self,
        org_id: &str,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE mcp_integrations
             SET status = 'disconnected', tools = '[]', connected_at = NULL, updated_at = ?3
             WHERE org_id = ?1 AND id = ?2",
            params![org_id, id, timestamp(at)],
        )?;
        Ok(rows > 0)
    }

    pub fn mark_integration_error(
        &self,
        org_id: &str,
        id: &str,
        error: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "UPDATE mcp_integrations
             SET status = 'error', last_error = ?3, tools = '[]', connected_at = NULL, updated_at = ?4
             WHERE org_id = ?1 AND id = ?2",
            params![org_id, id, error, timestamp(at)],
        )?;
        Ok(rows > 0)
    }

    pub fn delete_integration(&self, org_id: &str, id: &str) -> Result<bool, DbError> {
        let rows = self.conn.execute(
            "DELETE FROM mcp_integrations WHERE org_id = ?1 AND id = ?2",
            params![org_id, id],
        )?;
        Ok(rows > 0)
    }

    fn map_integration_row(row: &rusqlite::Row) -> rusqlite::Result<DbIntegration> {
        Ok(DbIntegration {
            id: row.get(0)?,
            org_id: row.get(1)?,
            name: row.get(2)?,
            transport: row.get(3)?,
            command: row.get(4)?,
            args: row.get(5)?,
            url: row.get(6)?,
            credential: row.get(7)?,
            credential_env: row.get(8)?,
            credential_fingerprint: row.get(9)?,
            status: row.get(10)?,
            last_error: row.get(11)?,
            tools: row.get(12)?,
            connected_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::db::test_utils::test_db;
    use crate::db::{timestamp, DbIntegration};

    fn integration(id: &str) -> DbIntegration {
        DbIntegration {
            id: id.to_string(),
            org_id: "org-1".to_string(),
            name: "Ticket desk".to_string(),
            transport: "stdio".to_string(),
            command: Some("ticket-mcp".to_string()),
            args: "[\"--stdio\"]".to_string(),
            url: None,
            credential: Some("sk-secret".to_string()),
            credential_env: Some("TICKET_API_KEY".to_string()),
            credential_fingerprint: Some("abc".to_string()),
            status: "disconnected".to_string(),
            last_error: None,
            tools: "[]".to_string(),
            connected_at: None,
            updated_at: timestamp(Utc::now()),
        }
    }

    #[test]
    fn test_integration_status_transitions() {
        let db = test_db();
        db.ensure_organization("org-1", "Org").unwrap();
        db.upsert_integration(&integration("desk")).unwrap();

        assert!(db
            .mark_integration_connected("org-1", "desk", r#"[{"name":"search"}]"#, Utc::now())
            .unwrap());
        let row = db.get_integration("org-1", "desk").unwrap().unwrap();
        assert_eq!(row.status, "connected");
        assert!(row.connected_at.is_some());
        assert!(row.tools.contains("search"));

        db.mark_integration_error("org-1", "desk", "spawn failed", Utc::now())
            .unwrap();
        let row = db.get_integration("org-1", "desk").unwrap().unwrap();
        assert_eq!(row.status, "error");
        assert_eq!(row.last_error.as_deref(), Some("spawn failed"));
        assert_eq!(row.tools, "[]");

        db.mark_integration_disconnected("org-1", "desk", Utc::now())
            .unwrap();
        let row = db.get_integration("org-1", "desk").unwrap().unwrap();
        assert_eq!(row.status, "disconnected");
        assert!(row.connected_at.is_none());
    }

    #[test]
    fn test_debug_redacts_credential() {
        let rendered = format!("{:?}", integration("desk"));
        assert!(!rendered.contains("sk-secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_integrations_scoped_by_org() {
        let db = test_db();
        db.ensure_organization("org-1", "Org").unwrap();
        db.upsert_integration(&integration("desk")).unwrap();
        assert!(db.get_integration("org-2", "desk").unwrap().is_none());
        assert_eq!(db.list_integrations("org-1").unwrap().len(), 1);
        assert!(db.delete_integration("org-1", "desk").unwrap());
        assert!(db.list_integrations("org-1").unwrap().is_empty());
    }
}
