use super::*;

use crate::types::{AccountHealth, Dimension, RiskLevel, RiskReason, SubScores};

const HEALTH_COLUMNS: &str = "org_id, account_id, score, previous_score,
    engagement_score, support_score, relationship_score, financial_score, adoption_score,
    risk_level, is_at_risk, risk_reasons, degraded_dimensions,
    last_login_at, last_contact_at, last_meeting_at, open_ticket_count,
    calculated_at, updated_at";

impl HealthDb {
    // =========================================================================
    // Account health
    // =========================================================================

    pub fn get_account_health(
        &self,
        org_id: &str,
        account_id: &str,
    ) -> Result<Option<DbAccountHealth>, DbError> {
        let sql = format!(
            "SELECT {} FROM account_health WHERE org_id = ?1 AND account_id = ?2",
            HEALTH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query_map(params![org_id, account_id], Self::map_health_row)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Replace the whole health row for an account.
    pub fn upsert_account_health(&self, row: &DbAccountHealth) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO account_health (
                org_id, account_id, score, previous_score,
                engagement_score, support_score, relationship_score, financial_score, adoption_score,
                risk_level, is_at_risk, risk_reasons, degraded_dimensions,
                last_login_at, last_contact_at, last_meeting_at, open_ticket_count,
                calculated_at, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(org_id, account_id) DO UPDATE SET
                score = excluded.score,
                previous_score = excluded.previous_score,
                engagement_score = excluded.engagement_score,
                support_score = excluded.support_score,
                relationship_score = excluded.relationship_score,
                financial_score = excluded.financial_score,
                adoption_score = excluded.adoption_score,
                risk_level = excluded.risk_level,
                is_at_risk = excluded.is_at_risk,
                risk_reasons = excluded.risk_reasons,
                degraded_dimensions = excluded.degraded_dimensions,
                last_login_at = excluded.last_login_at,
                last_contact_at = excluded.last_contact_at,
                last_meeting_at = excluded.last_meeting_at,
                open_ticket_count = excluded.open_ticket_count,
                calculated_at = excluded.calculated_at,
                updated_at = excluded.updated_at",
            params![
                row.org_id,
                row.account_id,
                row.score,
                row.previous_score,
                row.engagement_score,
                row.support_score,
                row.relationship_score,
                row.financial_score,
                row.adoption_score,
                row.risk_level,
                row.is_at_risk as i32,
                row.risk_reasons,
                row.degraded_dimensions,
                row.last_login_at,
                row.last_contact_at,
                row.last_meeting_at,
                row.open_ticket_count,
                row.calculated_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    /// All health rows of an organization, lowest score first.
    pub fn list_account_health(&self, org_id: &str) -> Result<Vec<DbAccountHealth>, DbError> {
        let sql = format!(
            "SELECT {} FROM account_health WHERE org_id = ?1 ORDER BY score ASC, account_id",
            HEALTH_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id], Self::map_health_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// At-risk rows (HIGH or CRITICAL) for non-archived accounts, lowest score first.
    pub fn list_at_risk_health(&self, org_id: &str) -> Result<Vec<DbAccountHealth>, DbError> {
        let sql = format!(
            "SELECT {} FROM account_health h
             WHERE h.org_id = ?1 AND h.is_at_risk = 1
               AND EXISTS (SELECT 1 FROM accounts a
                           WHERE a.org_id = h.org_id AND a.id = h.account_id AND a.archived = 0)
             ORDER BY h.score ASC, h.account_id",
            HEALTH_COLUMNS
                .split(',')
                .map(|c| format!("h.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![org_id], Self::map_health_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn map_health_row(row: &rusqlite::Row) -> rusqlite::Result<DbAccountHealth> {
        Ok(DbAccountHealth {
            org_id: row.get(0)?,
            account_id: row.get(1)?,
            score: row.get(2)?,
            previous_score: row.get(3)?,
            engagement_score: row.get(4)?,
            support_score: row.get(5)?,
            relationship_score: row.get(6)?,
            financial_score: row.get(7)?,
            adoption_score: row.get(8)?,
            risk_level: row.get(9)?,
            is_at_risk: row.get::<_, i32>(10)? != 0,
            risk_reasons: row.get(11)?,
            degraded_dimensions: row.get(12)?,
            last_login_at: row.get(13)?,
            last_contact_at: row.get(14)?,
            last_meeting_at: row.get(15)?,
            open_ticket_count: row.get(16)?,
            calculated_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

fn corrupt(detail: impl Into<String>) -> DbError {
    DbError::CorruptRow {
        table: "account_health",
        detail: detail.into(),
    }
}

fn to_score(value: i64, column: &str) -> Result<u8, DbError> {
    u8::try_from(value)
        .ok()
        .filter(|v| *v <= 100)
        .ok_or_else(|| corrupt(format!("{} out of range: {}", column, value)))
}

impl DbAccountHealth {
    pub fn from_health(health: &AccountHealth) -> Result<Self, DbError> {
        let risk_reasons = serde_json::to_string(&health.risk_reasons)
            .map_err(|e| corrupt(format!("risk_reasons: {}", e)))?;
        let degraded_dimensions = serde_json::to_string(&health.degraded_dimensions)
            .map_err(|e| corrupt(format!("degraded_dimensions: {}", e)))?;
        Ok(Self {
            org_id: health.org_id.clone(),
            account_id: health.account_id.clone(),
            score: health.score as i64,
            previous_score: health.previous_score.map(i64::from),
            engagement_score: health.sub_scores.engagement as i64,
            support_score: health.sub_scores.support as i64,
            relationship_score: health.sub_scores.relationship as i64,
            financial_score: health.sub_scores.financial as i64,
            adoption_score: health.sub_scores.adoption as i64,
            risk_level: health.risk_level.as_str().to_string(),
            is_at_risk: health.is_at_risk,
            risk_reasons,
            degraded_dimensions,
            last_login_at: health.last_login_at.clone(),
            last_contact_at: health.last_contact_at.clone(),
            last_meeting_at: health.last_meeting_at.clone(),
            open_ticket_count: health.open_ticket_count as i64,
            calculated_at: health.calculated_at.clone(),
            updated_at: health.updated_at.clone(),
        })
    }

    pub fn into_health(self) -> Result<AccountHealth, DbError> {
        let risk_level = RiskLevel::parse(&self.risk_level)
            .ok_or_else(|| corrupt(format!("unknown risk_level '{}'", self.risk_level)))?;
        let risk_reasons: Vec<RiskReason> = serde_json::from_str(&self.risk_reasons)
            .map_err(|e| corrupt(format!("risk_reasons: {}", e)))?;
        let degraded_dimensions: Vec<Dimension> = serde_json::from_str(&self.degraded_dimensions)
            .map_err(|e| corrupt(format!("degraded_dimensions: {}", e)))?;
        let previous_score = match self.previous_score {
            Some(v) => Some(to_score(v, "previous_score")?),
            None => None,
        };
        Ok(AccountHealth {
            score: to_score(self.score, "score")?,
            previous_score,
            sub_scores: SubScores {
                engagement: to_score(self.engagement_score, "engagement_score")?,
                support: to_score(self.support_score, "support_score")?,
                relationship: to_score(self.relationship_score, "relationship_score")?,
                financial: to_score(self.financial_score, "financial_score")?,
                adoption: to_score(self.adoption_score, "adoption_score")?,
            },
            risk_level,
            is_at_risk: self.is_at_risk,
            risk_reasons,
            degraded_dimensions,
            open_ticket_count: u32::try_from(self.open_ticket_count).unwrap_or(0),
            org_id: self.org_id,
            account_id: self.account_id,
            last_login_at: self.last_login_at,
            last_contact_at: self.last_contact_at,
            last_meeting_at: self.last_meeting_at,
            calculated_at: self.calculated_at,
            updated_at: self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::db::test_utils::seeded_db;
    use crate::db::DbAccountHealth;
    use crate::types::{AccountHealth, Dimension, RiskLevel, RiskReason, SubScores};

    fn health(account: &str, score: u8, level: RiskLevel) -> AccountHealth {
        AccountHealth {
            org_id: "org-1".into(),
            account_id: account.into(),
            score,
            previous_score: None,
            sub_scores: SubScores::uniform(score),
            risk_level: level,
            is_at_risk: level.is_at_risk(),
            risk_reasons: vec![
                RiskReason::NoRecentLogin { days: Some(45) },
                RiskReason::DataUnavailable {
                    dimension: Dimension::Financial,
                },
            ],
            degraded_dimensions: vec![Dimension::Financial],
            last_login_at: Some("2025-04-17T00:00:00Z".into()),
            last_contact_at: None,
            last_meeting_at: None,
            open_ticket_count: 2,
            calculated_at: "2025-06-01T00:00:00Z".into(),
            updated_at: "2025-06-01T00:00:00Z".into(),
        }
    }

    #[test]
    fn test_health_row_roundtrip_through_db() {
        let db = seeded_db("org-1", &["acme"]);
        let original = health("acme", 35, RiskLevel::High);
        db.upsert_account_health(&DbAccountHealth::from_health(&original).unwrap())
            .unwrap();

        let loaded = db
            .get_account_health("org-1", "acme")
            .unwrap()
            .unwrap()
            .into_health()
            .unwrap();
        assert_eq!(loaded, original);
    }

    #[test]
    fn test_upsert_overwrites_existing_row() {
        let db = seeded_db("org-1", &["acme"]);
        db.upsert_account_health(&DbAccountHealth::from_health(&health("acme", 35, RiskLevel::High)).unwrap())
            .unwrap();
        let mut newer = health("acme", 80, RiskLevel::Low);
        newer.previous_score = Some(35);
        newer.risk_reasons.clear();
        db.upsert_account_health(&DbAccountHealth::from_health(&newer).unwrap())
            .unwrap();

        let loaded = db.get_account_health("org-1", "acme").unwrap().unwrap();
        assert_eq!(loaded.score, 80);
        assert_eq!(loaded.previous_score, Some(35));
        assert_eq!(loaded.risk_reasons, "[]");
        assert_eq!(db.list_account_health("org-1").unwrap().len(), 1);
    }

    #[test]
    fn test_list_at_risk_orders_by_score_and_skips_archived() {
        let db = seeded_db("org-1", &["a", "b", "c", "d"]);
        for (id, score, level) in [
            ("a", 75, RiskLevel::Low),
            ("b", 30, RiskLevel::High),
            ("c", 10, RiskLevel::Critical),
            ("d", 5, RiskLevel::Critical),
        ] {
            db.upsert_account_health(&DbAccountHealth::from_health(&health(id, score, level)).unwrap())
                .unwrap();
        }
        db.archive_account("org-1", "d").unwrap();

        let at_risk: Vec<String> = db
            .list_at_risk_health("org-1")
            .unwrap()
            .into_iter()
            .map(|h| h.account_id)
            .collect();
        assert_eq!(at_risk, vec!["c".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_corrupt_risk_level_is_reported() {
        let db = seeded_db("org-1", &["acme"]);
        db.upsert_account_health(&DbAccountHealth::from_health(&health("acme", 50, RiskLevel::Medium)).unwrap())
            .unwrap();
        let mut row = db.get_account_health("org-1", "acme").unwrap().unwrap();
        row.risk_level = "SEVERE".into();
        assert!(row.into_health().is_err());
    }
}
