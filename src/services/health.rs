// Health service: the entry points the CLI and MCP server call.
// Each function locks the database once and scopes all work to `ctx`.

use chrono::Utc;

use crate::db::DbAccountHealth;
use crate::error::HealthError;
use crate::health::{self, BulkRecalcSummary, DbMetricSource};
use crate::state::AppState;
use crate::types::{AccountHealth, OrgContext};

/// Resolve an account by ID or case-insensitive name within the tenant.
pub fn resolve_account_id(
    state: &AppState,
    ctx: &OrgContext,
    query: &str,
) -> Result<String, HealthError> {
    let db = state.db.lock();
    db.find_account(&ctx.org_id, query)?
        .map(|a| a.id)
        .ok_or_else(|| HealthError::NotFound {
            org_id: ctx.org_id.clone(),
            account_id: query.to_string(),
        })
}

/// Recalculate one account and return the stored result.
pub fn recalculate_health(
    state: &AppState,
    ctx: &OrgContext,
    account_id: &str,
) -> Result<AccountHealth, HealthError> {
    let audit = state.audit()?;
    let db = state.db.lock();
    let source = DbMetricSource::new(&db);
    health::recalculate_health(
        &db,
        &source,
        &audit,
        &state.config.health,
        ctx,
        account_id,
        Utc::now(),
    )
}

/// Recalculate every non-archived account of the tenant.
pub fn recalculate_all_health(
    state: &AppState,
    ctx: &OrgContext,
) -> Result<BulkRecalcSummary, HealthError> {
    let audit = state.audit()?;
    let db = state.db.lock();
    let source = DbMetricSource::new(&db);
    health::recalculate_all_health(&db, &source, &audit, &state.config.health, ctx, Utc::now())
}

/// Stored health for one account, `None` if it was never scored.
pub fn get_account_health(
    state: &AppState,
    ctx: &OrgContext,
    account_id: &str,
) -> Result<Option<AccountHealth>, HealthError> {
    let db = state.db.lock();
    if db.get_account(&ctx.org_id, account_id)?.is_none() {
        return Err(HealthError::NotFound {
            org_id: ctx.org_id.clone(),
            account_id: account_id.to_string(),
        });
    }
    Ok(db
        .get_account_health(&ctx.org_id, account_id)?
        .map(DbAccountHealth::into_health)
        .transpose()?)
}

/// HIGH and CRITICAL accounts, lowest score first. Archived accounts are excluded.
pub fn list_at_risk_accounts(
    state: &AppState,
    ctx: &OrgContext,
) -> Result<Vec<AccountHealth>, HealthError> {
    let db = state.db.lock();
    let rows = db.list_at_risk_health(&ctx.org_id)?;
    rows.into_iter()
        .map(|r| r.into_health().map_err(HealthError::from))
        .collect()
}

/// Every scored account of the tenant, lowest score first.
pub fn list_account_health(
    state: &AppState,
    ctx: &OrgContext,
) -> Result<Vec<AccountHealth>, HealthError> {
    let db = state.db.lock();
    let rows = db.list_account_health(&ctx.org_id)?;
    rows.into_iter()
        .map(|r| r.into_health().map_err(HealthError::from))
        .collect()
}

/// Drop audit files older than `auditRetentionDays`.
pub fn prune_audit(state: &AppState) -> Result<usize, HealthError> {
    let audit = state.audit()?;
    Ok(crate::audit::prune_audit_files(
        audit.dir(),
        state.config.audit_retention_days,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::seeded_db;
    use crate::db::DbTicket;
    use crate::types::{Config, RiskLevel};

    fn state_with(accounts: &[&str]) -> (AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            audit_dir: Some(dir.path().join("_audit").to_string_lossy().to_string()),
            ..Config::default()
        };
        (AppState::with_db(config, seeded_db("org-1", accounts)), dir)
    }

    fn open_tickets(state: &AppState, account: &str, count: usize) {
        let db = state.db.lock();
        let now = crate::db::timestamp(Utc::now());
        for i in 0..count {
            db.upsert_ticket(&DbTicket {
                id: format!("{}-t{}", account, i),
                org_id: "org-1".into(),
                account_id: account.into(),
                subject: "Broken export".into(),
                status: "open".into(),
                priority: if i == 0 { "urgent" } else { "normal" }.into(),
                opened_at: now.clone(),
                closed_at: None,
            })
            .unwrap();
        }
    }

    #[test]
    fn test_recalculate_writes_audit_file() {
        let (state, dir) = state_with(&["acme"]);
        let ctx = OrgContext::new("org-1").with_actor("ops");
        let health = recalculate_health(&state, &ctx, "acme").unwrap();
        assert_eq!(health.account_id, "acme");

        let files = std::fs::read_dir(dir.path().join("_audit")).unwrap().count();
        assert_eq!(files, 1);

        let stored = get_account_health(&state, &ctx, "acme").unwrap().unwrap();
        assert_eq!(stored.score, health.score);
    }

    #[test]
    fn test_get_health_unscored_and_unknown() {
        let (state, _dir) = state_with(&["acme"]);
        let ctx = OrgContext::new("org-1");
        assert!(get_account_health(&state, &ctx, "acme").unwrap().is_none());
        assert!(matches!(
            get_account_health(&state, &ctx, "ghost"),
            Err(HealthError::NotFound { .. })
        ));
    }

    #[test]
    fn test_at_risk_listing_after_bulk() {
        let (mut state, _dir) = state_with(&["calm", "stormy"]);
        open_tickets(&state, "stormy", 9);
        let ctx = OrgContext::new("org-1");
        // WorstCase scoring makes the account without activity land in HIGH/CRITICAL.
        state.config.health.missing_data = crate::types::MissingDataPolicy::WorstCase;

        let summary = recalculate_all_health(&state, &ctx).unwrap();
        assert_eq!(summary.updated_count, 2);
        assert_eq!(summary.newly_scored_count, 2);

        let at_risk = list_at_risk_accounts(&state, &ctx).unwrap();
        assert!(!at_risk.is_empty());
        assert!(at_risk.iter().all(|h| h.is_at_risk));
        assert!(at_risk.windows(2).all(|w| w[0].score <= w[1].score));
        assert_eq!(at_risk[0].account_id, "stormy");
        assert_eq!(at_risk[0].risk_level, RiskLevel::Critical);

        assert_eq!(list_account_health(&state, &ctx).unwrap().len(), 2);
    }

    #[test]
    fn test_tenants_are_isolated() {
        let (state, _dir) = state_with(&["acme"]);
        let other = OrgContext::new("org-2");
        assert!(matches!(
            recalculate_health(&state, &other, "acme"),
            Err(HealthError::NotFound { .. })
        ));
        assert!(list_account_health(&state, &other).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_account_by_name() {
        let (state, _dir) = state_with(&["acme"]);
        let ctx = OrgContext::new("org-1");
        assert_eq!(resolve_account_id(&state, &ctx, "account ACME").unwrap(), "acme");
        assert!(resolve_account_id(&state, &ctx, "nobody").is_err());
    }
}
