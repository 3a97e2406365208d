//! Recalculation entry points: score one account or every account in a tenant.
//!
//! Each account is read, scored, and written inside its own transaction. The
//! audit entry is written after commit; a failed audit write is logged and
//! does not undo the recalculation.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::audit::{HealthAudit, HealthAuditEntry};
use crate::db::{timestamp, DbAccountHealth, HealthDb};
use crate::error::HealthError;
use crate::health::components::score_components;
use crate::health::composite::composite_score;
use crate::health::metrics::{gather_metrics, AccountMetrics, MetricQuery, MetricSource};
use crate::health::risk::{classify, risk_reasons};
use crate::types::{AccountHealth, HealthConfig, OrgContext, PreviousScorePolicy};

/// One account that could not be recalculated during a bulk run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountFailure {
    pub account_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRecalcSummary {
    /// Accounts whose health row was written.
    pub updated_count: usize,
    /// Accounts that had no health row before this run.
    pub newly_scored_count: usize,
    pub results: Vec<AccountHealth>,
    pub failures: Vec<AccountFailure>,
}

/// Resolve `previous_score` for a new row given the row it replaces.
pub fn next_previous_score(
    prior: Option<&AccountHealth>,
    new_score: u8,
    policy: PreviousScorePolicy,
) -> Option<u8> {
    let prior = prior?;
    match policy {
        PreviousScorePolicy::ShiftAlways => Some(prior.score),
        PreviousScorePolicy::ShiftOnChange if prior.score != new_score => Some(prior.score),
        PreviousScorePolicy::ShiftOnChange => prior.previous_score,
    }
}

/// Build a health row from gathered metrics. Pure: no I/O.
pub fn compute_health(
    ctx: &OrgContext,
    account_id: &str,
    metrics: &AccountMetrics,
    prior: Option<&AccountHealth>,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> AccountHealth {
    let sub_scores = score_components(metrics, config, now);
    let score = composite_score(&sub_scores, &config.weights);
    let risk_level = classify(score, &config.thresholds);
    let reasons = risk_reasons(metrics, &sub_scores, config, now);
    let stamp = timestamp(now);

    let engagement = metrics.engagement.as_ref();
    let relationship = metrics.relationship.as_ref();

    AccountHealth {
        org_id: ctx.org_id.clone(),
        account_id: account_id.to_string(),
        score,
        previous_score: next_previous_score(prior, score, config.previous_score),
        sub_scores,
        risk_level,
        is_at_risk: risk_level.is_at_risk(),
        risk_reasons: reasons,
        degraded_dimensions: metrics.degraded.clone(),
        last_login_at: engagement.and_then(|e| e.last_login_at.clone()),
        last_contact_at: relationship.and_then(|r| r.last_contact_at.clone()),
        last_meeting_at: relationship.and_then(|r| r.last_meeting_at.clone()),
        open_ticket_count: metrics.support.map(|t| t.open).unwrap_or(0),
        calculated_at: stamp.clone(),
        updated_at: stamp,
    }
}

struct Outcome {
    health: AccountHealth,
    newly_scored: bool,
}

/// Recalculate and persist one account's health.
///
/// Returns `NotFound` if the account is absent from the tenant or archived.
pub fn recalculate_health(
    db: &HealthDb,
    source: &dyn MetricSource,
    audit: &dyn HealthAudit,
    config: &HealthConfig,
    ctx: &OrgContext,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<AccountHealth, HealthError> {
    config.validate().map_err(HealthError::InvalidConfig)?;
    recalculate_one(db, source, audit, config, ctx, account_id, now).map(|o| o.health)
}

fn recalculate_one(
    db: &HealthDb,
    source: &dyn MetricSource,
    audit: &dyn HealthAudit,
    config: &HealthConfig,
    ctx: &OrgContext,
    account_id: &str,
    now: DateTime<Utc>,
) -> Result<Outcome, HealthError> {
    let account = db.get_account(&ctx.org_id, account_id)?;
    if !account.is_some_and(|a| !a.archived) {
        return Err(HealthError::NotFound {
            org_id: ctx.org_id.clone(),
            account_id: account_id.to_string(),
        });
    }

    let query = MetricQuery {
        ctx,
        account_id,
        now,
        params: &config.scoring,
    };
    let metrics = gather_metrics(source, &query);

    let (prior, health) = db.with_transaction(|tx| -> Result<_, HealthError> {
        let prior = tx
            .get_account_health(&ctx.org_id, account_id)?
            .map(DbAccountHealth::into_health)
            .transpose()?;
        let health = compute_health(ctx, account_id, &metrics, prior.as_ref(), config, now);
        tx.upsert_account_health(&DbAccountHealth::from_health(&health)?)?;
        Ok((prior, health))
    })?;

    log::info!(
        "Recalculated health for {}/{}: {} ({}) by {}",
        ctx.org_id,
        account_id,
        health.score,
        health.risk_level,
        ctx.actor_label()
    );

    let newly_scored = prior.is_none();
    let entry = HealthAuditEntry::recalculation(ctx, prior, health.clone());
    if let Err(e) = audit.record(&entry) {
        log::warn!(
            "Audit write failed for {}/{}: {}",
            ctx.org_id,
            account_id,
            e
        );
    }

    Ok(Outcome {
        health,
        newly_scored,
    })
}

/// Recalculate every non-archived account of the tenant, sequentially.
///
/// A failing account is recorded in `failures` and the batch continues.
/// Only a failure to list the accounts fails the whole call.
pub fn recalculate_all_health(
    db: &HealthDb,
    source: &dyn MetricSource,
    audit: &dyn HealthAudit,
    config: &HealthConfig,
    ctx: &OrgContext,
    now: DateTime<Utc>,
) -> Result<BulkRecalcSummary, HealthError> {
    config.validate().map_err(HealthError::InvalidConfig)?;
    let accounts = db.get_all_accounts(&ctx.org_id)?;

    let mut summary = BulkRecalcSummary::default();
    for account in accounts {
        match recalculate_one(db, source, audit, config, ctx, &account.id, now) {
            Ok(outcome) => {
                summary.updated_count += 1;
                if outcome.newly_scored {
                    summary.newly_scored_count += 1;
                }
                summary.results.push(outcome.health);
            }
            Err(e) => {
                log::warn!(
                    "Bulk recalculation: {}/{} failed: {}",
                    ctx.org_id,
                    account.id,
                    e
                );
                summary.failures.push(AccountFailure {
                    account_id: account.id,
                    error: e.to_string(),
                });
            }
        }
    }

    log::info!(
        "Bulk recalculation for {}: {} updated, {} newly scored, {} failed",
        ctx.org_id,
        summary.updated_count,
        summary.newly_scored_count,
        summary.failures.len()
    );
    Ok(summary)
}
