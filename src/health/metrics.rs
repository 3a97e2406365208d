//! Metric aggregation: per-account raw signals grouped by dimension.
//!
//! Each dimension is fetched independently through [`MetricSource`]. A source
//! that fails for one dimension leaves that dimension's facts as `None` and
//! records it in `degraded`; the other four are unaffected.

use chrono::{DateTime, Duration, Utc};

use crate::db::{HealthDb, InvoiceTotals, TicketCounts, UsageSummary};
use crate::error::HealthError;
use crate::types::{Dimension, OrgContext, ScoringParams};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngagementFacts {
    pub last_login_at: Option<String>,
    pub logins_in_window: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationshipFacts {
    pub last_contact_at: Option<String>,
    pub last_meeting_at: Option<String>,
}

/// Everything the scorers need for one account at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountMetrics {
    pub engagement: Option<EngagementFacts>,
    pub support: Option<TicketCounts>,
    pub relationship: Option<RelationshipFacts>,
    pub financial: Option<InvoiceTotals>,
    pub adoption: Option<UsageSummary>,
    /// Dimensions whose source failed, in priority order.
    pub degraded: Vec<Dimension>,
}

impl AccountMetrics {
    pub fn is_degraded(&self, dimension: Dimension) -> bool {
        self.degraded.contains(&dimension)
    }
}

/// Parameters shared by every fetch for one account.
pub struct MetricQuery<'a> {
    pub ctx: &'a OrgContext,
    pub account_id: &'a str,
    pub now: DateTime<Utc>,
    pub params: &'a ScoringParams,
}

impl MetricQuery<'_> {
    pub fn since(&self, days: i64) -> DateTime<Utc> {
        self.now - Duration::days(days)
    }
}

/// Where raw signals come from. Implementations report a failure as
/// [`HealthError::DataUnavailable`]; any error is treated as unavailability.
pub trait MetricSource {
    fn engagement(&self, q: &MetricQuery) -> Result<EngagementFacts, HealthError>;
    fn support(&self, q: &MetricQuery) -> Result<TicketCounts, HealthError>;
    fn relationship(&self, q: &MetricQuery) -> Result<RelationshipFacts, HealthError>;
    fn financial(&self, q: &MetricQuery) -> Result<InvoiceTotals, HealthError>;
    fn adoption(&self, q: &MetricQuery) -> Result<UsageSummary, HealthError>;
}

/// Fetch all five dimensions, degrading the ones whose source fails.
pub fn gather_metrics(source: &dyn MetricSource, q: &MetricQuery) -> AccountMetrics {
    let mut metrics = AccountMetrics::default();

    metrics.engagement = degrade(source.engagement(q), Dimension::Engagement, q, &mut metrics.degraded);
    metrics.support = degrade(source.support(q), Dimension::Support, q, &mut metrics.degraded);
    metrics.relationship =
        degrade(source.relationship(q), Dimension::Relationship, q, &mut metrics.degraded);
    metrics.financial = degrade(source.financial(q), Dimension::Financial, q, &mut metrics.degraded);
    metrics.adoption = degrade(source.adoption(q), Dimension::Adoption, q, &mut metrics.degraded);

    metrics
}

fn degrade<T>(
    result: Result<T, HealthError>,
    dimension: Dimension,
    q: &MetricQuery,
    degraded: &mut Vec<Dimension>,
) -> Option<T> {
    match result {
        Ok(facts) => Some(facts),
        Err(e) => {
            log::warn!(
                "Health metrics for {}/{}: {} degraded: {}",
                q.ctx.org_id,
                q.account_id,
                dimension,
                e
            );
            degraded.push(dimension);
            None
        }
    }
}

/// SQLite-backed source reading the activity tables.
pub struct DbMetricSource<'a> {
    db: &'a HealthDb,
}

impl<'a> DbMetricSource<'a> {
    pub fn new(db: &'a HealthDb) -> Self {
        Self { db }
    }
}

fn unavailable(dimension: Dimension) -> impl Fn(crate::db::DbError) -> HealthError {
    move |e| HealthError::DataUnavailable {
        dimension,
        detail: e.to_string(),
    }
}

impl MetricSource for DbMetricSource<'_> {
    fn engagement(&self, q: &MetricQuery) -> Result<EngagementFacts, HealthError> {
        let org = q.ctx.org_id.as_str();
        let last_login_at = self
            .db
            .last_login_at(org, q.account_id)
            .map_err(unavailable(Dimension::Engagement))?;
        let logins_in_window = self
            .db
            .count_logins_since(org, q.account_id, q.since(q.params.login_lookback_days))
            .map_err(unavailable(Dimension::Engagement))?;
        Ok(EngagementFacts {
            last_login_at,
            logins_in_window,
        })
    }

    fn support(&self, q: &MetricQuery) -> Result<TicketCounts, HealthError> {
        self.db
            .ticket_counts(&q.ctx.org_id, q.account_id)
            .map_err(unavailable(Dimension::Support))
    }

    fn relationship(&self, q: &MetricQuery) -> Result<RelationshipFacts, HealthError> {
        let org = q.ctx.org_id.as_str();
        Ok(RelationshipFacts {
            last_contact_at: self
                .db
                .last_contact_at(org, q.account_id)
                .map_err(unavailable(Dimension::Relationship))?,
            last_meeting_at: self
                .db
                .last_meeting_at(org, q.account_id)
                .map_err(unavailable(Dimension::Relationship))?,
        })
    }

    fn financial(&self, q: &MetricQuery) -> Result<InvoiceTotals, HealthError> {
        self.db
            .invoice_totals(
                &q.ctx.org_id,
                q.account_id,
                q.since(q.params.invoice_lookback_days),
                q.now,
            )
            .map_err(unavailable(Dimension::Financial))
    }

    fn adoption(&self, q: &MetricQuery) -> Result<UsageSummary, HealthError> {
        self.db
            .usage_summary(&q.ctx.org_id, q.account_id, q.since(q.params.usage_lookback_days))
            .map_err(unavailable(Dimension::Adoption))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Fixed facts, with optional per-dimension failure.
    #[derive(Default, Clone)]
    pub struct StaticSource {
        pub metrics: AccountMetrics,
        pub failing: Vec<Dimension>,
    }

    impl StaticSource {
        fn check(&self, dimension: Dimension) -> Result<(), HealthError> {
            if self.failing.contains(&dimension) {
                Err(HealthError::DataUnavailable {
                    dimension,
                    detail: "source offline".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    impl MetricSource for StaticSource {
        fn engagement(&self, _q: &MetricQuery) -> Result<EngagementFacts, HealthError> {
            self.check(Dimension::Engagement)?;
            Ok(self.metrics.engagement.clone().unwrap_or_default())
        }
        fn support(&self, _q: &MetricQuery) -> Result<TicketCounts, HealthError> {
            self.check(Dimension::Support)?;
            Ok(self.metrics.support.unwrap_or_default())
        }
        fn relationship(&self, _q: &MetricQuery) -> Result<RelationshipFacts, HealthError> {
            self.check(Dimension::Relationship)?;
            Ok(self.metrics.relationship.clone().unwrap_or_default())
        }
        fn financial(&self, _q: &MetricQuery) -> Result<InvoiceTotals, HealthError> {
            self.check(Dimension::Financial)?;
            Ok(self.metrics.financial.unwrap_or_default())
        }
        fn adoption(&self, _q: &MetricQuery) -> Result<UsageSummary, HealthError> {
            self.check(Dimension::Adoption)?;
            Ok(self.metrics.adoption.clone().unwrap_or_default())
        }
    }
}
