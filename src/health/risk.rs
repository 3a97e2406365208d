//! Risk classification and reason generation.

use chrono::{DateTime, Utc};

use crate::health::decay::whole_days;
use crate::health::metrics::AccountMetrics;
use crate::types::{Dimension, HealthConfig, RiskLevel, RiskReason, RiskThresholds, SubScores};

/// Map a composite score to its bucket. Non-increasing risk as score rises.
pub fn classify(score: u8, thresholds: &RiskThresholds) -> RiskLevel {
    if score >= thresholds.low_min {
        RiskLevel::Low
    } else if score >= thresholds.medium_min {
        RiskLevel::Medium
    } else if score >= thresholds.critical_below {
        RiskLevel::High
    } else {
        RiskLevel::Critical
    }
}

/// Per-dimension threshold checks, emitted in dimension priority order.
///
/// A degraded dimension yields only `DataUnavailable` at its position.
pub fn risk_reasons(
    metrics: &AccountMetrics,
    sub_scores: &SubScores,
    config: &HealthConfig,
    now: DateTime<Utc>,
) -> Vec<RiskReason> {
    let mut reasons = Vec::new();
    for dimension in Dimension::ALL {
        if metrics.is_degraded(dimension) {
            reasons.push(RiskReason::DataUnavailable { dimension });
            continue;
        }
        match dimension {
            Dimension::Engagement => engagement_reasons(metrics, config, now, &mut reasons),
            Dimension::Support => support_reasons(metrics, config, &mut reasons),
            Dimension::Relationship => relationship_reasons(metrics, config, now, &mut reasons),
            Dimension::Financial => financial_reasons(metrics, &mut reasons),
            Dimension::Adoption => adoption_reasons(metrics, sub_scores, config, &mut reasons),
        }
    }
    reasons
}

/// `Some(None)` when there is no event at all, `Some(Some(days))` when the
/// event is stale, `None` when it is fresh.
fn staleness(last: Option<&str>, stale_days: i64, now: DateTime<Utc>) -> Option<Option<i64>> {
    match last.and_then(|ts| whole_days(ts, now)) {
        None => Some(None),
        Some(days) if days > stale_days => Some(Some(days)),
        Some(_) => None,
    }
}

fn engagement_reasons(
    metrics: &AccountMetrics,
    config: &HealthConfig,
    now: DateTime<Utc>,
    out: &mut Vec<RiskReason>,
) {
    let Some(facts) = metrics.engagement.as_ref() else {
        return;
    };
    if let Some(days) = staleness(
        facts.last_login_at.as_deref(),
        config.reasons.login_stale_days,
        now,
    ) {
        out.push(RiskReason::NoRecentLogin { days });
    }
}

fn support_reasons(metrics: &AccountMetrics, config: &HealthConfig, out: &mut Vec<RiskReason>) {
    let Some(tickets) = metrics.support.as_ref() else {
        return;
    };
    if tickets.open >= config.reasons.ticket_alert_count {
        out.push(RiskReason::OpenTickets {
            count: tickets.open,
        });
    }
    if tickets.urgent_open > 0 {
        out.push(RiskReason::UrgentTickets {
            count: tickets.urgent_open,
        });
    }
}

fn relationship_reasons(
    metrics: &AccountMetrics,
    config: &HealthConfig,
    now: DateTime<Utc>,
    out: &mut Vec<RiskReason>,
) {
    let Some(facts) = metrics.relationship.as_ref() else {
        return;
    };
    if let Some(days) = staleness(
        facts.last_contact_at.as_deref(),
        config.reasons.contact_stale_days,
        now,
    ) {
        out.push(RiskReason::NoRecentContact { days });
    }
    if let Some(days) = staleness(
        facts.last_meeting_at.as_deref(),
        config.reasons.meeting_stale_days,
        now,
    ) {
        out.push(RiskReason::NoRecentMeeting { days });
    }
}

fn financial_reasons(metrics: &AccountMetrics, out: &mut Vec<RiskReason>) {
    if let Some(invoices) = metrics.financial.as_ref() {
        if invoices.overdue_count > 0 {
            out.push(RiskReason::OverdueInvoices {
                count: invoices.overdue_count,
            });
        }
    }
}

fn adoption_reasons(
    metrics: &AccountMetrics,
    sub_scores: &SubScores,
    config: &HealthConfig,
    out: &mut Vec<RiskReason>,
) {
    if sub_scores.adoption >= config.reasons.low_adoption_score {
        return;
    }
    let features_used = metrics
        .adoption
        .as_ref()
        .map(|u| u.distinct_features)
        .unwrap_or(0);
    out.push(RiskReason::LowAdoption {
        features_used,
        expected: config.scoring.expected_features,
    });
}
