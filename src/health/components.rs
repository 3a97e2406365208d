//! Per-dimension scorers. Each maps raw facts to a 0–100 sub-score.
//!
//! Facts of `None` mean the source was unavailable; the missing-data policy
//! decides the score. A present-but-empty history (never logged in, never
//! billed) is also scored by the policy, except for tickets where zero open
//! tickets is a real, perfect result.

use chrono::{DateTime, Utc};

use crate::db::{InvoiceTotals, TicketCounts, UsageSummary};
use crate::health::decay::recency_score;
use crate::health::metrics::{AccountMetrics, EngagementFacts, RelationshipFacts};
use crate::types::{HealthConfig, MissingDataPolicy, ScoringParams, SubScores};

/// Clamp and round a raw score to the 0–100 range.
pub fn clamp_score(raw: f64) -> u8 {
    if raw.is_nan() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Last-login recency (70%) blended with login frequency in the window (30%).
pub fn engagement_score(
    facts: Option<&EngagementFacts>,
    params: &ScoringParams,
    missing: MissingDataPolicy,
    now: DateTime<Utc>,
) -> u8 {
    let Some(facts) = facts else {
        return missing.score();
    };
    let recency = facts
        .last_login_at
        .as_deref()
        .and_then(|ts| recency_score(ts, now, params.login_half_life_days));
    let Some(recency) = recency else {
        return missing.score();
    };
    let expected = params.expected_logins.max(1) as f64;
    let frequency = (facts.logins_in_window as f64 / expected).min(1.0) * 100.0;
    clamp_score(0.7 * recency + 0.3 * frequency)
}

/// Penalty per open ticket beyond the free allowance, plus per urgent ticket.
pub fn support_score(
    facts: Option<&TicketCounts>,
    params: &ScoringParams,
    missing: MissingDataPolicy,
) -> u8 {
    let Some(facts) = facts else {
        return missing.score();
    };
    let excess = facts.open.saturating_sub(params.free_open_tickets) as f64;
    let raw = 100.0
        - params.open_ticket_penalty * excess
        - params.urgent_ticket_penalty * facts.urgent_open as f64;
    clamp_score(raw)
}

/// Mean of contact and meeting recency; whichever is known if only one is.
pub fn relationship_score(
    facts: Option<&RelationshipFacts>,
    params: &ScoringParams,
    missing: MissingDataPolicy,
    now: DateTime<Utc>,
) -> u8 {
    let Some(facts) = facts else {
        return missing.score();
    };
    let contact = facts
        .last_contact_at
        .as_deref()
        .and_then(|ts| recency_score(ts, now, params.contact_half_life_days));
    let meeting = facts
        .last_meeting_at
        .as_deref()
        .and_then(|ts| recency_score(ts, now, params.meeting_half_life_days));
    match (contact, meeting) {
        (Some(c), Some(m)) => clamp_score((c + m) / 2.0),
        (Some(c), None) => clamp_score(c),
        (None, Some(m)) => clamp_score(m),
        (None, None) => missing.score(),
    }
}

/// Share of billed amount that is paid, less a penalty per overdue invoice.
pub fn financial_score(
    facts: Option<&InvoiceTotals>,
    params: &ScoringParams,
    missing: MissingDataPolicy,
) -> u8 {
    let Some(facts) = facts else {
        return missing.score();
    };
    if facts.invoice_count == 0 || facts.billed <= 0.0 {
        return missing.score();
    }
    let paid_ratio = (facts.paid / facts.billed).clamp(0.0, 1.0);
    clamp_score(100.0 * paid_ratio - params.overdue_invoice_penalty * facts.overdue_count as f64)
}

/// Feature breadth (80%) blended with usage recency (20%).
pub fn adoption_score(
    facts: Option<&UsageSummary>,
    params: &ScoringParams,
    missing: MissingDataPolicy,
    now: DateTime<Utc>,
) -> u8 {
    let Some(facts) = facts else {
        return missing.score();
    };
    if facts.event_count == 0 {
        return missing.score();
    }
    let expected = params.expected_features.max(1) as f64;
    let breadth = (facts.distinct_features as f64 / expected).min(1.0) * 100.0;
    let recency = facts
        .last_used_at
        .as_deref()
        .and_then(|ts| recency_score(ts, now, params.usage_half_life_days))
        .unwrap_or(0.0);
    clamp_score(0.8 * breadth + 0.2 * recency)
}

/// Score all five dimensions.
pub fn score_components(metrics: &AccountMetrics, config: &HealthConfig, now: DateTime<Utc>) -> SubScores {
    let params = &config.scoring;
    let missing = config.missing_data;
    SubScores {
        engagement: engagement_score(metrics.engagement.as_ref(), params, missing, now),
        support: support_score(metrics.support.as_ref(), params, missing),
        relationship: relationship_score(metrics.relationship.as_ref(), params, missing, now),
        financial: financial_score(metrics.financial.as_ref(), params, missing),
        adoption: adoption_score(metrics.adoption.as_ref(), params, missing, now),
    }
}
