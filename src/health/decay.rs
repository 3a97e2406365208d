//! Temporal decay for recency-based scoring (pure math, no DB).

use chrono::{DateTime, Utc};

/// Exponential half-life decay: `base * 2^(-age_days / half_life_days)`.
pub fn decayed_weight(base_weight: f64, age_days: f64, half_life_days: f64) -> f64 {
    if half_life_days <= 0.0 || age_days < 0.0 {
        return base_weight;
    }
    base_weight * (2.0_f64).powf(-age_days / half_life_days)
}

/// Parse an RFC3339 or SQLite `datetime()` timestamp.
pub fn parse_timestamp(ts: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(ts, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Fractional days from `ts` to `now`, floored at zero. `None` if unparseable.
pub fn age_days(ts: &str, now: DateTime<Utc>) -> Option<f64> {
    let parsed = parse_timestamp(ts)?;
    let secs = (now - parsed).num_seconds() as f64;
    Some((secs / 86400.0).max(0.0))
}

/// Whole days from `ts` to `now`, floored at zero.
pub fn whole_days(ts: &str, now: DateTime<Utc>) -> Option<i64> {
    let parsed = parse_timestamp(ts)?;
    Some((now - parsed).num_days().max(0))
}

/// Recency score on a 0–100 scale for an event `ts` ago.
pub fn recency_score(ts: &str, now: DateTime<Utc>, half_life_days: f64) -> Option<f64> {
    age_days(ts, now).map(|age| decayed_weight(100.0, age, half_life_days))
}
