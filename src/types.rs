use std::fmt;

use serde::{Deserialize, Serialize};

// =============================================================================
// Configuration
// =============================================================================

/// Top-level configuration, loaded from `~/.crmhealth/config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Explicit database path. Defaults to `~/.crmhealth/crmhealth.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,
    /// SQLCipher key. `CRMHEALTH_DB_KEY` takes precedence when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_key: Option<String>,
    /// Organization used by the CLI and MCP server when none is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_org_id: Option<String>,
    /// Audit trail directory. Defaults to `~/.crmhealth/_audit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_dir: Option<String>,
    #[serde(default = "default_audit_retention_days")]
    pub audit_retention_days: u32,
    #[serde(default)]
    pub health: HealthConfig,
}

fn default_audit_retention_days() -> u32 {
    30
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            db_key: None,
            default_org_id: None,
            audit_dir: None,
            audit_retention_days: default_audit_retention_days(),
            health: HealthConfig::default(),
        }
    }
}

/// Everything that shapes a health computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    #[serde(default)]
    pub weights: DimensionWeights,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    #[serde(default)]
    pub missing_data: MissingDataPolicy,
    #[serde(default)]
    pub previous_score: PreviousScorePolicy,
    #[serde(default)]
    pub scoring: ScoringParams,
    #[serde(default)]
    pub reasons: ReasonThresholds,
}

impl HealthConfig {
    /// Reject configurations that would break score or bucket invariants.
    pub fn validate(&self) -> Result<(), String> {
        self.thresholds.validate()?;
        self.weights.validate()?;
        self.scoring.validate()?;
        Ok(())
    }
}

/// Relative weight of each dimension in the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DimensionWeights {
    pub engagement: f64,
    pub support: f64,
    pub relationship: f64,
    pub financial: f64,
    pub adoption: f64,
}

impl Default for DimensionWeights {
    fn default() -> Self {
        Self {
            engagement: 1.0,
            support: 1.0,
            relationship: 1.0,
            financial: 1.0,
            adoption: 1.0,
        }
    }
}

impl DimensionWeights {
    pub fn weight(&self, dimension: Dimension) -> f64 {
        match dimension {
            Dimension::Engagement => self.engagement,
            Dimension::Support => self.support,
            Dimension::Relationship => self.relationship,
            Dimension::Financial => self.financial,
            Dimension::Adoption => self.adoption,
        }
    }

    fn validate(&self) -> Result<(), String> {
        for dim in Dimension::ALL {
            let w = self.weight(dim);
            if !w.is_finite() || w < 0.0 {
                return Err(format!("Weight for {} must be a non-negative number, got {}", dim, w));
            }
        }
        Ok(())
    }
}

/// Score boundaries for the risk buckets.
///
/// `score >= low_min` is LOW, `>= medium_min` MEDIUM, `>= critical_below`
/// HIGH, anything lower CRITICAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RiskThresholds {
    pub low_min: u8,
    pub medium_min: u8,
    pub critical_below: u8,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low_min: 70,
            medium_min: 40,
            critical_below: 20,
        }
    }
}

impl RiskThresholds {
    pub fn validate(&self) -> Result<(), String> {
        if self.low_min > 100 {
            return Err(format!("lowMin must be <= 100, got {}", self.low_min));
        }
        if !(self.critical_below <= self.medium_min && self.medium_min <= self.low_min) {
            return Err(format!(
                "Risk thresholds must satisfy criticalBelow <= mediumMin <= lowMin (got {} / {} / {})",
                self.critical_below, self.medium_min, self.low_min
            ));
        }
        Ok(())
    }
}

/// How a dimension with no usable facts is scored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MissingDataPolicy {
    /// Score 50.
    #[default]
    Neutral,
    /// Score 0.
    WorstCase,
}

impl MissingDataPolicy {
    pub fn score(self) -> u8 {
        match self {
            MissingDataPolicy::Neutral => 50,
            MissingDataPolicy::WorstCase => 0,
        }
    }
}

/// When an existing score moves into `previous_score`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PreviousScorePolicy {
    /// Every recalculation of an existing row shifts the stored score.
    #[default]
    ShiftAlways,
    /// Only a recalculation that changes the score shifts it.
    ShiftOnChange,
}

/// Curve shapes and windows for the component scorers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringParams {
    pub login_half_life_days: f64,
    pub login_lookback_days: i64,
    pub expected_logins: u32,
    pub contact_half_life_days: f64,
    pub meeting_half_life_days: f64,
    pub free_open_tickets: u32,
    pub open_ticket_penalty: f64,
    pub urgent_ticket_penalty: f64,
    pub invoice_lookback_days: i64,
    pub overdue_invoice_penalty: f64,
    pub usage_lookback_days: i64,
    pub usage_half_life_days: f64,
    pub expected_features: u32,
}

impl Default for ScoringParams {
    fn default() -> Self {
        Self {
            login_half_life_days: 14.0,
            login_lookback_days: 30,
            expected_logins: 12,
            contact_half_life_days: 21.0,
            meeting_half_life_days: 45.0,
            free_open_tickets: 2,
            open_ticket_penalty: 15.0,
            urgent_ticket_penalty: 10.0,
            invoice_lookback_days: 180,
            overdue_invoice_penalty: 20.0,
            usage_lookback_days: 30,
            usage_half_life_days: 14.0,
            expected_features: 5,
        }
    }
}

impl ScoringParams {
    fn validate(&self) -> Result<(), String> {
        let half_lives = [
            ("loginHalfLifeDays", self.login_half_life_days),
            ("contactHalfLifeDays", self.contact_half_life_days),
            ("meetingHalfLifeDays", self.meeting_half_life_days),
            ("usageHalfLifeDays", self.usage_half_life_days),
        ];
        for (name, value) in half_lives {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be positive, got {}", name, value));
            }
        }
        let windows = [
            ("loginLookbackDays", self.login_lookback_days),
            ("invoiceLookbackDays", self.invoice_lookback_days),
            ("usageLookbackDays", self.usage_lookback_days),
        ];
        for (name, value) in windows {
            if value <= 0 {
                return Err(format!("{} must be positive, got {}", name, value));
            }
        }
        Ok(())
    }
}

/// Per-dimension thresholds that turn weak signals into risk reasons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReasonThresholds {
    pub login_stale_days: i64,
    pub contact_stale_days: i64,
    pub meeting_stale_days: i64,
    pub ticket_alert_count: u32,
    pub low_adoption_score: u8,
}

impl Default for ReasonThresholds {
    fn default() -> Self {
        Self {
            login_stale_days: 30,
            contact_stale_days: 30,
            meeting_stale_days: 60,
            ticket_alert_count: 3,
            low_adoption_score: 40,
        }
    }
}

// =============================================================================
// Tenancy
// =============================================================================

/// Tenant boundary plus the actor recorded in the audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgContext {
    pub org_id: String,
    pub actor: Option<String>,
}

impl OrgContext {
    pub fn new(org_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn actor_label(&self) -> &str {
        self.actor.as_deref().unwrap_or("system")
    }
}

// =============================================================================
// Health model
// =============================================================================

/// One of the five scored dimensions, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Engagement,
    Support,
    Relationship,
    Financial,
    Adoption,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Engagement,
        Dimension::Support,
        Dimension::Relationship,
        Dimension::Financial,
        Dimension::Adoption,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Engagement => "engagement",
            Dimension::Support => "support",
            Dimension::Relationship => "relationship",
            Dimension::Financial => "financial",
            Dimension::Adoption => "adoption",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Dimension::ALL.into_iter().find(|d| d.as_str() == s)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse risk bucket. Ordered from least to most risky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "LOW" => Some(RiskLevel::Low),
            "MEDIUM" => Some(RiskLevel::Medium),
            "HIGH" => Some(RiskLevel::High),
            "CRITICAL" => Some(RiskLevel::Critical),
            _ => None,
        }
    }

    pub fn is_at_risk(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// The five 0–100 sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubScores {
    pub engagement: u8,
    pub support: u8,
    pub relationship: u8,
    pub financial: u8,
    pub adoption: u8,
}

impl SubScores {
    pub fn get(&self, dimension: Dimension) -> u8 {
        match dimension {
            Dimension::Engagement => self.engagement,
            Dimension::Support => self.support,
            Dimension::Relationship => self.relationship,
            Dimension::Financial => self.financial,
            Dimension::Adoption => self.adoption,
        }
    }

    pub fn uniform(score: u8) -> Self {
        Self {
            engagement: score,
            support: score,
            relationship: score,
            financial: score,
            adoption: score,
        }
    }
}

/// Why an account is flagged. Stored as tagged JSON, rendered for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RiskReason {
    #[serde(rename_all = "camelCase")]
    NoRecentLogin { days: Option<i64> },
    #[serde(rename_all = "camelCase")]
    OpenTickets { count: u32 },
    #[serde(rename_all = "camelCase")]
    UrgentTickets { count: u32 },
    #[serde(rename_all = "camelCase")]
    NoRecentContact { days: Option<i64> },
    #[serde(rename_all = "camelCase")]
    NoRecentMeeting { days: Option<i64> },
    #[serde(rename_all = "camelCase")]
    OverdueInvoices { count: u32 },
    #[serde(rename_all = "camelCase")]
    LowAdoption { features_used: u32, expected: u32 },
    #[serde(rename_all = "camelCase")]
    DataUnavailable { dimension: Dimension },
}

impl RiskReason {
    /// Dimension this reason belongs to; drives reason ordering.
    pub fn dimension(&self) -> Dimension {
        match self {
            RiskReason::NoRecentLogin { .. } => Dimension::Engagement,
            RiskReason::OpenTickets { .. } | RiskReason::UrgentTickets { .. } => Dimension::Support,
            RiskReason::NoRecentContact { .. } | RiskReason::NoRecentMeeting { .. } => {
                Dimension::Relationship
            }
            RiskReason::OverdueInvoices { .. } => Dimension::Financial,
            RiskReason::LowAdoption { .. } => Dimension::Adoption,
            RiskReason::DataUnavailable { dimension } => *dimension,
        }
    }
}

fn plural(count: u32, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

impl fmt::Display for RiskReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskReason::NoRecentLogin { days: Some(d) } => write!(f, "No login in {} days", d),
            RiskReason::NoRecentLogin { days: None } => f.write_str("No recorded logins"),
            RiskReason::OpenTickets { count } => {
                f.write_str(&plural(*count, "open ticket", "open tickets"))
            }
            RiskReason::UrgentTickets { count } => {
                f.write_str(&plural(*count, "urgent ticket open", "urgent tickets open"))
            }
            RiskReason::NoRecentContact { days: Some(d) } => write!(f, "No contact in {} days", d),
            RiskReason::NoRecentContact { days: None } => f.write_str("No recorded contact"),
            RiskReason::NoRecentMeeting { days: Some(d) } => write!(f, "No meeting in {} days", d),
            RiskReason::NoRecentMeeting { days: None } => f.write_str("No recorded meetings"),
            RiskReason::OverdueInvoices { count } => {
                f.write_str(&plural(*count, "overdue invoice", "overdue invoices"))
            }
            RiskReason::LowAdoption {
                features_used,
                expected,
            } => write!(f, "Using {} of {} key features", features_used, expected),
            RiskReason::DataUnavailable { dimension } => {
                write!(f, "{} data unavailable", capitalize(dimension.as_str()))
            }
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_uppercase().to_string() + chars.as_str(),
        None => String::new(),
    }
}

/// Result of scoring one account, as persisted and returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountHealth {
    pub org_id: String,
    pub account_id: String,
    pub score: u8,
    pub previous_score: Option<u8>,
    pub sub_scores: SubScores,
    pub risk_level: RiskLevel,
    pub is_at_risk: bool,
    pub risk_reasons: Vec<RiskReason>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_dimensions: Vec<Dimension>,
    pub last_login_at: Option<String>,
    pub last_contact_at: Option<String>,
    pub last_meeting_at: Option<String>,
    pub open_ticket_count: u32,
    pub calculated_at: String,
    pub updated_at: String,
}

impl AccountHealth {
    /// Display strings for the risk reasons, in order.
    pub fn risk_reason_messages(&self) -> Vec<String> {
        self.risk_reasons.iter().map(|r| r.to_string()).collect()
    }

    /// Signed change since the previous calculation, if one exists.
    pub fn trend(&self) -> Option<i16> {
        self.previous_score
            .map(|prev| self.score as i16 - prev as i16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_validate() {
        assert!(RiskThresholds::default().validate().is_ok());
    }

    #[test]
    fn test_thresholds_reject_inverted_order() {
        let t = RiskThresholds {
            low_min: 40,
            medium_min: 70,
            critical_below: 20,
        };
        assert!(t.validate().is_err());
    }

    #[test]
    fn test_weights_reject_negative() {
        let cfg = HealthConfig {
            weights: DimensionWeights {
                support: -1.0,
                ..DimensionWeights::default()
            },
            ..HealthConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_risk_level_at_risk() {
        assert!(!RiskLevel::Low.is_at_risk());
        assert!(!RiskLevel::Medium.is_at_risk());
        assert!(RiskLevel::High.is_at_risk());
        assert!(RiskLevel::Critical.is_at_risk());
    }

    #[test]
    fn test_risk_level_round_trips_through_str() {
        for level in [RiskLevel::Low, RiskLevel::Medium, RiskLevel::High, RiskLevel::Critical] {
            assert_eq!(RiskLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(RiskLevel::parse("low"), None);
    }

    #[test]
    fn test_reason_messages() {
        assert_eq!(
            RiskReason::NoRecentLogin { days: Some(45) }.to_string(),
            "No login in 45 days"
        );
        assert_eq!(RiskReason::OpenTickets { count: 3 }.to_string(), "3 open tickets");
        assert_eq!(RiskReason::OpenTickets { count: 1 }.to_string(), "1 open ticket");
        assert_eq!(
            RiskReason::DataUnavailable {
                dimension: Dimension::Financial
            }
            .to_string(),
            "Financial data unavailable"
        );
    }

    #[test]
    fn test_reason_json_is_tagged() {
        let json = serde_json::to_string(&RiskReason::OpenTickets { count: 4 }).unwrap();
        assert_eq!(json, r#"{"kind":"openTickets","count":4}"#);
        let back: RiskReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, RiskReason::OpenTickets { count: 4 });
    }

    #[test]
    fn test_config_parses_partial_json() {
        let cfg: Config = serde_json::from_str(
            r#"{ "defaultOrgId": "org-1", "health": { "thresholds": { "lowMin": 75, "mediumMin": 45, "criticalBelow": 25 } } }"#,
        )
        .unwrap();
        assert_eq!(cfg.default_org_id.as_deref(), Some("org-1"));
        assert_eq!(cfg.audit_retention_days, 30);
        assert_eq!(cfg.health.thresholds.critical_below, 25);
        assert_eq!(cfg.health.previous_score, PreviousScorePolicy::ShiftAlways);
        assert_eq!(cfg.health.scoring.expected_features, 5);
    }

    #[test]
    fn test_config_parses_single_threshold_and_weight() {
        let cfg: Config =
            serde_json::from_str(r#"{ "health": { "thresholds": { "criticalBelow": 10 } } }"#)
                .unwrap();
        assert_eq!(cfg.health.thresholds.critical_below, 10);
        assert_eq!(cfg.health.thresholds.low_min, 70);
        assert_eq!(cfg.health.thresholds.medium_min, 40);
        assert!(cfg.health.validate().is_ok());

        let cfg: Config =
            serde_json::from_str(r#"{ "health": { "weights": { "financial": 2.0 } } }"#).unwrap();
        assert_eq!(cfg.health.weights.financial, 2.0);
        assert_eq!(cfg.health.weights.engagement, 1.0);
        assert_eq!(cfg.health.weights.adoption, 1.0);
    }

    #[test]
    fn test_trend() {
        let h = AccountHealth {
            org_id: "o".into(),
            account_id: "a".into(),
            score: 62,
            previous_score: Some(70),
            sub_scores: SubScores::uniform(62),
            risk_level: RiskLevel::Medium,
            is_at_risk: false,
            risk_reasons: Vec::new(),
            degraded_dimensions: Vec::new(),
            last_login_at: None,
            last_contact_at: None,
            last_meeting_at: None,
            open_ticket_count: 0,
            calculated_at: String::new(),
            updated_at: String::new(),
        };
        assert_eq!(h.trend(), Some(-8));
    }
}
