//! Shared type definitions for the database layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("Corrupt row in {table}: {detail}")]
    CorruptRow { table: &'static str, detail: String },

    #[error("Invalid timestamp for {column}: '{value}'")]
    InvalidTimestamp { column: &'static str, value: String },
}

/// A row from the `organizations` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbOrganization {
    pub id: String,
    pub name: String,
    pub created_at: String,
}

/// A row from the `accounts` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbAccount {
    pub id: String,
    pub org_id: String,
    pub name: String,
    pub lifecycle: Option<String>,
    pub arr: Option<f64>,
    pub archived: bool,
    pub updated_at: String,
}

/// A row from `support_tickets`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTicket {
    pub id: String,
    pub org_id: String,
    pub account_id: String,
    pub subject: String,
    /// `open`, `pending`, or `closed`.
    pub status: String,
    /// `low`, `normal`, `high`, or `urgent`.
    pub priority: String,
    pub opened_at: String,
    pub closed_at: Option<String>,
}

/// A row from `invoices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbInvoice {
    pub id: String,
    pub org_id: String,
    pub account_id: String,
    pub amount: f64,
    pub issued_at: String,
    pub due_at: String,
    pub paid_at: Option<String>,
    /// `open`, `paid`, or `void`.
    pub status: String,
}

/// Aggregate ticket counts for one account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TicketCounts {
    pub open: u32,
    pub urgent_open: u32,
}

/// Aggregate invoice figures for one account within a lookback window.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InvoiceTotals {
    pub invoice_count: u32,
    pub billed: f64,
    pub paid: f64,
    pub overdue_count: u32,
}

/// Aggregate feature usage for one account within a lookback window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UsageSummary {
    pub distinct_features: u32,
    pub event_count: u32,
    pub last_used_at: Option<String>,
}

/// A row from `account_health`, with JSON columns still encoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DbAccountHealth {
    pub org_id: String,
    pub account_id: String,
    pub score: i64,
    pub previous_score: Option<i64>,
    pub engagement_score: i64,
    pub support_score: i64,
    pub relationship_score: i64,
    pub financial_score: i64,
    pub adoption_score: i64,
    pub risk_level: String,
    pub is_at_risk: bool,
    pub risk_reasons: String,
    pub degraded_dimensions: String,
    pub last_login_at: Option<String>,
    pub last_contact_at: Option<String>,
    pub last_meeting_at: Option<String>,
    pub open_ticket_count: i64,
    pub calculated_at: String,
    pub updated_at: String,
}

/// A row from `mcp_integrations`.
///
/// `credential` is plaintext inside the (SQLCipher-keyed) database and must
/// never be logged; the `Debug` impl redacts it.
#[derive(Clone)]
pub struct DbIntegration {
    pub id: String,
    pub org_id: String,
    pub name: String,
    /// `stdio` or `http`.
    pub transport: String,
    pub command: Option<String>,
    /// JSON array of arguments for `stdio` transports.
    pub args: String,
    pub url: Option<String>,
    pub credential: Option<String>,
    pub credential_env: Option<String>,
    pub credential_fingerprint: Option<String>,
    /// `disconnected`, `connected`, or `error`.
    pub status: String,
    pub last_error: Option<String>,
    /// JSON array of registered tool descriptors.
    pub tools: String,
    pub connected_at: Option<String>,
    pub updated_at: String,
}

impl std::fmt::Debug for DbIntegration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIntegration")
            .field("id", &self.id)
            .field("org_id", &self.org_id)
            .field("name", &self.name)
            .field("transport", &self.transport)
            .field("command", &self.command)
            .field("url", &self.url)
            .field("credential", &self.credential.as_ref().map(|_| "<redacted>"))
            .field("credential_fingerprint", &self.credential_fingerprint)
            .field("status", &self.status)
            .field("last_error", &self.last_error)
            .finish()
    }
}
