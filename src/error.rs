//! Error types for health recalculation
//!
//! Errors are classified by how the caller should react:
//! - NotFound / InvalidConfig: fix the request or the config
//! - Persistence: surfaced as-is, never retried automatically
//! - DataUnavailable: produced by metric sources and absorbed as a degraded dimension

use thiserror::Error;

use crate::db::DbError;
use crate::types::Dimension;

#[derive(Debug, Error)]
pub enum HealthError {
    #[error("Account {account_id} not found in organization {org_id}")]
    NotFound { org_id: String, account_id: String },

    #[error("{dimension} data unavailable: {detail}")]
    DataUnavailable { dimension: Dimension, detail: String },

    #[error("Failed to persist account health: {0}")]
    Persistence(#[from] DbError),

    #[error("Invalid health configuration: {0}")]
    InvalidConfig(String),

    #[error("Database is not available: {0}")]
    DatabaseUnavailable(String),
}

impl HealthError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HealthError::Persistence(_) | HealthError::DatabaseUnavailable(_)
        )
    }

    /// Get a user-friendly recovery suggestion
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            HealthError::NotFound { .. } => "Check the account ID and organization.",
            HealthError::DataUnavailable { .. } => "The affected dimension was scored as missing data.",
            HealthError::Persistence(_) => "The score was not saved. Try the recalculation again.",
            HealthError::InvalidConfig(_) => "Check the health section of ~/.crmhealth/config.json",
            HealthError::DatabaseUnavailable(_) => "Check dbPath and dbKey in ~/.crmhealth/config.json",
        }
    }
}

/// Serializable error representation for the CLI and MCP surfaces.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandError {
    pub message: String,
    pub error_type: ErrorType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorType {
    NotFound,
    Retryable,
    NonRetryable,
}

impl From<&HealthError> for CommandError {
    fn from(err: &HealthError) -> Self {
        let error_type = match err {
            HealthError::NotFound { .. } => ErrorType::NotFound,
            e if e.is_retryable() => ErrorType::Retryable,
            _ => ErrorType::NonRetryable,
        };
        CommandError {
            message: err.to_string(),
            error_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}
