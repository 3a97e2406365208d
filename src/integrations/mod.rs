//! External MCP tool servers: definitions, connect/disconnect lifecycle, and
//! the registry of tools each live session advertises.
//!
//! The protocol client sits behind [`ToolTransport`]; [`TransportFactory`]
//! turns a persisted [`TransportSpec`] into a live transport. The production
//! factory is [`RmcpTransportFactory`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::DbError;

pub mod credential;
pub mod manager;
pub mod rmcp_transport;

pub use credential::{Credential, CredentialBinding};
pub use manager::{IntegrationInfo, IntegrationManager, RegisterIntegration};
pub use rmcp_transport::RmcpTransportFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Stdio,
    Http,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "stdio" => Some(TransportKind::Stdio),
            "http" => Some(TransportKind::Http),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an integration's MCP server lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportSpec {
    /// Spawned child process speaking MCP over stdio.
    Stdio { command: String, args: Vec<String> },
    /// Streamable HTTP endpoint.
    Http { url: String },
}

impl TransportSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            TransportSpec::Stdio { .. } => TransportKind::Stdio,
            TransportSpec::Http { .. } => TransportKind::Http,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationStatus {
    Disconnected,
    Connected,
    Error,
}

impl IntegrationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationStatus::Disconnected => "disconnected",
            IntegrationStatus::Connected => "connected",
            IntegrationStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disconnected" => Some(IntegrationStatus::Disconnected),
            "connected" => Some(IntegrationStatus::Connected),
            "error" => Some(IntegrationStatus::Error),
            _ => None,
        }
    }
}

/// A tool advertised by a connected integration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum IntegrationError {
    #[error("Integration {id} not found in organization {org_id}")]
    NotFound { org_id: String, id: String },

    #[error("Transport '{0}' is not supported")]
    UnsupportedTransport(TransportKind),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Tool call failed: {0}")]
    ToolCallFailed(String),

    #[error("Integration is already connected")]
    AlreadyConnected,

    #[error("Integration is not connected")]
    NotConnected,

    #[error("Invalid integration definition: {0}")]
    InvalidDefinition(String),

    #[error("Refusing to store a credential: the database is not encrypted (set dbKey or CRMHEALTH_DB_KEY)")]
    UnencryptedStore,

    #[error("Failed to persist integration: {0}")]
    Persistence(#[from] DbError),
}

/// A live session with one MCP server.
///
/// Shared as `Arc<dyn ToolTransport>`, so calls on one session may overlap.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, IntegrationError>;

    /// Call a tool and return its text content concatenated.
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, IntegrationError>;

    /// Close the session. Calls after this fail with `NotConnected`.
    async fn disconnect(&self);
}

/// Opens transports for persisted specs.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        spec: &TransportSpec,
        credential: Option<&CredentialBinding>,
    ) -> Result<Box<dyn ToolTransport>, IntegrationError>;
}
