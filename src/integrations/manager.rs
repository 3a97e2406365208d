//! Integration lifecycle: register, connect, list tools, call, disconnect.
//!
//! Live sessions sit in a `tokio::sync::Mutex` so connect and disconnect of
//! one integration are serialised. Tool calls clone the session handle out of
//! the map and await without the lock. The tool registry is a `DashMap` so
//! tool listings can be read without touching the sessions. The database lock
//! is never held across an `.await`.
//!
//! Credentials are only accepted when the database is SQLCipher-encrypted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::Mutex;

use super::credential::{is_valid_env_var, short_fingerprint};
use super::{
    Credential, CredentialBinding, IntegrationError, IntegrationStatus, ToolDescriptor,
    ToolTransport, TransportFactory, TransportKind, TransportSpec,
};
use crate::db::{timestamp, DbIntegration};
use crate::state::AppState;
use crate::types::OrgContext;

type SessionKey = (String, String);

fn key(ctx: &OrgContext, id: &str) -> SessionKey {
    (ctx.org_id.clone(), id.to_string())
}

/// Input for [`IntegrationManager::register`].
#[derive(Debug, Clone)]
pub struct RegisterIntegration {
    pub id: String,
    pub name: String,
    pub transport: TransportSpec,
    pub credential: Option<Credential>,
    /// Environment variable the credential is exposed through.
    pub credential_env: Option<String>,
}

/// What callers see about an integration. Never includes the credential.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationInfo {
    pub id: String,
    pub name: String,
    pub transport: TransportKind,
    pub status: IntegrationStatus,
    pub last_error: Option<String>,
    pub credential_fingerprint: Option<String>,
    pub tool_count: usize,
    pub connected_at: Option<String>,
}

pub struct IntegrationManager {
    state: Arc<AppState>,
    factory: Box<dyn TransportFactory>,
    sessions: Mutex<HashMap<SessionKey, Arc<dyn ToolTransport>>>,
    registry: DashMap<SessionKey, Vec<ToolDescriptor>>,
}

impl IntegrationManager {
    pub fn new(state: Arc<AppState>, factory: Box<dyn TransportFactory>) -> Self {
        Self {
            state,
            factory,
            sessions: Mutex::new(HashMap::new()),
            registry: DashMap::new(),
        }
    }

    /// Create or replace an integration definition.
    ///
    /// Rejected while the integration is connected, and when it carries a
    /// credential but the database is not encrypted.
    pub async fn register(
        &self,
        ctx: &OrgContext,
        request: RegisterIntegration,
    ) -> Result<IntegrationInfo, IntegrationError> {
        validate(&request)?;

        let sessions = self.sessions.lock().await;
        if sessions.contains_key(&key(ctx, &request.id)) {
            return Err(IntegrationError::AlreadyConnected);
        }

        let (command, args, url) = match &request.transport {
            TransportSpec::Stdio { command, args } => (
                Some(command.clone()),
                serde_json::to_string(args)
                    .map_err(|e| IntegrationError::InvalidDefinition(e.to_string()))?,
                None,
            ),
            TransportSpec::Http { url } => (None, "[]".to_string(), Some(url.clone())),
        };

        let row = DbIntegration {
            id: request.id.clone(),
            org_id: ctx.org_id.clone(),
            name: request.name.clone(),
            transport: request.transport.kind().as_str().to_string(),
            command,
            args,
            url,
            credential: request.credential.as_ref().map(|c| c.expose().to_string()),
            credential_env: request.credential_env.clone(),
            credential_fingerprint: request.credential.as_ref().map(|c| c.fingerprint()),
            status: IntegrationStatus::Disconnected.as_str().to_string(),
            last_error: None,
            tools: "[]".to_string(),
            connected_at: None,
            updated_at: timestamp(Utc::now()),
        };

        {
            let db = self.state.db.lock();
            if row.credential.is_some() && !db.is_encrypted() {
                return Err(IntegrationError::UnencryptedStore);
            }
            db.upsert_integration(&row)?;
        }
        drop(sessions);

        log::info!(
            "Registered integration {}/{} ({}) by {}",
            ctx.org_id,
            row.id,
            row.transport,
            ctx.actor_label()
        );
        Ok(self.info_from_row(&row))
    }

    /// Open a session and register the tools it advertises.
    pub async fn connect(
        &self,
        ctx: &OrgContext,
        id: &str,
    ) -> Result<Vec<ToolDescriptor>, IntegrationError> {
        let k = key(ctx, id);
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&k) {
            return Err(IntegrationError::AlreadyConnected);
        }

        let row = self.load(ctx, id)?;
        let spec = spec_from_row(&row)?;
        let binding = binding_from_row(&row);

        let connected = self.factory.connect(&spec, binding.as_ref()).await;
        let transport: Arc<dyn ToolTransport> = match connected {
            Ok(t) => Arc::from(t),
            Err(e) => {
                self.record_error(ctx, id, &e);
                return Err(e);
            }
        };

        let tools = match transport.list_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                transport.disconnect().await;
                self.record_error(ctx, id, &e);
                return Err(e);
            }
        };

        if let Err(e) = self.persist_connected(ctx, id, &tools) {
            transport.disconnect().await;
            self.record_error(ctx, id, &e);
            return Err(e);
        }

        log::info!(
            "Connected integration {}/{} with {} tools",
            ctx.org_id,
            id,
            tools.len()
        );
        self.registry.insert(k.clone(), tools.clone());
        sessions.insert(k, transport);
        Ok(tools)
    }

    /// Close the session and clear its tools.
    pub async fn disconnect(&self, ctx: &OrgContext, id: &str) -> Result<(), IntegrationError> {
        let k = key(ctx, id);
        let mut sessions = self.sessions.lock().await;
        let transport = sessions.remove(&k).ok_or(IntegrationError::NotConnected)?;
        self.registry.remove(&k);
        transport.disconnect().await;
        drop(sessions);

        let db = self.state.db.lock();
        db.mark_integration_disconnected(&ctx.org_id, id, Utc::now())?;
        log::info!("Disconnected integration {}/{}", ctx.org_id, id);
        Ok(())
    }

    /// Tools of a connected integration.
    pub fn tools(&self, ctx: &OrgContext, id: &str) -> Result<Vec<ToolDescriptor>, IntegrationError> {
        self.registry
            .get(&key(ctx, id))
            .map(|entry| entry.value().clone())
            .ok_or(IntegrationError::NotConnected)
    }

    /// Call a registered tool on a connected integration.
    pub async fn call_tool(
        &self,
        ctx: &OrgContext,
        id: &str,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<String, IntegrationError> {
        let k = key(ctx, id);
        let known = self
            .registry
            .get(&k)
            .map(|entry| entry.value().iter().any(|t| t.name == tool))
            .ok_or(IntegrationError::NotConnected)?;
        if !known {
            return Err(IntegrationError::ToolCallFailed(format!(
                "Unknown tool '{}' on integration {}",
                tool, id
            )));
        }

        let transport = {
            let sessions = self.sessions.lock().await;
            sessions.get(&k).cloned().ok_or(IntegrationError::NotConnected)?
        };
        transport.call_tool(tool, arguments).await
    }

    /// Every integration of the tenant, with live session state applied.
    pub async fn list(&self, ctx: &OrgContext) -> Result<Vec<IntegrationInfo>, IntegrationError> {
        let rows = {
            let db = self.state.db.lock();
            db.list_integrations(&ctx.org_id)?
        };
        Ok(rows.iter().map(|r| self.info_from_row(r)).collect())
    }

    /// Delete an integration, disconnecting it first if needed.
    pub async fn remove(&self, ctx: &OrgContext, id: &str) -> Result<(), IntegrationError> {
        match self.disconnect(ctx, id).await {
            Ok(()) | Err(IntegrationError::NotConnected) => {}
            Err(e) => return Err(e),
        }
        let db = self.state.db.lock();
        if !db.delete_integration(&ctx.org_id, id)? {
            return Err(IntegrationError::NotFound {
                org_id: ctx.org_id.clone(),
                id: id.to_string(),
            });
        }
        Ok(())
    }

    fn load(&self, ctx: &OrgContext, id: &str) -> Result<DbIntegration, IntegrationError> {
        let db = self.state.db.lock();
        db.get_integration(&ctx.org_id, id)?
            .ok_or_else(|| IntegrationError::NotFound {
                org_id: ctx.org_id.clone(),
                id: id.to_string(),
            })
    }

    fn persist_connected(
        &self,
        ctx: &OrgContext,
        id: &str,
        tools: &[ToolDescriptor],
    ) -> Result<(), IntegrationError> {
        let tools_json = serde_json::to_string(tools)
            .map_err(|e| IntegrationError::ConnectionFailed(e.to_string()))?;
        let db = self.state.db.lock();
        db.mark_integration_connected(&ctx.org_id, id, &tools_json, Utc::now())?;
        Ok(())
    }

    fn record_error(&self, ctx: &OrgContext, id: &str, err: &IntegrationError) {
        log::warn!("Integration {}/{} failed to connect: {}", ctx.org_id, id, err);
        let db = self.state.db.lock();
        if let Err(e) = db.mark_integration_error(&ctx.org_id, id, &err.to_string(), Utc::now()) {
            log::warn!("Could not record integration error for {}: {}", id, e);
        }
    }

    fn info_from_row(&self, row: &DbIntegration) -> IntegrationInfo {
        let k = (row.org_id.clone(), row.id.clone());
        let live_tools = self.registry.get(&k).map(|e| e.value().len());
        // A row marked connected by an earlier process has no live session here.
        let status = match (IntegrationStatus::parse(&row.status), live_tools) {
            (_, Some(_)) => IntegrationStatus::Connected,
            (Some(IntegrationStatus::Connected), None) | (None, None) => {
                IntegrationStatus::Disconnected
            }
            (Some(s), None) => s,
        };
        IntegrationInfo {
            id: row.id.clone(),
            name: row.name.clone(),
            transport: TransportKind::parse(&row.transport).unwrap_or(TransportKind::Stdio),
            status,
            last_error: row.last_error.clone(),
            credential_fingerprint: row.credential_fingerprint.as_deref().map(short_fingerprint),
            tool_count: live_tools.unwrap_or(0),
            connected_at: live_tools.and(row.connected_at.clone()),
        }
    }
}

fn validate(request: &RegisterIntegration) -> Result<(), IntegrationError> {
    if request.id.trim().is_empty() {
        return Err(IntegrationError::InvalidDefinition("id is empty".to_string()));
    }
    match &request.transport {
        TransportSpec::Stdio { command, .. } if command.trim().is_empty() => {
            return Err(IntegrationError::InvalidDefinition(
                "stdio transport needs a command".to_string(),
            ))
        }
        TransportSpec::Http { url } if url.trim().is_empty() => {
            return Err(IntegrationError::InvalidDefinition(
                "http transport needs a url".to_string(),
            ))
        }
        _ => {}
    }
    match (&request.credential, request.credential_env.as_deref()) {
        (Some(_), None) => Err(IntegrationError::InvalidDefinition(
            "a credential needs credentialEnv".to_string(),
        )),
        (_, Some(env)) if !is_valid_env_var(env) => Err(IntegrationError::InvalidDefinition(
            format!("'{}' is not a valid environment variable name", env),
        )),
        _ => Ok(()),
    }
}

fn spec_from_row(row: &DbIntegration) -> Result<TransportSpec, IntegrationError> {
    let corrupt = |detail: String| IntegrationError::InvalidDefinition(format!("{}: {}", row.id, detail));
    match TransportKind::parse(&row.transport) {
        Some(TransportKind::Stdio) => {
            let command = row
                .command
                .clone()
                .ok_or_else(|| corrupt("missing command".to_string()))?;
            let args: Vec<String> =
                serde_json::from_str(&row.args).map_err(|e| corrupt(format!("args: {}", e)))?;
            Ok(TransportSpec::Stdio { command, args })
        }
        Some(TransportKind::Http) => Ok(TransportSpec::Http {
            url: row.url.clone().ok_or_else(|| corrupt("missing url".to_string()))?,
        }),
        None => Err(corrupt(format!("unknown transport '{}'", row.transport))),
    }
}

fn binding_from_row(row: &DbIntegration) -> Option<CredentialBinding> {
    match (&row.credential, &row.credential_env) {
        (Some(secret), Some(env_var)) => Some(CredentialBinding {
            env_var: env_var.clone(),
            credential: Credential::new(secret.clone()),
        }),
        _ => None,
    }
}
