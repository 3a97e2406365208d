//! crmhealth MCP server: exposes account health tools over stdio.
//!
//! Build: `cargo build --features mcp --bin crmhealth-mcp`
//! Logs go to stderr; stdout carries only the protocol stream.

use std::sync::Arc;

use rmcp::model::*;
use rmcp::schemars::JsonSchema;
use rmcp::{tool, ServerHandler, ServiceExt};
use serde::{Deserialize, Serialize};

use crmhealth_lib::error::{CommandError, HealthError};
use crmhealth_lib::services::health as health_service;
use crmhealth_lib::state::{load_config, AppState};
use crmhealth_lib::types::{AccountHealth, OrgContext};

const ACTOR: &str = "mcp";

// =============================================================================
// Server State
// =============================================================================

#[derive(Clone)]
struct CrmHealthMcp {
    state: Arc<AppState>,
}

// =============================================================================
// Tool Parameter Types
// =============================================================================

#[derive(Debug, Deserialize, JsonSchema)]
struct AccountParams {
    #[schemars(description = "Account ID or exact account name")]
    account: String,
    #[schemars(description = "Organization ID. Defaults to defaultOrgId from config.")]
    org_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct OrgParams {
    #[schemars(description = "Organization ID. Defaults to defaultOrgId from config.")]
    org_id: Option<String>,
}

// =============================================================================
// Response Types
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthView {
    #[serde(flatten)]
    health: AccountHealth,
    reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trend: Option<i16>,
}

impl From<AccountHealth> for HealthView {
    fn from(health: AccountHealth) -> Self {
        Self {
            reasons: health.risk_reason_messages(),
            trend: health.trend(),
            health,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BulkView {
    updated_count: usize,
    newly_scored_count: usize,
    at_risk: Vec<String>,
    failures: Vec<crmhealth_lib::health::AccountFailure>,
}

// =============================================================================
// Tool implementations
// =============================================================================

#[tool(tool_box)]
impl CrmHealthMcp {
    fn new(state: AppState) -> Self {
        Self {
            state: Arc::new(state),
        }
    }

    fn context(&self, org_id: Option<String>) -> Result<OrgContext, HealthError> {
        org_id
            .map(OrgContext::new)
            .or_else(|| self.state.default_context())
            .map(|ctx| ctx.with_actor(ACTOR))
            .ok_or_else(|| {
                HealthError::InvalidConfig(
                    "No orgId given and no defaultOrgId configured".to_string(),
                )
            })
    }

    #[tool(description = "Get the stored health score for one account: composite score, previous score, five sub-scores, risk level, and risk reasons. Does not recalculate.")]
    fn get_account_health(&self, #[tool(aggr)] params: AccountParams) -> String {
        let result = self.context(params.org_id).and_then(|ctx| {
            let id = health_service::resolve_account_id(&self.state, &ctx, &params.account)?;
            health_service::get_account_health(&self.state, &ctx, &id)
        });
        match result {
            Ok(Some(health)) => render(&HealthView::from(health)),
            Ok(None) => format!(
                "Account '{}' has not been scored yet. Use recalculate_health to score it.",
                params.account
            ),
            Err(e) => render_error(&e),
        }
    }

    #[tool(description = "Recalculate and store the health score for one account from its current activity, tickets, invoices, and usage.")]
    fn recalculate_health(&self, #[tool(aggr)] params: AccountParams) -> String {
        let result = self.context(params.org_id).and_then(|ctx| {
            let id = health_service::resolve_account_id(&self.state, &ctx, &params.account)?;
            health_service::recalculate_health(&self.state, &ctx, &id)
        });
        match result {
            Ok(health) => render(&HealthView::from(health)),
            Err(e) => render_error(&e),
        }
    }

    #[tool(description = "Recalculate health for every active account in the organization. Returns counts, the accounts now at risk, and any per-account failures.")]
    fn recalculate_all_health(&self, #[tool(aggr)] params: OrgParams) -> String {
        let result = self
            .context(params.org_id)
            .and_then(|ctx| health_service::recalculate_all_health(&self.state, &ctx));
        match result {
            Ok(summary) => render(&BulkView {
                updated_count: summary.updated_count,
                newly_scored_count: summary.newly_scored_count,
                at_risk: summary
                    .results
                    .iter()
                    .filter(|h| h.is_at_risk)
                    .map(|h| h.account_id.clone())
                    .collect(),
                failures: summary.failures,
            }),
            Err(e) => render_error(&e),
        }
    }

    #[tool(description = "List accounts at HIGH or CRITICAL risk, lowest health score first, with their risk reasons.")]
    fn list_at_risk_accounts(&self, #[tool(aggr)] params: OrgParams) -> String {
        let result = self
            .context(params.org_id)
            .and_then(|ctx| health_service::list_at_risk_accounts(&self.state, &ctx));
        match result {
            Ok(rows) => {
                let views: Vec<HealthView> = rows.into_iter().map(HealthView::from).collect();
                render(&views)
            }
            Err(e) => render_error(&e),
        }
    }
}

// =============================================================================
// ServerHandler: wires tool_box into the MCP protocol
// =============================================================================

#[tool(tool_box)]
impl ServerHandler for CrmHealthMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "crmhealth".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
            instructions: Some(
                "crmhealth MCP server. Scores CRM account health and flags at-risk accounts. \
                 Use get_account_health for a stored score, recalculate_health to refresh one \
                 account, recalculate_all_health for the whole organization, and \
                 list_at_risk_accounts for the HIGH/CRITICAL watch list."
                    .to_string(),
            ),
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("Error: {e}"))
}

fn render_error(err: &HealthError) -> String {
    log::warn!("Tool call failed: {err}");
    render(&CommandError::from(err))
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let config =
        load_config().map_err(|e| anyhow::anyhow!("Failed to load crmhealth config: {e}"))?;

    let state = AppState::open(config).map_err(|e| anyhow::anyhow!("{e}"))?;

    let server = CrmHealthMcp::new(state);

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
