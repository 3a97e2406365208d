//! crmhealth: account health scoring and at-risk detection for a multi-tenant
//! CRM store, plus the lifecycle of external MCP tool integrations.

pub mod audit;
pub mod db;
pub mod error;
pub mod health;
pub mod integrations;
mod migrations;
pub mod services;
pub mod state;
pub mod types;
pub mod util;
