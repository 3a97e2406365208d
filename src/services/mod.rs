//! Service layer shared by the CLI and the MCP server.
//!
//! Functions here take `&AppState` plus an `OrgContext`, lock the database,
//! and delegate to the domain modules.

pub mod health;
