//! rmcp-backed transport: spawns the integration's MCP server as a child
//! process and talks JSON-RPC over its stdio.

use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::service::RunningService;
use rmcp::transport::child_process::TokioChildProcess;
use rmcp::{RoleClient, ServiceExt};
use tokio::sync::RwLock;

use super::{
    CredentialBinding, IntegrationError, ToolDescriptor, ToolTransport, TransportFactory,
    TransportKind, TransportSpec,
};

/// Calls share the read lock; `disconnect` takes the write lock and waits
/// for in-flight calls on this session.
pub struct RmcpTransport {
    service: RwLock<Option<RunningService<RoleClient, ()>>>,
}

fn descriptor_from_tool(tool: &rmcp::model::Tool) -> Result<ToolDescriptor, IntegrationError> {
    let value = serde_json::to_value(tool)
        .map_err(|e| IntegrationError::ConnectionFailed(format!("Bad tool listing: {}", e)))?;
    let name = value
        .get("name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| IntegrationError::ConnectionFailed("Tool without a name".to_string()))?
        .to_string();
    Ok(ToolDescriptor {
        name,
        description: value
            .get("description")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        input_schema: value
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
    })
}

#[async_trait]
impl ToolTransport for RmcpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, IntegrationError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or(IntegrationError::NotConnected)?;
        let result = service
            .list_tools(Default::default())
            .await
            .map_err(|e| IntegrationError::ConnectionFailed(e.to_string()))?;
        result.tools.iter().map(descriptor_from_tool).collect()
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, IntegrationError> {
        let guard = self.service.read().await;
        let service = guard.as_ref().ok_or(IntegrationError::NotConnected)?;
        let result = service
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments: arguments.as_object().cloned(),
            })
            .await
            .map_err(|e| IntegrationError::ToolCallFailed(e.to_string()))?;

        if result.is_error == Some(true) {
            let msg = result
                .content
                .first()
                .and_then(|c| c.as_text())
                .map(|t| t.text.clone())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(IntegrationError::ToolCallFailed(msg));
        }

        Ok(result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.as_str()))
            .collect())
    }

    async fn disconnect(&self) {
        let taken = self.service.write().await.take();
        if let Some(service) = taken {
            let _ = service.cancel().await;
        }
    }
}

/// Chooses the rmcp transport for a spec. Only stdio child processes are
/// supported; HTTP endpoints are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct RmcpTransportFactory;

#[async_trait]
impl TransportFactory for RmcpTransportFactory {
    async fn connect(
        &self,
        spec: &TransportSpec,
        credential: Option<&CredentialBinding>,
    ) -> Result<Box<dyn ToolTransport>, IntegrationError> {
        let (command, args) = match spec {
            TransportSpec::Stdio { command, args } => (command, args),
            TransportSpec::Http { .. } => {
                return Err(IntegrationError::UnsupportedTransport(TransportKind::Http))
            }
        };

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        if let Some(binding) = credential {
            cmd.env(&binding.env_var, binding.credential.expose());
        }

        let transport = TokioChildProcess::new(&mut cmd)
            .map_err(|e| IntegrationError::ConnectionFailed(format!("Failed to spawn {}: {}", command, e)))?;

        let service = ()
            .serve(transport)
            .await
            .map_err(|e| IntegrationError::ConnectionFailed(e.to_string()))?;

        Ok(Box::new(RmcpTransport {
            service: RwLock::new(Some(service)),
        }))
    }
}
