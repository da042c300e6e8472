use std::collections::HashMap;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "Mcp-Session-Id";
const RPC_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the upstream JSON-RPC conversation.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Transport-level HTTP failure (connect, timeout, non-2xx).
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The server answered with a JSON-RPC error object.
    #[error("JSON-RPC error: {0}")]
    Rpc(Value),
}

/// Minimal MCP client: JSON-RPC 2.0 over HTTPS with lazy `initialize`
/// and session tracking via the `Mcp-Session-Id` header. The client
/// generates an initial session id and adopts whatever the server
/// assigns in its response.
pub struct McpClient {
    http: reqwest::Client,
    endpoint: String,
    extra_headers: HashMap<String, String>,
    session_id: Option<String>,
    initialized: bool,
}

impl McpClient {
    /// Create a client for `endpoint`. `headers` are sent on every
    /// request (auth tokens and the like).
    pub fn new(
        http: reqwest::Client,
        endpoint: impl Into<String>,
        headers: Option<&HashMap<String, String>>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            extra_headers: headers.cloned().unwrap_or_default(),
            session_id: None,
            initialized: false,
        }
    }

    /// POST one JSON-RPC payload; returns the `result` member and the
    /// session id the server put on the response, if any.
    async fn post(
        &self,
        payload: &Value,
        session_id: &str,
    ) -> Result<(Value, Option<String>), McpError> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .timeout(RPC_TIMEOUT)
            .header(SESSION_HEADER, session_id)
            .json(payload);
        for (key, value) in &self.extra_headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request.send().await?.error_for_status()?;
        let assigned = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Value = response.json().await?;

        if let Some(error) = body.get("error") {
            if !error.is_null() {
                return Err(McpError::Rpc(error.clone()));
            }
        }
        let result = body.get("result").cloned().unwrap_or(Value::Null);
        Ok((result, assigned))
    }

    async fn initialize(&mut self) -> Result<(), McpError> {
        if self.initialized {
            return Ok(());
        }
        let initial = uuid::Uuid::new_v4().to_string();
        let payload = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": "initialize",
            "params": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "mcp-queue",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            },
        });

        let (_, assigned) = self.post(&payload, &initial).await?;
        let session = assigned.unwrap_or(initial);
        debug!("MCP session initialized: {session}");
        self.session_id = Some(session);
        self.initialized = true;
        Ok(())
    }

    async fn rpc(&mut self, method: &str, params: Value) -> Result<Value, McpError> {
        self.initialize().await?;
        let payload = json!({
            "jsonrpc": "2.0",
            "id": uuid::Uuid::new_v4().to_string(),
            "method": method,
            "params": params,
        });
        let session = self.session_id.clone().unwrap_or_default();
        let (result, assigned) = self.post(&payload, &session).await?;
        if let Some(assigned) = assigned {
            self.session_id = Some(assigned);
        }
        Ok(result)
    }

    /// Invoke a tool through `tools/call`.
    pub async fn call_tool(&mut self, name: &str, arguments: &Value) -> Result<Value, McpError> {
        self.rpc("tools/call", json!({"name": name, "arguments": arguments}))
            .await
    }
}
