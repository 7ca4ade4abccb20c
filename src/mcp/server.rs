use crate::app::{ApiProvider, StartupMode};
use crate::config::BridgeConfig;
use crate::errors::{BridgeError, BridgeErrorKind};
use crate::mcp::protocol::{text_result, ErrorCode, JsonRpcRequest, JsonRpcResponse};
use crate::services::credentials::CredentialKind;
use crate::services::logger::{init_tracing, Logger};
use crate::services::directory::DirectoryKind;
use crate::services::router::Operation;
use crate::utils::redact::redact_params;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PROTOCOL_VERSION: &str = "2025-06-18";
const SERVER_NAME: &str = "slack-bridge";

fn auth_expired_hint(kind: CredentialKind) -> &'static str {
    match kind {
        CredentialKind::BrowserSession => {
            "Slack browser session tokens (xoxc/xoxd) have expired. Sign in to Slack in a browser, copy fresh values into SLACK_MCP_XOXC_TOKEN and SLACK_MCP_XOXD_TOKEN, and restart."
        }
        CredentialKind::UserOAuth | CredentialKind::BotOAuth => {
            "The Slack OAuth token was rejected. Issue a new token or reinstall the app, update the environment, and restart."
        }
    }
}

/// Renders an error as tool-result text.
pub fn format_error(operation: &str, error: &BridgeError, kind: CredentialKind) -> String {
    let mut lines = vec![
        "BridgeError".to_string(),
        format!("operation: {}", operation),
        format!("kind: {:?}", error.kind).to_lowercase(),
        format!("code: {}", error.code),
        format!("retryable: {}", error.retryable),
        format!("message: {}", error.message),
    ];
    if let Some(wait) = error.retry_after_ms {
        lines.push(format!("retry_after_ms: {}", wait));
    }
    let hint = match error.kind {
        BridgeErrorKind::AuthExpired => Some(auth_expired_hint(kind).to_string()),
        _ => error.hint.clone(),
    };
    if let Some(hint) = hint {
        lines.push(format!("hint: {}", hint));
    }
    lines.join("\n")
}

pub struct McpServer {
    provider: Arc<ApiProvider>,
    cancel: CancellationToken,
    in_flight: Mutex<HashMap<String, CancellationToken>>,
    logger: Logger,
}

fn request_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn directory_uri(workspace: &str, kind: DirectoryKind) -> String {
    format!("slack://{}/{}", workspace, kind.as_str())
}

async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut BufWriter<W>,
    response: &JsonRpcResponse,
) -> Result<(), BridgeError> {
    let payload = serde_json::to_string(response).unwrap_or_default();
    writer.write_all(payload.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

impl McpServer {
    pub async fn new() -> Result<Self, BridgeError> {
        let config = BridgeConfig::from_env()?;
        let provider = ApiProvider::new(config)?;
        provider.start(StartupMode::Blocking).await?;
        Ok(Self::with_provider(Arc::new(provider)))
    }

    pub fn with_provider(provider: Arc<ApiProvider>) -> Self {
        Self {
            provider,
            cancel: CancellationToken::new(),
            in_flight: Mutex::new(HashMap::new()),
            logger: Logger::new("mcp"),
        }
    }

    fn in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.in_flight.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn handle_initialize(&self) -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {
                "tools": { "listChanged": false },
                "resources": { "listChanged": false, "subscribe": false },
            },
            "serverInfo": { "name": SERVER_NAME, "version": env!("CARGO_PKG_VERSION") },
        })
    }

    fn handle_tools_list(&self) -> Value {
        let tools: Vec<Value> = self
            .provider
            .router()
            .enabled_operations()
            .into_iter()
            .map(|op| {
                json!({
                    "name": op.name(),
                    "description": op.description(),
                    "inputSchema": { "type": "object", "additionalProperties": true },
                    "annotations": { "readOnlyHint": !op.is_mutation() },
                    "_meta": { "rateLimitTier": op.tier().as_str() },
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    fn handle_resources_list(&self) -> Value {
        let Some(info) = self.provider.auth_info() else {
            return json!({ "resources": [] });
        };
        let resources: Vec<Value> = [DirectoryKind::Channels, DirectoryKind::Users]
            .into_iter()
            .map(|kind| {
                json!({
                    "uri": directory_uri(&info.workspace, kind),
                    "name": format!("Directory of Slack {}", kind.as_str()),
                    "description": format!("Cached {} of the {} workspace.", kind.as_str(), info.workspace),
                    "mimeType": "application/json",
                })
            })
            .collect();
        json!({ "resources": resources })
    }

    fn handle_resources_read(&self, id: Value, params: &Value) -> JsonRpcResponse {
        let uri = params.get("uri").and_then(|v| v.as_str()).unwrap_or("").trim();
        let kind = self.provider.auth_info().and_then(|info| {
            [DirectoryKind::Users, DirectoryKind::Channels]
                .into_iter()
                .find(|kind| directory_uri(&info.workspace, *kind) == uri)
        });
        let Some(kind) = kind else {
            return JsonRpcResponse::failure(id, ErrorCode::InvalidParams, format!("Unknown resource: {}", uri));
        };
        match self.provider.directory(kind) {
            Ok(view) => JsonRpcResponse::success(
                id,
                json!({
                    "contents": [{
                        "uri": uri,
                        "mimeType": "application/json",
                        "text": view.to_json().to_string(),
                    }]
                }),
            ),
            Err(err) => JsonRpcResponse::failure(id, ErrorCode::InternalError, err.message),
        }
    }

    async fn handle_tools_call(&self, id: Value, params: &Value, cancel: &CancellationToken) -> JsonRpcResponse {
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("").trim();
        if name.is_empty() {
            return JsonRpcResponse::failure(id, ErrorCode::InvalidParams, "Missing tool name");
        }
        let Some(operation) = Operation::from_name(name) else {
            return JsonRpcResponse::failure(id, ErrorCode::InvalidParams, format!("Unknown tool: {}", name));
        };
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        self.logger.info(
            "Tool call received",
            Some(&json!({ "tool": name, "params": redact_params(&args) })),
        );
        let started = Instant::now();
        let outcome = self.provider.invoke(operation, &args, cancel).await;
        self.logger.info(
            "Tool call finished",
            Some(&json!({
                "tool": name,
                "ok": outcome.is_ok(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        let result = match outcome {
            Ok(value) => text_result(serde_json::to_string(&value).unwrap_or_else(|_| "{}".to_string()), false),
            Err(err) => {
                self.logger.warn(
                    "Tool call failed",
                    Some(&json!({ "tool": name, "code": err.code, "message": err.message })),
                );
                text_result(format_error(name, &err, self.provider.router().kind()), true)
            }
        };
        JsonRpcResponse::success(id, result)
    }

    fn handle_cancelled(&self, params: &Value) {
        let Some(request_id) = params.get("requestId") else {
            return;
        };
        if let Some(token) = self.in_flight().remove(&request_key(request_id)) {
            token.cancel();
            self.logger.debug(
                "Tool call cancelled by client",
                Some(&json!({ "request_id": request_id })),
            );
        }
    }

    /// Everything except `tools/call`, which `serve` runs on its own task.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        match request.method.as_str() {
            "notifications/initialized" => id.map(|id| JsonRpcResponse::success(id, json!({}))),
            "notifications/cancelled" => {
                self.handle_cancelled(&request.params);
                None
            }
            _ if request.method.starts_with("notifications/") && id.is_none() => None,
            "initialize" => id.map(|id| JsonRpcResponse::success(id, self.handle_initialize())),
            "ping" => id.map(|id| JsonRpcResponse::success(id, json!({}))),
            "tools/list" => id.map(|id| JsonRpcResponse::success(id, self.handle_tools_list())),
            "resources/list" => id.map(|id| JsonRpcResponse::success(id, self.handle_resources_list())),
            "resources/read" => id.map(|id| self.handle_resources_read(id, &request.params)),
            "tools/call" => match id {
                Some(id) => Some(self.handle_tools_call(id, &request.params, &self.cancel.child_token()).await),
                None => None,
            },
            _ => id.map(|id| JsonRpcResponse::failure(id, ErrorCode::MethodNotFound, "Method not found")),
        }
    }

    /// Runs a tool call on its own task; the response comes back on `responses`.
    fn spawn_tool_call(self: &Arc<Self>, id: Value, params: Value, responses: mpsc::UnboundedSender<JsonRpcResponse>) {
        let key = request_key(&id);
        let cancel = self.cancel.child_token();
        self.in_flight().insert(key.clone(), cancel.clone());
        let server = Arc::clone(self);
        tokio::spawn(async move {
            let response = server.handle_tools_call(id, &params, &cancel).await;
            server.in_flight().remove(&key);
            let _ = responses.send(response);
        });
    }

    /// Line-delimited JSON-RPC until `reader` hits EOF. Tool calls run
    /// concurrently and may answer out of order; in-flight calls are drained
    /// before returning.
    pub async fn serve<R, W>(self: &Arc<Self>, reader: R, writer: W) -> Result<(), BridgeError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        let mut writer = BufWriter::new(writer);
        let (tx, mut rx) = mpsc::unbounded_channel::<JsonRpcResponse>();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => match line? {
                    Some(line) => line,
                    None => break,
                },
                Some(response) = rx.recv() => {
                    write_response(&mut writer, &response).await?;
                    continue;
                }
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            let response = match serde_json::from_str::<Value>(trimmed) {
                Err(_) => Some(JsonRpcResponse::failure(Value::Null, ErrorCode::ParseError, "Parse error")),
                Ok(parsed) => match serde_json::from_value::<JsonRpcRequest>(parsed) {
                    Err(_) => Some(JsonRpcResponse::failure(
                        Value::Null,
                        ErrorCode::InvalidRequest,
                        "Invalid request",
                    )),
                    Ok(request) if request.method == "tools/call" => {
                        if let Some(id) = request.id {
                            self.spawn_tool_call(id, request.params, tx.clone());
                        }
                        None
                    }
                    Ok(request) => self.handle_request(request).await,
                },
            };
            if let Some(response) = response {
                write_response(&mut writer, &response).await?;
            }
        }

        drop(tx);
        while let Some(response) = rx.recv().await {
            write_response(&mut writer, &response).await?;
        }
        Ok(())
    }

    pub async fn run_stdio(self: &Arc<Self>) -> Result<(), BridgeError> {
        let result = self
            .serve(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
            .await;
        self.cancel.cancel();
        self.provider.shutdown().await;
        result
    }
}

pub async fn run_stdio() -> Result<(), BridgeError> {
    init_tracing();
    let server = Arc::new(McpServer::new().await?);
    server.run_stdio().await
}
