use super::{call_with_retry, BackendClient};
use crate::errors::BridgeError;
use crate::services::credentials::Credential;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::router::{BackendSurface, Operation};
use crate::services::transport::HttpTransport;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Edge cache API: JSON POST to `<base>/<team_id>/<path>` with the token in
/// the body. The team id is learned from `auth.test` after startup.
pub struct EdgeClient {
    transport: Arc<HttpTransport>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    team_id: OnceCell<String>,
    logger: Logger,
}

impl EdgeClient {
    pub fn new(transport: Arc<HttpTransport>, limiter: Arc<RateLimiter>, base_url: &str) -> Self {
        Self {
            transport,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            team_id: OnceCell::new(),
            logger: Logger::new("backend").child("edge"),
        }
    }

    /// First value wins; later calls are ignored.
    pub fn set_team_id(&self, team_id: &str) {
        let _ = self.team_id.set(team_id.to_string());
    }

    pub fn team_id(&self) -> Option<&str> {
        self.team_id.get().map(|s| s.as_str())
    }
}

#[async_trait]
impl BackendClient for EdgeClient {
    fn surface(&self) -> BackendSurface {
        BackendSurface::Edge
    }

    async fn call(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let path = operation.edge_path().ok_or_else(|| {
            BridgeError::internal(format!("{} has no edge path", operation.name()))
        })?;
        let team_id = self
            .team_id()
            .ok_or_else(|| BridgeError::not_ready("workspace team id is not known yet"))?;
        let url = format!("{}/{}/{}", self.base_url, team_id, path);

        let mut body = match params {
            Value::Object(map) => map.clone(),
            Value::Null => serde_json::Map::new(),
            _ => return Err(BridgeError::invalid_params("params must be a JSON object")),
        };
        body.insert("token".to_string(), Value::String(credential.token().to_string()));
        let body = Value::Object(body);
        let secrets = credential.secrets();

        self.logger.debug("Calling edge API", Some(&serde_json::json!({ "path": path })));
        call_with_retry(&self.limiter, &self.logger, operation, &secrets, cancel, || {
            self.transport.post_json(&url, &body, None)
        })
        .await
    }
}
