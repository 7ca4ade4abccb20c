use super::{call_with_retry, params_to_form, BackendClient};
use crate::errors::BridgeError;
use crate::services::credentials::Credential;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::router::{BackendSurface, Operation};
use crate::services::transport::HttpTransport;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Documented Web API: form POST with a bearer token.
pub struct RestClient {
    transport: Arc<HttpTransport>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    logger: Logger,
}

impl RestClient {
    pub fn new(transport: Arc<HttpTransport>, limiter: Arc<RateLimiter>, base_url: &str) -> Self {
        Self {
            transport,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            logger: Logger::new("backend").child("rest"),
        }
    }
}

#[async_trait]
impl BackendClient for RestClient {
    fn surface(&self) -> BackendSurface {
        BackendSurface::Rest
    }

    async fn call(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let method = operation.web_method().ok_or_else(|| {
            BridgeError::internal(format!("{} has no Web API method", operation.name()))
        })?;
        let url = format!("{}/{}", self.base_url, method);
        let fields = params_to_form(params)?;
        let token = credential.token();
        let secrets = credential.secrets();
        self.logger.debug(
            "Calling Web API",
            Some(&serde_json::json!({ "method": method, "fields": fields.len() })),
        );
        call_with_retry(&self.limiter, &self.logger, operation, &secrets, cancel, || {
            self.transport.post_form(&url, &fields, Some(token))
        })
        .await
    }
}
