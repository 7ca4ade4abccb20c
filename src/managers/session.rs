use super::{call_with_retry, params_to_form, BackendClient};
use crate::constants::session_form;
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

/// Browser-session Web API: form POST with the xoxc token in the body, the
/// xoxd cookie on the transport, and the web client's diagnostic fields.
pub struct SessionClient {
    transport: Arc<HttpTransport>,
    limiter: Arc<RateLimiter>,
    base_url: String,
    logger: Logger,
}

impl SessionClient {
    pub fn new(transport: Arc<HttpTransport>, limiter: Arc<RateLimiter>, base_url: &str) -> Self {
        Self {
            transport,
            limiter,
            base_url: base_url.trim_end_matches('/').to_string(),
            logger: Logger::new("backend").child("session"),
        }
    }
}

pub(crate) fn session_fields(
    operation: Operation,
    params: &Value,
    token: &str,
) -> Result<Vec<(String, String)>, BridgeError> {
    let mut fields = vec![("token".to_string(), token.to_string())];
    fields.extend(
        params_to_form(params)?
            .into_iter()
            .filter(|(key, _)| key != "token"),
    );
    fields.push((session_form::REASON_FIELD.to_string(), operation.name().to_string()));
    fields.push((session_form::MODE_FIELD.to_string(), session_form::MODE_VALUE.to_string()));
    fields.push((session_form::SONIC_FIELD.to_string(), session_form::SONIC_VALUE.to_string()));
    fields.push((
        session_form::APP_NAME_FIELD.to_string(),
        session_form::APP_NAME_VALUE.to_string(),
    ));
    Ok(fields)
}

#[async_trait]
impl BackendClient for SessionClient {
    fn surface(&self) -> BackendSurface {
        BackendSurface::Session
    }

    async fn call(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        if credential.session_cookie().is_none() {
            return Err(BridgeError::internal(
                "session surface requires browser session credentials",
            ));
        }
        let method = operation.web_method().ok_or_else(|| {
            BridgeError::internal(format!("{} has no Web API method", operation.name()))
        })?;
        let url = format!("{}/{}", self.base_url, method);
        let fields = session_fields(operation, params, credential.token())?;
        let secrets = credential.secrets();
        self.logger.debug(
            "Calling session Web API",
            Some(&serde_json::json!({ "method": method })),
        );
        call_with_retry(&self.limiter, &self.logger, operation, &secrets, cancel, || {
            self.transport.post_form(&url, &fields, None)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_form_carries_token_and_diagnostics() {
        let fields = session_fields(
            Operation::ConversationsHistory,
            &serde_json::json!({"channel": "C1", "token": "spoofed"}),
            "xoxc-real",
        )
        .unwrap();
        let names: Vec<&str> = fields.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names.iter().filter(|n| **n == "token").count(), 1);
        assert!(fields.contains(&("token".to_string(), "xoxc-real".to_string())));
        for field in ["_x_reason", "_x_mode", "_x_sonic", "_x_app_name"] {
            assert!(names.contains(&field), "missing {}", field);
        }
    }
}
