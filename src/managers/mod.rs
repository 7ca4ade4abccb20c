mod edge;
mod rest;
mod session;

pub use edge::EdgeClient;
pub use rest::RestClient;
pub use session::SessionClient;

use crate::constants::{backend_errors, limits, retry};
use crate::errors::{BridgeError, BridgeErrorKind};
use crate::services::credentials::Credential;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::router::{BackendSurface, Operation};
use crate::services::transport::RawResponse;
use crate::utils::redact::redact_text;
use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One backend call surface. Implementations own request shaping and
/// authentication; retry and classification are shared.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn surface(&self) -> BackendSurface;

    async fn call(
        &self,
        operation: Operation,
        params: &Value,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError>;
}

#[derive(Clone)]
pub struct Backends {
    rest: Arc<dyn BackendClient>,
    session: Arc<dyn BackendClient>,
    edge: Arc<dyn BackendClient>,
}

impl Backends {
    pub fn new(
        rest: Arc<dyn BackendClient>,
        session: Arc<dyn BackendClient>,
        edge: Arc<dyn BackendClient>,
    ) -> Self {
        Self { rest, session, edge }
    }

    pub async fn call(
        &self,
        surface: BackendSurface,
        operation: Operation,
        params: &Value,
        credential: &Credential,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let client = match surface {
            BackendSurface::Rest => &self.rest,
            BackendSurface::Session => &self.session,
            BackendSurface::Edge => &self.edge,
            BackendSurface::LocalDirectory => {
                return Err(BridgeError::internal(format!(
                    "{} is served from the local directory, not a backend",
                    operation.name()
                )))
            }
        };
        client.call(operation, params, credential, cancel).await
    }
}

/// Flattens a JSON object into form fields. Scalars are stringified, arrays
/// of scalars are comma-joined, anything nested is sent as JSON text.
pub fn params_to_form(params: &Value) -> Result<Vec<(String, String)>, BridgeError> {
    let map = match params {
        Value::Null => return Ok(Vec::new()),
        Value::Object(map) => map,
        _ => return Err(BridgeError::invalid_params("params must be a JSON object")),
    };
    let mut out = Vec::with_capacity(map.len());
    for (key, value) in map {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s.clone(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(items) if items.iter().all(|i| i.is_string() || i.is_number()) => items
                .iter()
                .map(|i| match i {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(","),
            other => other.to_string(),
        };
        out.push((key.clone(), text));
    }
    Ok(out)
}

fn backend_error_code(value: &Value) -> String {
    value
        .get("error")
        .and_then(|e| e.as_str())
        .unwrap_or("unknown_error")
        .to_string()
}

fn default_retry_after() -> Duration {
    Duration::from_millis(retry::DEFAULT_RETRY_AFTER_MS)
}

/// Maps a raw HTTP exchange onto the error taxonomy.
pub fn classify_response(
    operation: Operation,
    raw: &RawResponse,
    logger: &Logger,
    secrets: &[String],
) -> Result<Value, BridgeError> {
    let method = operation.method_label();
    if raw.status == 429 {
        let wait = raw.retry_after.unwrap_or_else(default_retry_after);
        return Err(BridgeError::rate_limited(format!("{} was rate limited", method), wait));
    }
    if raw.status >= 500 || retry::STATUS_CODES.contains(&raw.status) {
        return Err(BridgeError::backend_unavailable(format!(
            "{} returned HTTP {}",
            method, raw.status
        )));
    }
    if raw.status == 401 {
        return Err(BridgeError::auth_expired(format!(
            "{} rejected the credential (HTTP 401)",
            method
        )));
    }

    let parsed: Option<Value> = raw.json();
    let Some(value) = parsed else {
        if raw.status >= 400 {
            return Err(BridgeError::backend_rejected(method, &format!("http_{}", raw.status)));
        }
        logger.warn(
            "Backend response is not JSON",
            Some(&serde_json::json!({
                "method": method,
                "status": raw.status,
                "body": redact_text(&raw.body, limits::LOG_BODY_SNIPPET_BYTES, Some(secrets)),
            })),
        );
        return Err(BridgeError::schema_drift(format!("{} returned a non-JSON body", method)));
    };

    match value.get("ok").and_then(|ok| ok.as_bool()) {
        Some(true) => Ok(value),
        Some(false) => {
            let code = backend_error_code(&value);
            if backend_errors::AUTH.contains(&code.as_str()) {
                return Err(BridgeError::auth_expired(format!(
                    "{} rejected the credential: {}",
                    method, code
                ))
                .with_details(serde_json::json!({ "method": method, "error": code })));
            }
            if code == backend_errors::RATE_LIMITED {
                let wait = raw.retry_after.unwrap_or_else(default_retry_after);
                return Err(BridgeError::rate_limited(format!("{} was rate limited", method), wait));
            }
            Err(BridgeError::backend_rejected(method, &code))
        }
        None => {
            logger.warn(
                "Backend response is missing the ok flag",
                Some(&serde_json::json!({
                    "method": method,
                    "status": raw.status,
                    "body": redact_text(&raw.body, limits::LOG_BODY_SNIPPET_BYTES, Some(secrets)),
                })),
            );
            Err(BridgeError::schema_drift(format!(
                "{} response has no boolean 'ok' field",
                method
            )))
        }
    }
}

fn should_retry(operation: Operation, err: &BridgeError) -> bool {
    match err.kind {
        // A timed-out write may already have been applied.
        BridgeErrorKind::BackendUnavailable => !(err.is_timeout() && operation.is_mutation()),
        BridgeErrorKind::RateLimited => err
            .retry_after()
            .map(|wait| wait <= Duration::from_millis(retry::MAX_RETRY_AFTER_MS))
            .unwrap_or(true),
        _ => false,
    }
}

fn retry_delay(err: &BridgeError) -> Duration {
    if let Some(wait) = err.retry_after() {
        return wait;
    }
    let base = retry::BASE_DELAY_MS as f64;
    let delta = base * retry::JITTER;
    let jittered = base - delta + rand::random::<f64>() * delta * 2.0;
    Duration::from_millis(jittered.max(0.0) as u64)
}

fn cancelled(operation: Operation) -> BridgeError {
    BridgeError::cancelled(format!("{} was cancelled", operation.method_label()))
}

/// Acquires a rate-limit token before every attempt and retries once on
/// `BackendUnavailable` or `RateLimited`. Mutations are not retried after a
/// timeout.
pub(crate) async fn call_with_retry<F, Fut>(
    limiter: &RateLimiter,
    logger: &Logger,
    operation: Operation,
    secrets: &[String],
    cancel: &CancellationToken,
    mut send: F,
) -> Result<Value, BridgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RawResponse, BridgeError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        limiter.acquire(operation.tier(), cancel).await?;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled(operation)),
            res = send() => res,
        };
        let err = match outcome.and_then(|raw| classify_response(operation, &raw, logger, secrets)) {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };
        if attempt >= retry::MAX_ATTEMPTS || !should_retry(operation, &err) {
            return Err(err);
        }
        let delay = retry_delay(&err);
        logger.warn(
            "Retrying backend call",
            Some(&serde_json::json!({
                "method": operation.method_label(),
                "attempt": attempt,
                "error": err.code,
                "delay_ms": delay.as_millis() as u64,
            })),
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return Err(cancelled(operation)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(status: u16, body: &str) -> RawResponse {
        RawResponse {
            status,
            retry_after: None,
            body: body.to_string(),
        }
    }

    fn classify(status: u16, body: &str) -> Result<Value, BridgeError> {
        classify_response(
            Operation::ConversationsHistory,
            &raw(status, body),
            &Logger::new("test"),
            &[],
        )
    }

    #[test]
    fn classification_follows_taxonomy() {
        assert!(classify(200, r#"{"ok":true,"messages":[]}"#).is_ok());
        assert_eq!(
            classify(200, r#"{"ok":false,"error":"invalid_auth"}"#).unwrap_err().kind,
            BridgeErrorKind::AuthExpired
        );
        assert_eq!(
            classify(200, r#"{"ok":false,"error":"ratelimited"}"#).unwrap_err().kind,
            BridgeErrorKind::RateLimited
        );
        assert_eq!(
            classify(429, "").unwrap_err().retry_after(),
            Some(Duration::from_millis(retry::DEFAULT_RETRY_AFTER_MS))
        );
        assert_eq!(classify(503, "").unwrap_err().kind, BridgeErrorKind::BackendUnavailable);
        assert_eq!(classify(200, "<html>").unwrap_err().kind, BridgeErrorKind::SchemaDrift);
        assert_eq!(classify(200, r#"{"messages":[]}"#).unwrap_err().kind, BridgeErrorKind::SchemaDrift);
        let rejected = classify(200, r#"{"ok":false,"error":"channel_not_found"}"#).unwrap_err();
        assert_eq!(rejected.kind, BridgeErrorKind::BackendRejected);
        assert!(rejected.message.contains("channel_not_found"));
    }

    #[test]
    fn form_fields_flatten_values() {
        let fields = params_to_form(&serde_json::json!({
            "channel": "C1",
            "limit": 10,
            "inclusive": true,
            "users": ["U1", "U2"],
            "blocks": [{"type": "section"}],
            "skip": null,
        }))
        .unwrap();
        let lookup = |k: &str| fields.iter().find(|(key, _)| key == k).map(|(_, v)| v.clone());
        assert_eq!(lookup("channel").as_deref(), Some("C1"));
        assert_eq!(lookup("limit").as_deref(), Some("10"));
        assert_eq!(lookup("users").as_deref(), Some("U1,U2"));
        assert_eq!(lookup("blocks").as_deref(), Some(r#"[{"type":"section"}]"#));
        assert_eq!(lookup("skip"), None);
        assert!(params_to_form(&serde_json::json!("x")).is_err());
    }

    #[test]
    fn long_rate_limit_hints_are_not_retried() {
        let short = BridgeError::rate_limited("x", Duration::from_secs(2));
        let long = BridgeError::rate_limited("x", Duration::from_secs(600));
        let op = Operation::ConversationsHistory;
        assert!(should_retry(op, &short));
        assert!(!should_retry(op, &long));
        assert!(!should_retry(op, &BridgeError::auth_expired("x")));
    }

    #[test]
    fn timed_out_mutations_are_not_retried() {
        let timeout = BridgeError::backend_timeout("request timed out");
        assert!(should_retry(Operation::ConversationsHistory, &timeout));
        assert!(!should_retry(Operation::ConversationsAddMessage, &timeout));
        let refused = BridgeError::backend_unavailable("connection failed");
        assert!(should_retry(Operation::ConversationsAddMessage, &refused));
    }
}
