use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeErrorKind {
    /// Fatal, raised only while starting up.
    Configuration,
    NotReady,
    RateLimited,
    AuthExpired,
    BackendUnavailable,
    SchemaDrift,
    BackendRejected,
    Cancelled,
    InvalidParams,
    NotFound,
    OperationDisabled,
    Internal,
}

impl BridgeErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            BridgeErrorKind::NotReady
                | BridgeErrorKind::RateLimited
                | BridgeErrorKind::BackendUnavailable
        )
    }
}

#[derive(Debug, Clone, Serialize, thiserror::Error)]
#[error("{message}")]
pub struct BridgeError {
    pub kind: BridgeErrorKind,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
    pub retryable: bool,
}

impl BridgeError {
    pub fn new(kind: BridgeErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            hint: None,
            details: None,
            retry_after_ms: None,
            retryable: kind.is_retryable(),
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }

    pub fn is(&self, kind: BridgeErrorKind) -> bool {
        self.kind == kind
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Configuration, "CONFIGURATION", message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::NotReady, "NOT_READY", message)
            .with_hint("The workspace directory is still warming up; retry shortly.")
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: Duration) -> Self {
        Self::new(BridgeErrorKind::RateLimited, "RATE_LIMITED", message)
            .with_retry_after(retry_after)
    }

    pub fn auth_expired(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::AuthExpired, "AUTH_EXPIRED", message)
    }

    pub fn backend_unavailable(message: impl Into<String>) -> Self {
        Self::new(
            BridgeErrorKind::BackendUnavailable,
            "BACKEND_UNAVAILABLE",
            message,
        )
    }

    /// The request may have reached the backend before the deadline.
    pub fn backend_timeout(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::BackendUnavailable, "BACKEND_TIMEOUT", message)
    }

    pub fn is_timeout(&self) -> bool {
        self.kind == BridgeErrorKind::BackendUnavailable && self.code == "BACKEND_TIMEOUT"
    }

    pub fn schema_drift(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::SchemaDrift, "SCHEMA_DRIFT", message)
    }

    pub fn backend_rejected(method: &str, backend_code: &str) -> Self {
        Self::new(
            BridgeErrorKind::BackendRejected,
            "BACKEND_REJECTED",
            format!("{} failed: {}", method, backend_code),
        )
        .with_details(serde_json::json!({ "method": method, "error": backend_code }))
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Cancelled, "CANCELLED", message)
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::InvalidParams, "INVALID_PARAMS", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::NotFound, "NOT_FOUND", message)
    }

    pub fn operation_disabled(message: impl Into<String>) -> Self {
        Self::new(
            BridgeErrorKind::OperationDisabled,
            "OPERATION_DISABLED",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(BridgeErrorKind::Internal, "INTERNAL", message)
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        BridgeError::internal(err.to_string())
    }
}
