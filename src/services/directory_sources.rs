use crate::constants::pagination;
use crate::errors::BridgeError;
use crate::managers::Backends;
use crate::services::credentials::Credential;
use crate::services::directory::{Channel, DirectoryEntry, User};
use crate::services::logger::Logger;
use crate::services::router::{BackendSurface, Operation};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryPage<T> {
    pub entries: Vec<T>,
    /// `None` once the backend reports the listing complete.
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait DirectorySource<T: DirectoryEntry>: Send + Sync {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DirectoryPage<T>, BridgeError>;
}

/// Cursor-paginated Web API listing (`users.list`, `conversations.list`).
pub struct WebListSource<T> {
    backends: Backends,
    credential: Arc<Credential>,
    surface: BackendSurface,
    operation: Operation,
    list_field: &'static str,
    base_params: Map<String, Value>,
    logger: Logger,
    _entry: PhantomData<fn() -> T>,
}

impl WebListSource<User> {
    pub fn users(backends: Backends, credential: Arc<Credential>, surface: BackendSurface) -> Self {
        let mut base_params = Map::new();
        base_params.insert("limit".to_string(), json!(pagination::USERS_PAGE_SIZE));
        Self::new(backends, credential, surface, Operation::UsersList, "members", base_params)
    }
}

impl WebListSource<Channel> {
    pub fn channels(backends: Backends, credential: Arc<Credential>, surface: BackendSurface) -> Self {
        let mut base_params = Map::new();
        base_params.insert("limit".to_string(), json!(pagination::CHANNELS_PAGE_SIZE));
        base_params.insert("types".to_string(), json!(pagination::CHANNEL_TYPES));
        base_params.insert("exclude_archived".to_string(), json!(true));
        Self::new(backends, credential, surface, Operation::ChannelsList, "channels", base_params)
    }
}

impl<T: DirectoryEntry> WebListSource<T> {
    fn new(
        backends: Backends,
        credential: Arc<Credential>,
        surface: BackendSurface,
        operation: Operation,
        list_field: &'static str,
        base_params: Map<String, Value>,
    ) -> Self {
        Self {
            backends,
            credential,
            surface,
            operation,
            list_field,
            base_params,
            logger: Logger::new("directory_source").child(T::KIND.as_str()),
            _entry: PhantomData,
        }
    }
}

/// Extracts entries and the continuation cursor from one listing response.
pub fn parse_page<T: DirectoryEntry>(
    response: &Value,
    list_field: &str,
    logger: &Logger,
) -> Result<DirectoryPage<T>, BridgeError> {
    let items = response
        .get(list_field)
        .and_then(|v| v.as_array())
        .ok_or_else(|| {
            BridgeError::schema_drift(format!(
                "{} listing has no '{}' array",
                T::KIND.as_str(),
                list_field
            ))
        })?;
    let entries: Vec<T> = items.iter().filter_map(T::from_wire).collect();
    let skipped = items.len() - entries.len();
    if skipped > 0 {
        logger.warn(
            "Skipped directory records without an id",
            Some(&json!({ "kind": T::KIND.as_str(), "skipped": skipped })),
        );
    }
    let next_cursor = response
        .pointer("/response_metadata/next_cursor")
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());
    Ok(DirectoryPage {
        entries,
        next_cursor,
    })
}

#[async_trait]
impl<T: DirectoryEntry> DirectorySource<T> for WebListSource<T> {
    async fn fetch_page(
        &self,
        cursor: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DirectoryPage<T>, BridgeError> {
        let mut params = self.base_params.clone();
        if let Some(cursor) = cursor {
            params.insert("cursor".to_string(), Value::String(cursor.to_string()));
        }
        let response = self
            .backends
            .call(
                self.surface,
                self.operation,
                &Value::Object(params),
                &self.credential,
                cancel,
            )
            .await?;
        parse_page(&response, self.list_field, &self.logger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_page_reads_cursor_and_skips_bad_records() {
        let response = json!({
            "ok": true,
            "members": [{"id": "U1", "name": "a"}, {"name": "no-id"}],
            "response_metadata": {"next_cursor": "dXNlcjpVMDI="}
        });
        let page: DirectoryPage<User> = parse_page(&response, "members", &Logger::new("test")).unwrap();
        assert_eq!(page.entries.len(), 1);
        assert_eq!(page.next_cursor.as_deref(), Some("dXNlcjpVMDI="));
    }

    #[test]
    fn empty_cursor_means_complete_and_missing_list_is_drift() {
        let response = json!({"ok": true, "channels": [], "response_metadata": {"next_cursor": ""}});
        let page: DirectoryPage<Channel> = parse_page(&response, "channels", &Logger::new("test")).unwrap();
        assert!(page.next_cursor.is_none());

        let err = parse_page::<Channel>(&json!({"ok": true}), "channels", &Logger::new("test")).unwrap_err();
        assert_eq!(err.kind, crate::errors::BridgeErrorKind::SchemaDrift);
    }
}
