use crate::config::BridgeConfig;
use crate::constants::{cache, pagination, search};
use crate::errors::{BridgeError, BridgeErrorKind};
use crate::managers::{Backends, EdgeClient, RestClient, SessionClient};
use crate::services::cache_file::CacheFile;
use crate::services::credentials::{classify, Credential};
use crate::services::directory::{Channel, ChannelKind, DirectoryEntry, DirectoryKind, User};
use crate::services::directory_cache::{DirectoryCache, DirectorySnapshot, RefreshOutcome};
use crate::services::directory_sources::WebListSource;
use crate::services::logger::Logger;
use crate::services::rate_limiter::RateLimiter;
use crate::services::refresh::{RefreshSupervisor, RefreshTiming};
use crate::services::router::{surface_for, BackendSurface, CredentialRouter, Operation, OperationGate};
use crate::services::transport::HttpTransport;
use crate::utils::duration::format_wait;
use crate::utils::redact::redact_params;
use once_cell::sync::OnceCell;
use regex::RegexBuilder;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Wait for both directories before `start` returns (stdio hosts).
    Blocking,
    /// Return immediately; directory reads fail with `NotReady` until warm.
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthInfo {
    pub team_id: String,
    pub team: String,
    pub user_id: String,
    pub user: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enterprise_id: Option<String>,
    /// Subdomain of `url`; names the on-disk cache directory.
    pub workspace: String,
}

impl AuthInfo {
    pub fn from_response(value: &Value) -> Result<Self, BridgeError> {
        let field = |name: &str| {
            value
                .get(name)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let team_id = field("team_id");
        let url = field("url");
        if team_id.is_empty() || url.is_empty() {
            return Err(BridgeError::schema_drift(
                "auth.test response is missing team_id or url",
            ));
        }
        Ok(Self {
            workspace: workspace_from_url(&url),
            team: field("team"),
            user_id: field("user_id"),
            user: field("user"),
            enterprise_id: Some(field("enterprise_id")).filter(|id| !id.is_empty()),
            team_id,
            url,
        })
    }
}

/// `https://acme.slack.com/` → `acme`. Falls back to a filesystem-safe
/// rendering of the whole string.
pub fn workspace_from_url(raw: &str) -> String {
    if let Ok(parsed) = url::Url::parse(raw) {
        if let Some(host) = parsed.host_str() {
            if let Some(label) = host.split('.').next().filter(|l| !l.is_empty()) {
                return label.to_lowercase();
            }
        }
    }
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[derive(Debug, Clone)]
pub enum DirectoryView {
    Users(Arc<DirectorySnapshot<User>>),
    Channels(Arc<DirectorySnapshot<Channel>>),
}

impl DirectoryView {
    pub fn kind(&self) -> DirectoryKind {
        match self {
            DirectoryView::Users(_) => DirectoryKind::Users,
            DirectoryView::Channels(_) => DirectoryKind::Channels,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            DirectoryView::Users(s) => s.len(),
            DirectoryView::Channels(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_json(&self) -> Value {
        match self {
            DirectoryView::Users(s) => json!({
                "fetched_at": s.fetched_at(),
                "users": s.iter().collect::<Vec<_>>(),
            }),
            DirectoryView::Channels(s) => json!({
                "fetched_at": s.fetched_at(),
                "channels": s.iter().collect::<Vec<_>>(),
            }),
        }
    }
}

fn ready_snapshot<T: DirectoryEntry>(cache: &DirectoryCache<T>) -> Result<Arc<DirectorySnapshot<T>>, BridgeError> {
    let snapshot = cache.get();
    if !snapshot.is_ready() {
        return Err(BridgeError::not_ready(format!(
            "{} directory is not loaded yet",
            T::KIND.as_str()
        )));
    }
    Ok(snapshot)
}

fn required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, BridgeError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| BridgeError::invalid_params(format!("'{}' is required", key)))
}

fn search_limit(params: &Value) -> Result<usize, BridgeError> {
    let Some(raw) = params.get("limit") else {
        return Ok(search::DEFAULT_LIMIT);
    };
    let limit = match raw {
        Value::Null => return Ok(search::DEFAULT_LIMIT),
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match limit {
        Some(n) if (1..=search::MAX_LIMIT as u64).contains(&n) => Ok(n as usize),
        _ => Err(BridgeError::invalid_params(format!(
            "'limit' must be between 1 and {}",
            search::MAX_LIMIT
        ))),
    }
}

fn next_cursor(value: &Value) -> Option<String> {
    value
        .pointer("/response_metadata/next_cursor")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

/// Composition root. Owns the credential, router, limiter, backends and
/// both directory caches; hosts talk only to this.
pub struct ApiProvider {
    config: BridgeConfig,
    credential: Arc<Credential>,
    router: CredentialRouter,
    limiter: Arc<RateLimiter>,
    backends: Backends,
    edge: Arc<EdgeClient>,
    users: Arc<DirectoryCache<User>>,
    channels: Arc<DirectoryCache<Channel>>,
    auth: OnceCell<AuthInfo>,
    cancel: CancellationToken,
    supervisor: Mutex<Option<RefreshSupervisor>>,
    timing: RefreshTiming,
    logger: Logger,
}

impl ApiProvider {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        let logger = Logger::new("provider");
        let credential = Arc::new(classify(&config.credentials)?);
        let gate = OperationGate::from_config(&config)?;
        let router = CredentialRouter::new(credential.kind(), gate);

        let transport = Arc::new(HttpTransport::build(&config.transport, &credential)?);
        let limiter = Arc::new(RateLimiter::new());
        let edge = Arc::new(EdgeClient::new(
            transport.clone(),
            limiter.clone(),
            &config.edge_base_url,
        ));
        let backends = Backends::new(
            Arc::new(RestClient::new(transport.clone(), limiter.clone(), &config.api_base_url)),
            Arc::new(SessionClient::new(transport, limiter.clone(), &config.api_base_url)),
            edge.clone(),
        );

        let kind = credential.kind();
        let surface = |op: Operation| {
            surface_for(kind, op).ok_or_else(|| {
                BridgeError::configuration(format!(
                    "{} credentials cannot list the {} directory",
                    kind.as_str(),
                    op.name()
                ))
            })
        };
        let users_source = WebListSource::users(backends.clone(), credential.clone(), surface(Operation::UsersList)?);
        let channels_source =
            WebListSource::channels(backends.clone(), credential.clone(), surface(Operation::ChannelsList)?);
        let users = Arc::new(DirectoryCache::new(
            Arc::new(users_source),
            config.cache.ttl,
            config.cache.min_force_refresh_interval,
        ));
        let channels = Arc::new(DirectoryCache::new(
            Arc::new(channels_source),
            config.cache.ttl,
            config.cache.min_force_refresh_interval,
        ));

        logger.info(
            "Provider configured",
            Some(&json!({
                "credential": kind.as_str(),
                "fingerprint": credential.fingerprint(),
                "operations": router.enabled_operations().iter().map(|op| op.name()).collect::<Vec<_>>(),
            })),
        );

        Ok(Self {
            config,
            credential,
            router,
            limiter,
            backends,
            edge,
            users,
            channels,
            auth: OnceCell::new(),
            cancel: CancellationToken::new(),
            supervisor: Mutex::new(None),
            timing: RefreshTiming::default(),
            logger,
        })
    }

    pub fn with_refresh_timing(mut self, timing: RefreshTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn router(&self) -> &CredentialRouter {
        &self.router
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn auth_info(&self) -> Option<&AuthInfo> {
        self.auth.get()
    }

    pub fn users_cache(&self) -> &Arc<DirectoryCache<User>> {
        &self.users
    }

    pub fn channels_cache(&self) -> &Arc<DirectoryCache<Channel>> {
        &self.channels
    }

    fn cache_path(&self, explicit: &Option<PathBuf>, workspace: &str, file_name: &str) -> PathBuf {
        explicit
            .clone()
            .unwrap_or_else(|| self.config.cache.cache_dir.join(workspace).join(file_name))
    }

    /// Identifies the workspace with `auth.test`, points the edge client at
    /// the team and loads persisted directories. Idempotent.
    pub async fn connect(&self, cancel: &CancellationToken) -> Result<&AuthInfo, BridgeError> {
        if let Some(info) = self.auth.get() {
            return Ok(info);
        }
        let surface = self.router.route(Operation::AuthTest)?;
        let response = self
            .backends
            .call(surface, Operation::AuthTest, &json!({}), &self.credential, cancel)
            .await?;
        let info = AuthInfo::from_response(&response)?;
        self.edge.set_team_id(&info.team_id);

        let ttl = self.config.cache.ttl;
        let users_path = self.cache_path(&self.config.cache.users_cache_path, &info.workspace, cache::USERS_FILE_NAME);
        let channels_path = self.cache_path(
            &self.config.cache.channels_cache_path,
            &info.workspace,
            cache::CHANNELS_FILE_NAME,
        );
        self.users.attach_persistence(CacheFile::new(users_path, ttl));
        self.channels.attach_persistence(CacheFile::new(channels_path, ttl));
        let users_warm = self.users.load_persisted();
        let channels_warm = self.channels.load_persisted();

        self.logger.info(
            "Connected to workspace",
            Some(&json!({
                "workspace": info.workspace,
                "team_id": info.team_id,
                "users_from_disk": users_warm,
                "channels_from_disk": channels_warm,
            })),
        );
        let _ = self.auth.set(info);
        self.auth
            .get()
            .ok_or_else(|| BridgeError::internal("workspace identity was not recorded"))
    }

    /// Retries `connect` while the failure is transient. Credential and
    /// drift failures are returned.
    async fn connect_until_reachable(&self) -> Result<(), BridgeError> {
        loop {
            let err = match self.connect(&self.cancel).await {
                Ok(_) => return Ok(()),
                Err(err) => err,
            };
            if !err.retryable || self.cancel.is_cancelled() {
                return Err(err);
            }
            let wait = err.retry_after().unwrap_or(self.timing.retry_after_failure);
            self.logger.warn(
                "Workspace identity unavailable; retrying",
                Some(&json!({ "error": err.code, "message": err.message, "retry_in_ms": wait.as_millis() as u64 })),
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.cancel.cancelled() => {
                    return Err(BridgeError::cancelled("provider stopped while connecting"));
                }
            }
        }
    }

    /// Connects and starts the supervised refresh loops. In `Blocking` mode it
    /// then waits until both directories are ready; refresh failures are
    /// retried by the loops meanwhile. Calling it again is a no-op.
    pub async fn start(&self, mode: StartupMode) -> Result<(), BridgeError> {
        {
            let mut supervisor = self.supervisor.lock().await;
            if supervisor.is_some() {
                return Ok(());
            }
            self.connect_until_reachable().await?;

            let mut loops = RefreshSupervisor::new(self.cancel.child_token());
            loops.supervise(self.users.clone(), self.timing);
            loops.supervise(self.channels.clone(), self.timing);
            *supervisor = Some(loops);
        }
        self.logger.info(
            "Directory refresh loops started",
            Some(&json!({ "mode": format!("{:?}", mode).to_lowercase(), "ready": self.ready() })),
        );

        if mode == StartupMode::Blocking && !self.ready() {
            self.wait_ready(&self.cancel).await?;
            self.logger.info(
                "Directories ready",
                Some(&json!({
                    "users": self.users.get().len(),
                    "channels": self.channels.get().len(),
                })),
            );
        }
        Ok(())
    }

    pub fn ready(&self) -> bool {
        self.users.is_ready() && self.channels.is_ready()
    }

    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        self.users.wait_ready(cancel).await?;
        self.channels.wait_ready(cancel).await
    }

    pub fn users(&self) -> Result<Arc<DirectorySnapshot<User>>, BridgeError> {
        ready_snapshot(&self.users)
    }

    pub fn channels(&self) -> Result<Arc<DirectorySnapshot<Channel>>, BridgeError> {
        ready_snapshot(&self.channels)
    }

    pub fn directory(&self, kind: DirectoryKind) -> Result<DirectoryView, BridgeError> {
        match kind {
            DirectoryKind::Users => self.users().map(DirectoryView::Users),
            DirectoryKind::Channels => self.channels().map(DirectoryView::Channels),
        }
    }

    pub async fn force_refresh(
        &self,
        kind: DirectoryKind,
        cancel: &CancellationToken,
    ) -> Result<RefreshOutcome, BridgeError> {
        match kind {
            DirectoryKind::Users => self.users.refresh(true, cancel).await,
            DirectoryKind::Channels => self.channels.refresh(true, cancel).await,
        }
    }

    /// Looks up `key` (or a raw id); on a miss forces one refresh and looks
    /// again. A refused force refresh reads as `NotFound` with the wait.
    async fn lookup_with_refresh<T: DirectoryEntry>(
        &self,
        cache: &DirectoryCache<T>,
        key: &str,
        raw: &str,
        cancel: &CancellationToken,
    ) -> Result<T, BridgeError> {
        let find = |snapshot: &DirectorySnapshot<T>| {
            snapshot
                .find_by_key(key)
                .or_else(|| snapshot.get(raw))
                .cloned()
        };
        let current = ready_snapshot(cache)?;
        if let Some(hit) = find(&current) {
            return Ok(hit);
        }
        let not_found = || BridgeError::not_found(format!("{} '{}' not found", T::KIND.as_str(), raw));
        match cache.refresh(true, cancel).await {
            Ok(_) => {}
            Err(err) if err.is(BridgeErrorKind::RateLimited) => {
                let wait = err.retry_after().unwrap_or_default();
                return Err(not_found().with_hint(format!(
                    "The {} directory was refreshed recently; retry in {}.",
                    T::KIND.as_str(),
                    format_wait(wait)
                )));
            }
            Err(err) => return Err(err),
        }
        find(&cache.get()).ok_or_else(not_found)
    }

    /// `@name`, `name` or a user id.
    pub async fn resolve_user(&self, name: &str, cancel: &CancellationToken) -> Result<User, BridgeError> {
        let raw = name.trim();
        let key = raw.trim_start_matches('@');
        if key.is_empty() {
            return Err(BridgeError::invalid_params("user name is empty"));
        }
        self.lookup_with_refresh(&self.users, key, key, cancel).await
    }

    /// `#name`, `@user` (the direct-message channel) or a channel id.
    pub async fn resolve_channel(&self, name: &str, cancel: &CancellationToken) -> Result<Channel, BridgeError> {
        let raw = name.trim();
        if raw.len() < 2 {
            return Err(BridgeError::invalid_params(format!("invalid channel reference '{}'", raw)));
        }
        if raw.starts_with('@') {
            let user = self.resolve_user(raw, cancel).await?;
            let key = format!("@{}", user.id.to_lowercase());
            return self.lookup_with_refresh(&self.channels, &key, raw, cancel).await;
        }
        let key = if raw.starts_with('#') {
            raw.to_string()
        } else {
            format!("#{}", raw)
        };
        self.lookup_with_refresh(&self.channels, &key, raw, cancel).await
    }

    async fn resolve_channel_param(&self, params: &Value, cancel: &CancellationToken) -> Result<Value, BridgeError> {
        let Value::Object(map) = params else {
            return Ok(params.clone());
        };
        let mut out = map.clone();
        let reference = out
            .remove("channel_id")
            .or_else(|| out.remove("channel"))
            .and_then(|v| v.as_str().map(|s| s.trim().to_string()));
        if let Some(reference) = reference {
            let id = if reference.starts_with('#') || reference.starts_with('@') {
                self.resolve_channel(&reference, cancel).await?.id
            } else {
                reference
            };
            out.insert("channel".to_string(), Value::String(id));
        }
        Ok(Value::Object(out))
    }

    /// Runs one operation on whichever surface serves it for this credential.
    pub async fn invoke(
        &self,
        operation: Operation,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let surface = self.router.route(operation)?;
        self.logger.debug(
            "Invoking operation",
            Some(&json!({ "operation": operation.name(), "params": redact_params(params) })),
        );
        match operation {
            Operation::UsersList => self.list_users(params),
            Operation::ChannelsList => self.list_channels(params),
            Operation::UsersSearch => match surface {
                BackendSurface::Edge => self.edge_user_search(params, cancel).await,
                _ => self.local_user_search(params),
            },
            Operation::SavedList => self.saved_list(surface, params, cancel).await,
            Operation::UsergroupsMe => self.usergroups_me(surface, params, cancel).await,
            Operation::SavedComplete => {
                let params = self.resolve_channel_param(params, cancel).await?;
                let channel = required_str(&params, "channel")?;
                let ts = required_str(&params, "ts")?;
                let body = json!({
                    "item_type": "message",
                    "item_id": channel,
                    "ts": ts,
                    "mark": "completed",
                });
                self.call(surface, operation, &body, cancel).await
            }
            _ => {
                let params = self.resolve_channel_param(params, cancel).await?;
                self.call(surface, operation, &params, cancel).await
            }
        }
    }

    async fn call(
        &self,
        surface: BackendSurface,
        operation: Operation,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let result = self
            .backends
            .call(surface, operation, params, &self.credential, cancel)
            .await;
        if let Err(err) = &result {
            if err.is(BridgeErrorKind::AuthExpired) {
                self.logger.error(
                    "Credential rejected by backend",
                    Some(&json!({ "operation": operation.name(), "credential": self.credential.kind().as_str() })),
                );
            }
        }
        result
    }

    fn list_users(&self, params: &Value) -> Result<Value, BridgeError> {
        let snapshot = self.users()?;
        let include_deleted = params.get("include_deleted").and_then(|v| v.as_bool()).unwrap_or(false);
        let users: Vec<&User> = snapshot
            .iter()
            .filter(|u| include_deleted || !u.deleted)
            .collect();
        Ok(json!({ "users": users }))
    }

    fn list_channels(&self, params: &Value) -> Result<Value, BridgeError> {
        let snapshot = self.channels()?;
        let kinds: Option<HashSet<ChannelKind>> = match params.get("channel_types").and_then(|v| v.as_str()) {
            None => None,
            Some(raw) => {
                let mut kinds = HashSet::new();
                for name in raw.split(',').map(|s| s.trim()).filter(|s| !s.is_empty()) {
                    let kind = ChannelKind::from_name(name).ok_or_else(|| {
                        BridgeError::invalid_params(format!("unknown channel type '{}'", name))
                            .with_hint("Use public_channel, private_channel, im or mpim.")
                    })?;
                    kinds.insert(kind);
                }
                Some(kinds)
            }
        };
        let mut channels: Vec<&Channel> = snapshot
            .iter()
            .filter(|c| kinds.as_ref().map(|k| k.contains(&c.kind)).unwrap_or(true))
            .collect();
        if params.get("sort").and_then(|v| v.as_str()) == Some("popularity") {
            channels.sort_by(|a, b| b.member_count.cmp(&a.member_count));
        }
        if let Some(limit) = params.get("limit").and_then(|v| v.as_u64()) {
            channels.truncate(limit as usize);
        }
        Ok(json!({ "channels": channels }))
    }

    fn local_user_search(&self, params: &Value) -> Result<Value, BridgeError> {
        let query = required_str(params, "query")?;
        let limit = search_limit(params)?;
        let snapshot = self.users()?;
        let pattern = RegexBuilder::new(&regex::escape(query))
            .case_insensitive(true)
            .build()
            .map_err(|err| BridgeError::invalid_params(format!("invalid query: {}", err)))?;
        let users: Vec<&User> = snapshot
            .iter()
            .filter(|u| !u.deleted)
            .filter(|u| {
                pattern.is_match(&u.name)
                    || pattern.is_match(&u.real_name)
                    || pattern.is_match(&u.display_name)
                    || u.email.as_deref().map(|e| pattern.is_match(e)).unwrap_or(false)
            })
            .take(limit)
            .collect();
        Ok(json!({ "users": users }))
    }

    async fn edge_user_search(&self, params: &Value, cancel: &CancellationToken) -> Result<Value, BridgeError> {
        let query = required_str(params, "query")?;
        let limit = search_limit(params)?;
        let body = json!({
            "query": query,
            "count": limit,
            "fuzz": 1,
            "uax29_tokenizer": false,
            "include_profile_only_users": true,
        });
        let response = self
            .call(BackendSurface::Edge, Operation::UsersSearch, &body, cancel)
            .await?;
        let results = response
            .get("results")
            .and_then(|v| v.as_array())
            .ok_or_else(|| BridgeError::schema_drift("users/search response has no 'results' array"))?;
        let users: Vec<User> = results.iter().filter_map(User::from_wire).take(limit).collect();
        Ok(json!({ "users": users }))
    }

    async fn saved_list(
        &self,
        surface: BackendSurface,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let base = match params {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        let mut items = Vec::new();
        let mut cursor = base.get("cursor").and_then(|v| v.as_str()).map(|s| s.to_string());
        let mut seen = HashSet::new();
        for _ in 0..pagination::MAX_DIRECTORY_PAGES {
            let mut page_params = base.clone();
            if let Some(cursor) = &cursor {
                page_params.insert("cursor".to_string(), Value::String(cursor.clone()));
            }
            let response = self
                .call(surface, Operation::SavedList, &Value::Object(page_params), cancel)
                .await?;
            let page = response
                .get("saved_items")
                .and_then(|v| v.as_array())
                .ok_or_else(|| BridgeError::schema_drift("saved.list response has no 'saved_items' array"))?;
            items.extend(page.iter().cloned());
            match next_cursor(&response) {
                None => return Ok(json!({ "saved_items": items })),
                Some(next) if !seen.insert(next.clone()) => {
                    return Err(BridgeError::schema_drift("saved.list repeated cursor"));
                }
                Some(next) => cursor = Some(next),
            }
        }
        Err(BridgeError::schema_drift("saved.list did not finish paginating"))
    }

    async fn usergroups_me(
        &self,
        surface: BackendSurface,
        params: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, BridgeError> {
        let me = self
            .auth
            .get()
            .map(|info| info.user_id.clone())
            .filter(|id| !id.is_empty())
            .ok_or_else(|| BridgeError::not_ready("the authenticated user is not known yet"))?;
        let action = required_str(params, "action")?.to_lowercase();
        match action.as_str() {
            "list" => {
                let response = self
                    .call(surface, Operation::UsergroupsList, &json!({ "include_users": true }), cancel)
                    .await?;
                let groups = response
                    .get("usergroups")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| BridgeError::schema_drift("usergroups.list response has no 'usergroups' array"))?;
                let mine: Vec<Value> = groups
                    .iter()
                    .filter(|group| {
                        group
                            .get("users")
                            .and_then(|v| v.as_array())
                            .map(|users| users.iter().any(|u| u.as_str() == Some(me.as_str())))
                            .unwrap_or(false)
                    })
                    .map(|group| {
                        json!({
                            "id": group.get("id").cloned().unwrap_or(Value::Null),
                            "handle": group.get("handle").cloned().unwrap_or(Value::Null),
                            "name": group.get("name").cloned().unwrap_or(Value::Null),
                        })
                    })
                    .collect();
                Ok(json!({ "user_id": me, "usergroups": mine }))
            }
            "join" | "leave" => {
                let group = required_str(params, "usergroup_id")?;
                let response = self
                    .call(surface, Operation::UsergroupsUsersList, &json!({ "usergroup": group }), cancel)
                    .await?;
                let mut members: Vec<String> = response
                    .get("users")
                    .and_then(|v| v.as_array())
                    .ok_or_else(|| BridgeError::schema_drift("usergroups.users.list response has no 'users' array"))?
                    .iter()
                    .filter_map(|v| v.as_str().map(|s| s.to_string()))
                    .collect();
                let joining = action == "join";
                if members.contains(&me) == joining {
                    return Ok(json!({ "usergroup_id": group, "action": action, "changed": false, "users": members }));
                }
                if joining {
                    members.push(me.clone());
                } else {
                    members.retain(|member| *member != me);
                }
                if members.is_empty() {
                    return Err(BridgeError::invalid_params("cannot leave a user group you are the only member of")
                        .with_hint("Slack requires at least one member; disable the group instead."));
                }
                self.call(
                    surface,
                    Operation::UsergroupsUsersUpdate,
                    &json!({ "usergroup": group, "users": members.join(",") }),
                    cancel,
                )
                .await?;
                Ok(json!({ "usergroup_id": group, "action": action, "changed": true, "users": members }))
            }
            other => Err(BridgeError::invalid_params(format!("unknown action '{}'", other))
                .with_hint("Use list, join or leave.")),
        }
    }

    /// Stops the refresh loops and cancels in-flight work.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(loops) = self.supervisor.lock().await.take() {
            loops.shutdown().await;
        }
        self.logger.info("Provider stopped", None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_url_subdomain() {
        assert_eq!(workspace_from_url("https://Acme-Corp.slack.com/"), "acme-corp");
        assert_eq!(workspace_from_url("not a url"), "not_a_url");
    }

    #[test]
    fn auth_info_requires_team_and_url() {
        let info = AuthInfo::from_response(&json!({
            "ok": true, "url": "https://acme.slack.com/", "team": "Acme",
            "user": "ada", "team_id": "T1", "user_id": "U1"
        }))
        .unwrap();
        assert_eq!(info.workspace, "acme");
        assert!(info.enterprise_id.is_none());
        let err = AuthInfo::from_response(&json!({"ok": true})).unwrap_err();
        assert_eq!(err.kind, BridgeErrorKind::SchemaDrift);
    }

    #[test]
    fn search_limit_bounds() {
        assert_eq!(search_limit(&json!({})).unwrap(), 10);
        assert_eq!(search_limit(&json!({"limit": "25"})).unwrap(), 25);
        assert!(search_limit(&json!({"limit": 0})).is_err());
        assert!(search_limit(&json!({"limit": 101})).is_err());
    }
}
