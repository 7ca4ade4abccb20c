use crate::constants::pagination::MAX_DIRECTORY_PAGES;
use crate::errors::BridgeError;
use crate::services::cache_file::CacheFile;
use crate::services::directory::DirectoryEntry;
use crate::services::directory_sources::DirectorySource;
use crate::services::logger::Logger;
use crate::utils::duration::format_wait;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Immutable, complete view of one directory.
#[derive(Debug, Clone)]
pub struct DirectorySnapshot<T> {
    entries: BTreeMap<String, T>,
    fetched_at: Option<DateTime<Utc>>,
    /// Set only when every page of the listing was accumulated.
    complete: bool,
    index: HashMap<String, String>,
}

impl<T: DirectoryEntry> DirectorySnapshot<T> {
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            fetched_at: None,
            complete: false,
            index: HashMap::new(),
        }
    }

    /// Snapshot of a full listing, as produced after the last page.
    pub fn from_entries(entries: Vec<T>, fetched_at: DateTime<Utc>) -> Self {
        let entries: BTreeMap<String, T> = entries
            .into_iter()
            .map(|entry| (entry.id().to_string(), entry))
            .collect();
        let mut index = HashMap::new();
        for (id, entry) in &entries {
            for key in entry.lookup_keys() {
                index.entry(key).or_insert_with(|| id.clone());
            }
        }
        Self {
            entries,
            fetched_at: Some(fetched_at),
            complete: true,
            index,
        }
    }

    /// A snapshot is ready once a complete listing has been published.
    pub fn is_ready(&self) -> bool {
        self.complete && self.fetched_at.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn fetched_at(&self) -> Option<DateTime<Utc>> {
        self.fetched_at
    }

    pub fn age(&self) -> Option<Duration> {
        self.fetched_at
            .map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO))
    }

    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.get(id)
    }

    /// Case-insensitive lookup on the name index.
    pub fn find_by_key(&self, key: &str) -> Option<&T> {
        let id = self.index.get(&key.trim().to_lowercase())?;
        self.entries.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: DirectoryEntry> PartialEq for DirectorySnapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        self.fetched_at == other.fetched_at && self.complete == other.complete && self.entries == other.entries
    }
}

/// Rate-limits forced refreshes. Stores milliseconds since `origin` plus one;
/// zero means never claimed.
#[derive(Debug)]
pub struct ForceRefreshGate {
    origin: Instant,
    last_claim: AtomicU64,
    interval: Duration,
}

impl ForceRefreshGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_claim: AtomicU64::new(0),
            interval,
        }
    }

    /// Claims the gate, or returns how long until it can be claimed.
    pub fn try_claim(&self) -> Result<(), Duration> {
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        let interval = self.interval.as_millis() as u64;
        let mut current = self.last_claim.load(Ordering::Acquire);
        loop {
            if current != 0 {
                let since = now.saturating_sub(current);
                if since < interval {
                    return Err(Duration::from_millis(interval - since));
                }
            }
            match self
                .last_claim
                .compare_exchange_weak(current, now, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(actual) => current = actual,
            }
        }
    }

    pub fn remaining(&self) -> Duration {
        let current = self.last_claim.load(Ordering::Acquire);
        if current == 0 {
            return Duration::ZERO;
        }
        let now = self.origin.elapsed().as_millis() as u64 + 1;
        let interval = self.interval.as_millis() as u64;
        Duration::from_millis(interval.saturating_sub(now.saturating_sub(current)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The snapshot was already fresh; nothing was fetched.
    Fresh,
    Refreshed { entries: usize },
}

pub struct DirectoryCache<T: DirectoryEntry> {
    slot: ArcSwap<DirectorySnapshot<T>>,
    source: Arc<dyn DirectorySource<T>>,
    ttl: Duration,
    gate: ForceRefreshGate,
    refresh_lock: Mutex<()>,
    ready: watch::Sender<bool>,
    persistence: OnceCell<CacheFile>,
    fetch_cycles: AtomicU64,
    logger: Logger,
}

impl<T: DirectoryEntry> DirectoryCache<T> {
    pub fn new(source: Arc<dyn DirectorySource<T>>, ttl: Duration, min_force_interval: Duration) -> Self {
        let (ready, _) = watch::channel(false);
        Self {
            slot: ArcSwap::from_pointee(DirectorySnapshot::empty()),
            source,
            ttl,
            gate: ForceRefreshGate::new(min_force_interval),
            refresh_lock: Mutex::new(()),
            ready,
            persistence: OnceCell::new(),
            fetch_cycles: AtomicU64::new(0),
            logger: Logger::new("directory").child(T::KIND.as_str()),
        }
    }

    /// Current snapshot. Never blocks and never touches the network.
    pub fn get(&self) -> Arc<DirectorySnapshot<T>> {
        self.slot.load_full()
    }

    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    pub async fn wait_ready(&self, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let mut rx = self.ready.subscribe();
        tokio::select! {
            res = rx.wait_for(|ready| *ready) => res
                .map(|_| ())
                .map_err(|_| BridgeError::internal("directory readiness channel closed")),
            _ = cancel.cancelled() => Err(BridgeError::cancelled(format!(
                "stopped waiting for the {} directory",
                T::KIND.as_str()
            ))),
        }
    }

    /// Attaches the on-disk copy. Only the first call has an effect.
    pub fn attach_persistence(&self, file: CacheFile) -> bool {
        self.persistence.set(file).is_ok()
    }

    /// Publishes the persisted snapshot if it is present and within TTL.
    pub fn load_persisted(&self) -> bool {
        let Some(file) = self.persistence.get() else {
            return false;
        };
        match file.load::<T>() {
            Some(snapshot) => {
                self.logger.info(
                    "Loaded persisted directory",
                    Some(&serde_json::json!({
                        "entries": snapshot.len(),
                        "path": file.path().display().to_string(),
                    })),
                );
                self.replace(snapshot);
                true
            }
            None => false,
        }
    }

    /// Swaps in a complete snapshot in one step.
    pub fn replace(&self, snapshot: DirectorySnapshot<T>) {
        let ready = snapshot.is_ready();
        self.slot.store(Arc::new(snapshot));
        if ready {
            self.ready.send_replace(true);
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_fresh(&self) -> bool {
        match self.get().age() {
            Some(age) => age < self.ttl,
            None => false,
        }
    }

    pub fn time_until_stale(&self) -> Duration {
        match self.get().age() {
            Some(age) => self.ttl.saturating_sub(age),
            None => Duration::ZERO,
        }
    }

    /// How many full listings have been started.
    pub fn fetch_count(&self) -> u64 {
        self.fetch_cycles.load(Ordering::Relaxed)
    }

    pub fn force_refresh_remaining(&self) -> Duration {
        self.gate.remaining()
    }

    pub async fn refresh(&self, force: bool, cancel: &CancellationToken) -> Result<RefreshOutcome, BridgeError> {
        if force {
            if let Err(wait) = self.gate.try_claim() {
                return Err(BridgeError::rate_limited(
                    format!("{} directory was force-refreshed recently", T::KIND.as_str()),
                    wait,
                )
                .with_hint(format!("Retry in {}.", format_wait(wait))));
            }
        } else if self.is_fresh() {
            return Ok(RefreshOutcome::Fresh);
        }

        let _guard = tokio::select! {
            guard = self.refresh_lock.lock() => guard,
            _ = cancel.cancelled() => {
                return Err(BridgeError::cancelled("refresh cancelled while waiting for another refresh"));
            }
        };
        if !force && self.is_fresh() {
            return Ok(RefreshOutcome::Fresh);
        }

        let started = Instant::now();
        let entries = match self.fetch_all(cancel).await {
            Ok(entries) => entries,
            Err(err) => {
                self.logger.warn(
                    "Directory refresh failed; keeping previous snapshot",
                    Some(&serde_json::json!({ "error": err.code, "message": err.message, "forced": force })),
                );
                return Err(err);
            }
        };

        let snapshot = DirectorySnapshot::from_entries(entries, Utc::now());
        let count = snapshot.len();
        if let Some(file) = self.persistence.get() {
            if let Err(err) = file.store(&snapshot) {
                self.logger.warn(
                    "Failed to persist directory snapshot",
                    Some(&serde_json::json!({ "error": err.message, "path": file.path().display().to_string() })),
                );
            }
        }
        self.replace(snapshot);
        self.logger.info(
            "Directory refreshed",
            Some(&serde_json::json!({
                "entries": count,
                "forced": force,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            })),
        );
        Ok(RefreshOutcome::Refreshed { entries: count })
    }

    async fn fetch_all(&self, cancel: &CancellationToken) -> Result<Vec<T>, BridgeError> {
        self.fetch_cycles.fetch_add(1, Ordering::Relaxed);
        let mut accumulated = Vec::new();
        let mut cursor: Option<String> = None;
        let mut seen = HashSet::new();
        let mut pages = 0usize;
        loop {
            pages += 1;
            if pages > MAX_DIRECTORY_PAGES {
                return Err(BridgeError::schema_drift(format!(
                    "{} listing did not finish within {} pages",
                    T::KIND.as_str(),
                    MAX_DIRECTORY_PAGES
                )));
            }
            let page = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(BridgeError::cancelled(format!("{} refresh cancelled", T::KIND.as_str())));
                }
                page = self.source.fetch_page(cursor.as_deref(), cancel) => page?,
            };
            accumulated.extend(page.entries);
            match page.next_cursor {
                None => return Ok(accumulated),
                Some(next) => {
                    if !seen.insert(next.clone()) {
                        return Err(BridgeError::schema_drift(format!(
                            "{} listing repeated cursor",
                            T::KIND.as_str()
                        )));
                    }
                    cursor = Some(next);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn gate_reports_remaining_wait() {
        let gate = ForceRefreshGate::new(Duration::from_secs(30));
        assert!(gate.try_claim().is_ok());
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(gate.try_claim(), Err(Duration::from_secs(25)));
        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(gate.try_claim().is_ok());
    }

    #[test]
    fn empty_snapshot_is_not_ready() {
        let snapshot: DirectorySnapshot<crate::services::directory::User> = DirectorySnapshot::empty();
        assert!(!snapshot.is_ready());
        assert!(!snapshot.is_complete());
        assert!(snapshot.age().is_none());
    }
}
