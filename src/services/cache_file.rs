use crate::constants::cache::PERSISTED_VERSION;
use crate::errors::BridgeError;
use crate::services::directory::{DirectoryEntry, DirectoryKind};
use crate::services::directory_cache::DirectorySnapshot;
use crate::services::logger::Logger;
use crate::utils::fs_atomic::atomic_write_text_file;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSnapshot<T> {
    pub version: u32,
    pub kind: DirectoryKind,
    pub fetched_at: DateTime<Utc>,
    pub entries: Vec<T>,
}

/// On-disk copy of one directory. Anything unusable reads as a miss.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    ttl: Duration,
    logger: Logger,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            path: path.into(),
            ttl,
            logger: Logger::new("cache_file"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn encode<T: DirectoryEntry>(snapshot: &DirectorySnapshot<T>) -> Result<String, BridgeError> {
        let fetched_at = snapshot
            .fetched_at()
            .ok_or_else(|| BridgeError::internal("cannot persist a directory that was never fetched"))?;
        let persisted = PersistedSnapshot {
            version: PERSISTED_VERSION,
            kind: T::KIND,
            fetched_at,
            entries: snapshot.iter().cloned().collect::<Vec<T>>(),
        };
        serde_json::to_string(&persisted)
            .map_err(|err| BridgeError::internal(format!("failed to encode directory cache: {}", err)))
    }

    pub fn store<T: DirectoryEntry>(&self, snapshot: &DirectorySnapshot<T>) -> Result<(), BridgeError> {
        let text = Self::encode(snapshot)?;
        atomic_write_text_file(&self.path, &text, 0o600)?;
        Ok(())
    }

    pub fn load<T: DirectoryEntry>(&self) -> Option<DirectorySnapshot<T>> {
        let meta = serde_json::json!({ "path": self.path.display().to_string(), "kind": T::KIND.as_str() });
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                self.logger.debug("No persisted directory cache", Some(&meta));
                return None;
            }
            Err(err) => {
                self.logger.warn(&format!("Failed to read directory cache: {}", err), Some(&meta));
                return None;
            }
        };
        let persisted: PersistedSnapshot<T> = match serde_json::from_str(&text) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.logger.warn(&format!("Ignoring corrupt directory cache: {}", err), Some(&meta));
                return None;
            }
        };
        if persisted.version != PERSISTED_VERSION || persisted.kind != T::KIND {
            self.logger.info("Ignoring directory cache from another format", Some(&meta));
            return None;
        }
        let age = (Utc::now() - persisted.fetched_at).to_std().unwrap_or(Duration::ZERO);
        if age >= self.ttl {
            self.logger.info("Persisted directory cache is stale", Some(&meta));
            return None;
        }
        Some(DirectorySnapshot::from_entries(persisted.entries, persisted.fetched_at))
    }
}
