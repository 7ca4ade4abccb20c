use crate::constants::cache::{FAILED_REFRESH_RETRY_MS, MIN_REFRESH_TICK_MS};
use crate::errors::BridgeErrorKind;
use crate::services::directory::DirectoryEntry;
use crate::services::directory_cache::{DirectoryCache, RefreshOutcome};
use crate::services::logger::Logger;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct RefreshTiming {
    /// Floor for the wait between successful ticks.
    pub min_tick: Duration,
    /// Wait after a failed or panicked tick.
    pub retry_after_failure: Duration,
}

impl Default for RefreshTiming {
    fn default() -> Self {
        Self {
            min_tick: Duration::from_millis(MIN_REFRESH_TICK_MS),
            retry_after_failure: Duration::from_millis(FAILED_REFRESH_RETRY_MS),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return text.to_string();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }
    "unknown panic".to_string()
}

/// Keeps one directory fresh until `cancel` fires. Failures and panics are
/// logged and retried; they never end the loop.
pub fn spawn_refresh_loop<T: DirectoryEntry>(
    cache: Arc<DirectoryCache<T>>,
    cancel: CancellationToken,
    timing: RefreshTiming,
) -> JoinHandle<()> {
    let logger = Logger::new("refresh").child(T::KIND.as_str());
    tokio::spawn(async move {
        let retry_wait = timing.retry_after_failure.min(cache.ttl());
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let tick = AssertUnwindSafe(cache.refresh(false, &cancel)).catch_unwind().await;
            let wait = match tick {
                Ok(Ok(outcome)) => {
                    if let RefreshOutcome::Refreshed { entries } = outcome {
                        logger.debug(
                            "Scheduled refresh completed",
                            Some(&serde_json::json!({ "entries": entries })),
                        );
                    }
                    cache.time_until_stale().max(timing.min_tick)
                }
                Ok(Err(err)) if err.is(BridgeErrorKind::Cancelled) && cancel.is_cancelled() => break,
                Ok(Err(err)) => {
                    logger.warn(
                        "Scheduled refresh failed",
                        Some(&serde_json::json!({
                            "error": err.code,
                            "message": err.message,
                            "retry_in_ms": retry_wait.as_millis() as u64,
                        })),
                    );
                    retry_wait
                }
                Err(payload) => {
                    logger.error(
                        "Scheduled refresh panicked",
                        Some(&serde_json::json!({ "panic": panic_message(payload.as_ref()) })),
                    );
                    retry_wait
                }
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => break,
            }
        }
        logger.debug("Refresh loop stopped", None);
    })
}

/// Owns the refresh loops of a provider.
pub struct RefreshSupervisor {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl RefreshSupervisor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            handles: Vec::new(),
        }
    }

    pub fn supervise<T: DirectoryEntry>(&mut self, cache: Arc<DirectoryCache<T>>, timing: RefreshTiming) {
        let handle = spawn_refresh_loop(cache, self.cancel.child_token(), timing);
        self.handles.push(handle);
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}
