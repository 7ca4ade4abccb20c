use crate::constants::rate_limit;
use crate::errors::BridgeError;
use crate::services::logger::Logger;
use governor::clock::Clock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RateLimitTier {
    Bulk,
    Standard,
    Boosted,
    Posting,
}

impl RateLimitTier {
    pub const ALL: [RateLimitTier; 4] = [
        RateLimitTier::Bulk,
        RateLimitTier::Standard,
        RateLimitTier::Boosted,
        RateLimitTier::Posting,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RateLimitTier::Bulk => "bulk",
            RateLimitTier::Standard => "standard",
            RateLimitTier::Boosted => "boosted",
            RateLimitTier::Posting => "posting",
        }
    }

    pub fn default_config(self) -> TierConfig {
        let minute = Duration::from_millis(rate_limit::MINUTE_WINDOW_MS);
        match self {
            RateLimitTier::Bulk => TierConfig::new(rate_limit::BULK_PER_WINDOW, minute, rate_limit::BULK_BURST),
            RateLimitTier::Standard => {
                TierConfig::new(rate_limit::STANDARD_PER_WINDOW, minute, rate_limit::STANDARD_BURST)
            }
            RateLimitTier::Boosted => {
                TierConfig::new(rate_limit::BOOSTED_PER_WINDOW, minute, rate_limit::BOOSTED_BURST)
            }
            RateLimitTier::Posting => TierConfig::new(
                rate_limit::POSTING_PER_WINDOW,
                Duration::from_millis(rate_limit::SECOND_WINDOW_MS),
                rate_limit::POSTING_BURST,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TierConfig {
    pub sustained: u32,
    pub window: Duration,
    pub burst: u32,
}

impl TierConfig {
    pub fn new(sustained: u32, window: Duration, burst: u32) -> Self {
        Self {
            sustained: sustained.max(1),
            window: if window.is_zero() {
                Duration::from_millis(1)
            } else {
                window
            },
            burst,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.sustained.saturating_add(self.burst)
    }

    /// One cell every `window / sustained`, up to `sustained + burst` at once.
    fn quota(&self) -> Quota {
        let period = (self.window / self.sustained).max(Duration::from_nanos(1));
        let burst = NonZeroU32::new(self.capacity()).unwrap_or(NonZeroU32::MIN);
        Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    Immediate,
    Wait(Duration),
}

/// Governor clock backed by tokio's clock, so paused test time drives refill.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now().into_std()
    }
}

type TierLimiter = governor::RateLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<std::time::Instant>>;

/// Independent GCRA limiter per tier. Waiting blocks only the calling task,
/// and a waiter holds nothing, so cancelling or dropping it takes no cell.
pub struct RateLimiter {
    tiers: HashMap<RateLimitTier, (TierConfig, TierLimiter)>,
    logger: Logger,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let configs: HashMap<_, _> = self.tiers.iter().map(|(tier, (config, _))| (*tier, *config)).collect();
        f.debug_struct("RateLimiter").field("tiers", &configs).finish()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_overrides(HashMap::new())
    }

    pub fn with_overrides(overrides: HashMap<RateLimitTier, TierConfig>) -> Self {
        let tiers = RateLimitTier::ALL
            .iter()
            .map(|tier| {
                let config = overrides
                    .get(tier)
                    .copied()
                    .unwrap_or_else(|| tier.default_config());
                let limiter = governor::RateLimiter::direct_with_clock(config.quota(), TokioClock);
                (*tier, (config, limiter))
            })
            .collect();
        Self {
            tiers,
            logger: Logger::new("rate_limiter"),
        }
    }

    fn limiter(&self, tier: RateLimitTier) -> &TierLimiter {
        // Every tier is inserted at construction.
        &self.tiers[&tier].1
    }

    pub fn config(&self, tier: RateLimitTier) -> TierConfig {
        self.tiers[&tier].0
    }

    /// Takes a cell if one is available now; otherwise reports the wait
    /// without taking anything.
    pub fn try_acquire(&self, tier: RateLimitTier) -> Permit {
        match self.limiter(tier).check() {
            Ok(()) => Permit::Immediate,
            Err(not_until) => Permit::Wait(not_until.wait_time_from(TokioClock.now())),
        }
    }

    /// Waits for a cell on `tier`, racing each sleep against `cancel`.
    pub async fn acquire(&self, tier: RateLimitTier, cancel: &CancellationToken) -> Result<(), BridgeError> {
        loop {
            if cancel.is_cancelled() {
                return Err(BridgeError::cancelled("cancelled before acquiring a rate-limit token"));
            }
            let wait = match self.try_acquire(tier) {
                Permit::Immediate => return Ok(()),
                Permit::Wait(wait) => wait,
            };
            self.logger.debug(
                "Waiting for rate-limit token",
                Some(&serde_json::json!({ "tier": tier.as_str(), "wait_ms": wait.as_millis() as u64 })),
            );
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => {
                    return Err(BridgeError::cancelled("cancelled while waiting for a rate-limit token"));
                }
            }
        }
    }
}
