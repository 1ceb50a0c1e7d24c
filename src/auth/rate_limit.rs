//! Sliding-window rate limiting for login and other sensitive endpoints.
//!
//! The store is injected as a trait object and explicitly lifetime-scoped by
//! the server bootstrap; nothing here is ambient global state. The in-memory
//! implementation suits single-instance deployments; multi-instance setups
//! would back the same trait with a shared cache.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Admission decision for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed {
        remaining: u32,
    },
    /// `reset` is the epoch second at which the oldest counted attempt ages
    /// out of the window.
    Limited {
        reset: u64,
    },
}

impl RateLimitDecision {
    #[must_use]
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited { .. })
    }

    /// Epoch second when capacity frees up, for `Limited` decisions only.
    #[must_use]
    pub fn reset_epoch_seconds(&self) -> Option<u64> {
        match self {
            Self::Limited { reset } => Some(*reset),
            Self::Allowed { .. } => None,
        }
    }
}

pub trait RateLimiter: Send + Sync {
    /// Check and record one attempt for `key` (e.g. `login:<client-ip>`).
    /// When the decision is `Limited`, the attempt is not recorded.
    fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision;
}

/// Pass-through limiter for tests and deployments that disable limiting.
#[derive(Clone, Copy, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check(&self, _key: &str, limit: u32, _window: Duration) -> RateLimitDecision {
        RateLimitDecision::Allowed { remaining: limit }
    }
}

const CLEANUP_INTERVAL_MS: u64 = 5 * 60 * 1000;

struct Buckets {
    counts: HashMap<String, Vec<u64>>,
    last_cleanup_ms: u64,
}

/// In-process sliding-window counters. Each check is one atomic
/// read-modify-write under the store lock, so concurrent requests cannot
/// race past the limit.
pub struct SlidingWindowLimiter {
    inner: Mutex<Buckets>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SlidingWindowLimiter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Buckets {
                counts: HashMap::new(),
                last_cleanup_ms: now_ms(),
            }),
        }
    }

    /// Window check against an explicit clock; `check` supplies the real one.
    fn check_at(&self, key: &str, limit: u32, window_ms: u64, now_ms: u64) -> RateLimitDecision {
        let Ok(mut buckets) = self.inner.lock() else {
            // A poisoned lock means a panic elsewhere; fail open rather than
            // taking the whole auth path down.
            return RateLimitDecision::Allowed { remaining: limit };
        };

        if now_ms.saturating_sub(buckets.last_cleanup_ms) > CLEANUP_INTERVAL_MS {
            let cutoff = now_ms.saturating_sub(window_ms);
            buckets
                .counts
                .retain(|_, timestamps| timestamps.iter().any(|&t| t > cutoff));
            buckets.last_cleanup_ms = now_ms;
        }

        let window_start = now_ms.saturating_sub(window_ms);
        let timestamps = buckets.counts.entry(key.to_string()).or_default();
        timestamps.retain(|&t| t > window_start);

        if timestamps.len() >= limit as usize {
            let oldest = timestamps.iter().min().copied().unwrap_or(now_ms);
            return RateLimitDecision::Limited {
                reset: (oldest + window_ms) / 1000,
            };
        }

        timestamps.push(now_ms);
        let remaining = limit - u32::try_from(timestamps.len()).unwrap_or(limit);
        RateLimitDecision::Allowed { remaining }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitDecision {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.check_at(key, limit, window_ms, now_ms())
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
