//! Per-caller token-bucket admission control.
//!
//! Every operation on the control surface passes through
//! [`RateGovernor::check`] first. Buckets are created lazily per
//! `(caller, category)` pair, refilled lazily on each request, and guarded by
//! their own mutex so that concurrent callers never wait on each other.
//!
//! # Example
//!
//! ```
//! use camdeck::governor::{BucketLimits, CallerId, RateGovernor};
//!
//! let governor = RateGovernor::new(BucketLimits::new(5.0, 1.0));
//! let caller = CallerId::from_header(Some("alice"));
//!
//! assert!(governor.admit(&caller, 1.0));
//! ```

use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::clock::{Clock, MonotonicClock};
use crate::config::GovernorConfig;

/// Longest caller identifier kept; longer ones are truncated.
pub const MAX_CALLER_ID_LEN: usize = 64;

/// Slack for float drift when comparing tokens with a cost, so that
/// fractional costs that divide the capacity exactly are all admitted.
const TOKEN_EPSILON: f64 = 1e-9;

/// Opaque caller identity used to select a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerId {
    /// Requests that carried no identifier. They share one bucket.
    Anonymous,
    /// A caller-supplied identifier.
    Named(String),
}

impl CallerId {
    /// Build a caller id from an optional raw identifier.
    ///
    /// Missing, empty and whitespace-only values map to [`CallerId::Anonymous`].
    #[must_use]
    pub fn from_header(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(id) if !id.is_empty() => {
                Self::Named(id.chars().take(MAX_CALLER_ID_LEN).collect())
            }
            _ => Self::Anonymous,
        }
    }

    /// Identifier suitable for logs.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Anonymous => "<anonymous>",
            Self::Named(id) => id,
        }
    }
}

impl std::fmt::Display for CallerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Independent budgets per caller.
///
/// Camera control and code analysis share the governor but never draw from
/// the same bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// Camera commands, snapshots and status reads.
    Camera,
    /// Code analysis requests.
    Analysis,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BucketKey {
    caller: CallerId,
    category: Category,
}

/// Capacity and refill rate shared by every bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketLimits {
    /// Maximum tokens held.
    pub capacity: f64,
    /// Tokens added per second.
    pub refill_per_sec: f64,
}

impl BucketLimits {
    /// Create bucket limits.
    #[must_use]
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            capacity,
            refill_per_sec,
        }
    }

    /// Time for an empty bucket to become full again.
    #[must_use]
    pub fn full_refill(&self) -> Duration {
        secs_to_duration(self.capacity / self.refill_per_sec)
    }
}

impl Default for BucketLimits {
    fn default() -> Self {
        Self::new(5.0, 1.0)
    }
}

impl From<&GovernorConfig> for BucketLimits {
    fn from(config: &GovernorConfig) -> Self {
        Self::new(config.capacity, config.refill_per_sec)
    }
}

/// A single token bucket. Invariant: `0 <= tokens <= capacity`.
#[derive(Debug, Clone)]
pub struct Bucket {
    tokens: f64,
    capacity: f64,
    refill_rate: f64,
    last_refill: Instant,
}

impl Bucket {
    /// Create a full bucket.
    #[must_use]
    pub fn full(limits: BucketLimits, now: Instant) -> Self {
        Self {
            tokens: limits.capacity,
            capacity: limits.capacity,
            refill_rate: limits.refill_per_sec,
            last_refill: now,
        }
    }

    /// Tokens currently held, as of the last refill.
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Add the tokens earned since the last refill.
    ///
    /// An instant older than the last refill earns nothing and does not move
    /// the refill mark back.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.refill_rate).min(self.capacity);
        self.last_refill = self.last_refill.max(now);
    }

    /// Refill, then take `cost` tokens if enough are available.
    ///
    /// A denied request leaves the token count as refilled.
    ///
    /// # Errors
    ///
    /// Returns the wait until `cost` tokens would be available.
    pub fn try_consume(&mut self, cost: f64, now: Instant) -> Result<f64, Duration> {
        self.refill(now);
        if self.tokens + TOKEN_EPSILON >= cost {
            self.tokens = (self.tokens - cost).max(0.0);
            Ok(self.tokens)
        } else {
            Err(secs_to_duration((cost - self.tokens) / self.refill_rate))
        }
    }

    /// Whether the bucket would be full at `now` and has seen no request for
    /// at least `idle`. Dropping such a bucket is unobservable.
    fn is_stale(&self, now: Instant, idle: Duration) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill);
        elapsed >= idle && self.tokens + elapsed.as_secs_f64() * self.refill_rate >= self.capacity
    }
}

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    /// The request may proceed.
    Admitted {
        /// Tokens left after paying for this request.
        remaining: f64,
    },
    /// The request was refused.
    Denied {
        /// How long until the same request would be admitted.
        retry_after: Duration,
    },
}

impl Admission {
    /// Whether the request was admitted.
    #[must_use]
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted { .. })
    }

    /// Suggested wait for a denied request.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Admitted { .. } => None,
            Self::Denied { retry_after } => Some(*retry_after),
        }
    }
}

/// Token-bucket admission control keyed by caller and category.
#[derive(Debug)]
pub struct RateGovernor {
    limits: BucketLimits,
    clock: Arc<dyn Clock>,
    buckets: DashMap<BucketKey, Arc<Mutex<Bucket>>>,
}

impl RateGovernor {
    /// Create a governor on the system clock.
    #[must_use]
    pub fn new(limits: BucketLimits) -> Self {
        Self::with_clock(limits, Arc::new(MonotonicClock))
    }

    /// Create a governor reading time from `clock`.
    #[must_use]
    pub fn with_clock(limits: BucketLimits, clock: Arc<dyn Clock>) -> Self {
        Self {
            limits,
            clock,
            buckets: DashMap::new(),
        }
    }

    /// Create a governor from configuration.
    #[must_use]
    pub fn from_config(config: &GovernorConfig) -> Self {
        Self::new(BucketLimits::from(config))
    }

    /// Limits applied to every bucket.
    #[must_use]
    pub fn limits(&self) -> BucketLimits {
        self.limits
    }

    /// Admit a camera-category request of the given cost.
    #[must_use]
    pub fn admit(&self, caller: &CallerId, cost: f64) -> bool {
        self.check(Category::Camera, caller, cost).is_admitted()
    }

    /// Charge `cost` tokens to the caller's bucket for `category`.
    ///
    /// Never fails. A negative or non-finite cost is refused.
    pub fn check(&self, category: Category, caller: &CallerId, cost: f64) -> Admission {
        if !(cost.is_finite() && cost >= 0.0) {
            debug!(caller = %caller, cost, "Refusing request with invalid cost");
            return Admission::Denied {
                retry_after: Duration::ZERO,
            };
        }

        let bucket = self.bucket(category, caller);
        let mut bucket = bucket.lock().unwrap_or_else(PoisonError::into_inner);
        let now = self.clock.now();

        match bucket.try_consume(cost, now) {
            Ok(remaining) => {
                trace!(caller = %caller, ?category, cost, remaining, "Admitted");
                Admission::Admitted { remaining }
            }
            Err(retry_after) => {
                debug!(
                    caller = %caller,
                    ?category,
                    cost,
                    retry_after_ms = retry_after.as_millis(),
                    "Rate limited"
                );
                Admission::Denied { retry_after }
            }
        }
    }

    /// Tokens held by a bucket as of its last refill, if it exists.
    #[must_use]
    pub fn tokens(&self, category: Category, caller: &CallerId) -> Option<f64> {
        let key = BucketKey {
            caller: caller.clone(),
            category,
        };
        let bucket = self.buckets.get(&key).map(|entry| Arc::clone(entry.value()))?;
        let tokens = bucket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .tokens();
        Some(tokens)
    }

    /// Number of live buckets.
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Remove buckets that are idle for at least `idle` and fully refilled.
    ///
    /// A removed bucket is recreated full on the caller's next request, which
    /// is exactly the state it was in, so sweeping never changes admission.
    /// Returns the number of buckets removed.
    pub fn sweep(&self, idle: Duration) -> usize {
        let now = self.clock.now();
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| {
            // The shard is write-locked here, so a count of one means no
            // request is holding this bucket between lookup and lock.
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            match bucket.try_lock() {
                Ok(guard) => !guard.is_stale(now, idle),
                Err(_) => true,
            }
        });

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            debug!(removed, remaining = self.buckets.len(), "Swept idle buckets");
        }
        removed
    }

    fn bucket(&self, category: Category, caller: &CallerId) -> Arc<Mutex<Bucket>> {
        let key = BucketKey {
            caller: caller.clone(),
            category,
        };
        if let Some(entry) = self.buckets.get(&key) {
            return Arc::clone(entry.value());
        }

        let now = self.clock.now();
        let limits = self.limits;
        let entry = self
            .buckets
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(limits, now))));
        Arc::clone(entry.value())
    }
}

/// Run [`RateGovernor::sweep`] every `interval` until `cancel` fires.
pub fn spawn_sweeper(
    governor: Arc<RateGovernor>,
    interval: Duration,
    idle: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("Bucket sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    governor.sweep(idle);
                }
            }
        }
    })
}

fn secs_to_duration(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(Duration::MAX)
}
