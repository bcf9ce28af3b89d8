//! Connection rate limiting
//!
//! The limiter is a two-tier policy rather than a textbook token bucket: a
//! burst allowance that resets after a full cooldown, with a minimum
//! inter-arrival gate once the burst is exhausted. The three-branch
//! structure below is load-bearing and must not be reordered.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

use crate::constants::{DEFAULT_BURST, DEFAULT_SUSTAINED_RATE};
use crate::core::address::SourceAddress;

/// Rate limiting policy: a burst allowance, a sustained event rate, and an
/// optional explicit cooldown (defaults to `burst / sustained`).
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    pub burst: u32,
    pub sustained: f64,
    pub cooldown: Option<Duration>,
}

impl RatePolicy {
    pub fn new(burst: u32, sustained: f64) -> Self {
        Self {
            burst,
            sustained,
            cooldown: None,
        }
    }

    /// Idle duration after which the burst allowance fully resets.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
            .unwrap_or_else(|| Duration::from_secs_f64(self.burst as f64 / self.sustained))
    }

    /// Minimum spacing between events once the burst is exhausted.
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sustained)
    }
}

impl Default for RatePolicy {
    fn default() -> Self {
        Self {
            burst: DEFAULT_BURST,
            sustained: DEFAULT_SUSTAINED_RATE,
            cooldown: None,
        }
    }
}

/// Mutable throttle state for one source address.
#[derive(Debug)]
pub struct Limiter {
    count: u32,
    last_event: Option<Instant>,
}

impl Limiter {
    pub fn new() -> Self {
        Self {
            count: 0,
            last_event: None,
        }
    }

    /// Evaluate one event against the policy. Returns true when the event
    /// must be throttled.
    pub fn throttle(&mut self, policy: &RatePolicy) -> bool {
        self.throttle_at(policy, Instant::now())
    }

    /// Clock-injected form of `throttle`, used directly by tests.
    pub fn throttle_at(&mut self, policy: &RatePolicy, now: Instant) -> bool {
        let last = match self.last_event {
            Some(last) => last,
            None => {
                // First event ever observed; equivalent to a full cooldown
                self.count = 1;
                self.last_event = Some(now);
                return false;
            }
        };

        // Cooled down, allow and clear the burst buffer
        if now.duration_since(last) > policy.cooldown() {
            self.count = 1;
            self.last_event = Some(now);
            return false;
        }

        // Haven't reached the burst cap yet, allow
        if self.count < policy.burst {
            self.count += 1;
            self.last_event = Some(now);
            return false;
        }

        // Burst exhausted: gate on the sustained rate. Note that `count` is
        // intentionally not incremented here; a trickling source stays on
        // this path until a full cooldown elapses.
        let elapsed = now.duration_since(last);
        if elapsed < policy.min_interval() {
            return true;
        }

        self.last_event = Some(now);
        false
    }

    pub fn last_event(&self) -> Option<Instant> {
        self.last_event
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazily creates one `Limiter` per source address and sweeps idle entries
/// so transient addresses do not accumulate.
pub struct LimiterRegistry {
    limiters: RwLock<HashMap<SourceAddress, Arc<Mutex<Limiter>>>>,
    idle_threshold: Duration,
}

impl LimiterRegistry {
    pub fn new(idle_threshold: Duration) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            idle_threshold,
        }
    }

    /// Evaluate one event for `address`, creating its limiter on first use.
    /// Returns true when the event must be rejected.
    ///
    /// Creation is atomic per key; events for distinct addresses only
    /// contend on the brief map lookup, never on each other's limiter.
    pub async fn throttle(&self, address: SourceAddress, policy: &RatePolicy) -> bool {
        let limiter = {
            let map = self.limiters.read().await;
            map.get(&address).cloned()
        };

        let limiter = match limiter {
            Some(limiter) => limiter,
            None => {
                let mut map = self.limiters.write().await;
                map.entry(address)
                    .or_insert_with(|| Arc::new(Mutex::new(Limiter::new())))
                    .clone()
            }
        };

        let mut limiter = limiter.lock().await;
        limiter.throttle(policy)
    }

    /// Remove limiters idle longer than the threshold. Returns the number
    /// of entries removed.
    pub async fn sweep(&self) -> usize {
        self.sweep_at(Instant::now()).await
    }

    /// Clock-injected form of `sweep`, used directly by tests.
    pub async fn sweep_at(&self, now: Instant) -> usize {
        let mut map = self.limiters.write().await;
        let before = map.len();
        map.retain(|_, limiter| {
            match limiter.try_lock() {
                Ok(limiter) => match limiter.last_event() {
                    Some(last) => now.duration_since(last) <= self.idle_threshold,
                    None => false,
                },
                // An in-flight throttle holds the lock; keep the entry and
                // let a later sweep reconsider it
                Err(_) => true,
            }
        });
        before - map.len()
    }

    pub async fn contains(&self, address: &SourceAddress) -> bool {
        self.limiters.read().await.contains_key(address)
    }

    pub async fn len(&self) -> usize {
        self.limiters.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.limiters.read().await.is_empty()
    }

    /// Start the periodic sweep as a background task. The returned handle
    /// is used to stop the task at gateway shutdown.
    pub fn start_sweep_task(
        self: Arc<Self>,
        sweep_interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            interval.tick().await; // first tick completes immediately
            loop {
                interval.tick().await;
                let removed = self.sweep().await;
                if removed > 0 {
                    log::debug!("Limiter sweep removed {} idle entries", removed);
                }
            }
        })
    }
}
