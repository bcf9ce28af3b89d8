//! Per-address count of concurrently open sessions

use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::core::address::SourceAddress;

/// Tracks how many sessions are currently open from each source address.
///
/// Entries are pruned as soon as the count returns to zero so addresses
/// seen only transiently do not accumulate.
pub struct ConnectionCounter {
    counts: RwLock<HashMap<SourceAddress, usize>>,
}

impl ConnectionCounter {
    pub fn new() -> Self {
        Self {
            counts: RwLock::new(HashMap::new()),
        }
    }

    /// Record a newly opened session. Returns the updated count.
    pub async fn increment(&self, address: SourceAddress) -> usize {
        let mut counts = self.counts.write().await;
        let count = counts.entry(address).or_insert(0);
        *count += 1;
        *count
    }

    /// Record a new session only if doing so stays within `max`. Check and
    /// increment happen under one lock so concurrent accepts from the same
    /// address cannot overshoot the cap.
    pub async fn try_increment(&self, address: SourceAddress, max: usize) -> bool {
        let mut counts = self.counts.write().await;
        let count = counts.entry(address).or_insert(0);
        if *count + 1 > max {
            // Don't leave behind a zero entry for a rejected first attempt
            if *count == 0 {
                counts.remove(&address);
            }
            return false;
        }
        *count += 1;
        true
    }

    /// Record a closed session, pruning the entry at zero. Decrementing an
    /// untracked address is a no-op.
    pub async fn decrement(&self, address: SourceAddress) {
        let mut counts = self.counts.write().await;
        if let Some(count) = counts.get_mut(&address) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&address);
            }
        }
    }

    /// Current open-session count for an address.
    pub async fn count(&self, address: SourceAddress) -> usize {
        let counts = self.counts.read().await;
        *counts.get(&address).unwrap_or(&0)
    }

    /// Number of addresses currently tracked.
    pub async fn tracked(&self) -> usize {
        self.counts.read().await.len()
    }
}

impl Default for ConnectionCounter {
    fn default() -> Self {
        Self::new()
    }
}
