//! In-memory store implementations
//!
//! Used by tests and by deployments that load their ban and blocklist data
//! at startup. Backed by `tokio::sync::RwLock` maps like the rest of the
//! gateway's shared state.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::core::address::SourceAddress;
use crate::core::session::Identity;
use crate::error::{GatewardError, Result};
use crate::stores::{BanStore, ExitNodeBlocklist, SessionStore};

/// In-memory ban list supporting exact-address bans plus /24 and /16 style
/// ranges for IPv4 and /64 and /48 group-prefix ranges for IPv6. Range
/// entries are stored as the prefix derived from any member address.
pub struct MemoryBanStore {
    exact: RwLock<HashSet<String>>,
    ranges: RwLock<HashSet<String>>,
    wide_ranges: RwLock<HashSet<String>>,
}

impl MemoryBanStore {
    pub fn new() -> Self {
        Self {
            exact: RwLock::new(HashSet::new()),
            ranges: RwLock::new(HashSet::new()),
            wide_ranges: RwLock::new(HashSet::new()),
        }
    }

    /// Ban a single address.
    pub async fn ban_address(&self, address: &SourceAddress) {
        self.exact.write().await.insert(address.canonical());
    }

    /// Ban the range containing `address` (/24 for IPv4, /64 for IPv6).
    pub async fn ban_range(&self, address: &SourceAddress) {
        self.ranges.write().await.insert(address.range_key());
    }

    /// Ban the wide range containing `address` (/16 for IPv4, /48 for IPv6).
    pub async fn ban_wide_range(&self, address: &SourceAddress) {
        self.wide_ranges.write().await.insert(address.wide_range_key());
    }

    pub async fn lift_address_ban(&self, address: &SourceAddress) {
        self.exact.write().await.remove(&address.canonical());
    }

    pub async fn lift_range_ban(&self, address: &SourceAddress) {
        self.ranges.write().await.remove(&address.range_key());
        self.wide_ranges.write().await.remove(&address.wide_range_key());
    }
}

impl Default for MemoryBanStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BanStore for MemoryBanStore {
    async fn is_address_banned(&self, address: &SourceAddress) -> Result<bool> {
        if self.exact.read().await.contains(&address.canonical()) {
            return Ok(true);
        }
        if self.ranges.read().await.contains(&address.range_key()) {
            return Ok(true);
        }
        Ok(self
            .wide_ranges
            .read()
            .await
            .contains(&address.wide_range_key()))
    }
}

/// Fixed blocklist of exit-node addresses loaded at startup.
pub struct StaticBlocklist {
    addresses: HashSet<SourceAddress>,
}

impl StaticBlocklist {
    pub fn new<I>(addresses: I) -> Self
    where
        I: IntoIterator<Item = SourceAddress>,
    {
        Self {
            addresses: addresses.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

impl ExitNodeBlocklist for StaticBlocklist {
    fn should_block(&self, address: &SourceAddress) -> bool {
        self.addresses.contains(address)
    }
}

/// A visit recorded for a logged-in session.
#[derive(Debug, Clone, PartialEq)]
pub struct VisitRecord {
    pub address: SourceAddress,
    pub name: String,
    pub at: DateTime<Utc>,
}

/// In-memory session store keyed by opaque token, with accounts also
/// addressable by name for the post-accept confirmation call.
pub struct MemorySessionStore {
    tokens: RwLock<HashMap<String, Identity>>,
    accounts: RwLock<HashMap<String, Identity>>,
    visits: RwLock<Vec<VisitRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            accounts: RwLock::new(HashMap::new()),
            visits: RwLock::new(Vec::new()),
        }
    }

    /// Register a token and its account.
    pub async fn insert(&self, token: &str, identity: Identity) {
        self.accounts
            .write()
            .await
            .insert(identity.name.clone(), identity.clone());
        self.tokens.write().await.insert(token.to_string(), identity);
    }

    /// Remove an account so the post-accept confirmation fails while the
    /// token still resolves during the handshake.
    pub async fn revoke_account(&self, name: &str) {
        self.accounts.write().await.remove(name);
    }

    pub async fn visits(&self) -> Vec<VisitRecord> {
        self.visits.read().await.clone()
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn verify_token(&self, token: &str) -> Result<Identity> {
        self.tokens
            .read()
            .await
            .get(token)
            .cloned()
            .ok_or_else(|| {
                GatewardError::IdentityResolutionFailed("unknown or expired token".to_string())
            })
    }

    async fn fetch_account(&self, name: &str) -> Result<Identity> {
        self.accounts.read().await.get(name).cloned().ok_or_else(|| {
            GatewardError::IdentityResolutionFailed(format!("no account named '{}'", name))
        })
    }

    async fn record_visit(&self, address: &SourceAddress, name: &str) -> Result<()> {
        self.visits.write().await.push(VisitRecord {
            address: *address,
            name: name.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SourceAddress {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_exact_ban_and_lift() {
        let store = MemoryBanStore::new();
        let a = addr("203.0.113.7");

        assert!(!store.is_address_banned(&a).await.unwrap());
        store.ban_address(&a).await;
        assert!(store.is_address_banned(&a).await.unwrap());
        // A neighbor in the same /24 is unaffected by an exact ban
        assert!(!store.is_address_banned(&addr("203.0.113.8")).await.unwrap());

        store.lift_address_ban(&a).await;
        assert!(!store.is_address_banned(&a).await.unwrap());
    }

    #[tokio::test]
    async fn test_range_ban_matches_members() {
        let store = MemoryBanStore::new();
        store.ban_range(&addr("203.0.113.7")).await;

        assert!(store.is_address_banned(&addr("203.0.113.200")).await.unwrap());
        assert!(!store.is_address_banned(&addr("203.0.114.7")).await.unwrap());

        store.ban_wide_range(&addr("198.51.0.1")).await;
        assert!(store.is_address_banned(&addr("198.51.255.9")).await.unwrap());
        assert!(!store.is_address_banned(&addr("198.52.0.1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_ipv6_range_ban_uses_expanded_form() {
        let store = MemoryBanStore::new();
        store.ban_range(&addr("2001:db8::1")).await;

        // Any address in the same /64 matches, regardless of textual form
        assert!(store
            .is_address_banned(&addr("2001:0db8:0000:0000:dead:beef:0:1"))
            .await
            .unwrap());
        assert!(!store
            .is_address_banned(&addr("2001:db8:0:1::1"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_session_store_token_and_account() {
        let store = MemorySessionStore::new();
        let alice = Identity {
            name: "alice".to_string(),
            rank: 2,
        };
        store.insert("tok-1", alice.clone()).await;

        assert_eq!(store.verify_token("tok-1").await.unwrap(), alice);
        assert!(store.verify_token("tok-2").await.is_err());
        assert_eq!(store.fetch_account("alice").await.unwrap(), alice);

        store.revoke_account("alice").await;
        assert!(store.fetch_account("alice").await.is_err());
        // The token itself still resolves; only confirmation fails
        assert!(store.verify_token("tok-1").await.is_ok());
    }
}
