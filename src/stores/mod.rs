//! External collaborator interfaces
//!
//! The gateway never owns identity or ban data; it queries these stores and
//! treats their verdicts as authoritative. All implementations must be
//! cheap to share across connection tasks.

pub mod memory;

use async_trait::async_trait;

use crate::core::address::SourceAddress;
use crate::core::session::Identity;
use crate::error::Result;

pub use memory::{MemoryBanStore, MemorySessionStore, StaticBlocklist, VisitRecord};

/// Credential/session store mapping opaque tokens to account records.
///
/// Token verification happens twice per authenticated connection: once
/// during the handshake and once after acceptance to re-confirm the
/// account. Both calls are single round trips.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Resolve an opaque session token to an identity. An invalid or
    /// expired token is an error; the caller degrades to anonymous.
    async fn verify_token(&self, token: &str) -> Result<Identity>;

    /// Re-confirm an account by name after acceptance.
    async fn fetch_account(&self, name: &str) -> Result<Identity>;

    /// Record a visit for an accepted, logged-in session. Best effort;
    /// failures are logged and otherwise ignored.
    async fn record_visit(&self, address: &SourceAddress, name: &str) -> Result<()>;
}

/// Persistent ban list, matched on exact addresses and containing ranges.
#[async_trait]
pub trait BanStore: Send + Sync {
    async fn is_address_banned(&self, address: &SourceAddress) -> Result<bool>;
}

/// Transport-level block list, e.g. anonymity-network exit nodes.
/// Synchronous: implementations are expected to hold a cached node set.
pub trait ExitNodeBlocklist: Send + Sync {
    fn should_block(&self, address: &SourceAddress) -> bool;
}
