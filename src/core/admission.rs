//! Connection admission pipeline
//!
//! Runs a fixed sequence of checks against a connection's source address
//! and stops at the first failure. The order matters: earlier checks are
//! cheaper, and later ones have side effects (the concurrency check
//! reserves a counter slot) that must only happen once everything before
//! them has passed.

use std::fmt;
use std::sync::Arc;

use log::{info, warn};

use crate::config::{BanFailPolicy, GatewayConfig};
use crate::core::address::SourceAddress;
use crate::core::connection_counter::ConnectionCounter;
use crate::core::rate_limiter::LimiterRegistry;
use crate::stores::{BanStore, ExitNodeBlocklist};

/// Why a connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    TorBlocked,
    RateLimited,
    GloballyBanned,
    TooManyConnections,
}

impl RejectReason {
    /// Human-readable text sent to the peer with the kick message.
    pub fn message(&self) -> &'static str {
        match self {
            Self::TorBlocked => {
                "This server does not allow connections from Tor.  \
                 Please log in with your regular internet connection."
            }
            Self::RateLimited => {
                "Your IP address is connecting too quickly.  Please \
                 wait 10 seconds before joining again."
            }
            Self::GloballyBanned => "Your IP is globally banned.",
            Self::TooManyConnections => "Too many connections from your IP address",
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TorBlocked => "tor blocked",
            Self::RateLimited => "rate limited",
            Self::GloballyBanned => "globally banned",
            Self::TooManyConnections => "too many connections",
        };
        write!(f, "{}", name)
    }
}

/// Outcome of running the pipeline for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionVerdict {
    Accept,
    Reject(RejectReason),
}

/// Ordered admission checks over injected shared state. One pipeline
/// instance serves all connections.
pub struct AdmissionPipeline {
    config: Arc<GatewayConfig>,
    limiters: Arc<LimiterRegistry>,
    counter: Arc<ConnectionCounter>,
    ban_store: Arc<dyn BanStore>,
    blocklist: Option<Arc<dyn ExitNodeBlocklist>>,
}

impl AdmissionPipeline {
    pub fn new(
        config: Arc<GatewayConfig>,
        limiters: Arc<LimiterRegistry>,
        counter: Arc<ConnectionCounter>,
        ban_store: Arc<dyn BanStore>,
        blocklist: Option<Arc<dyn ExitNodeBlocklist>>,
    ) -> Self {
        Self {
            config,
            limiters,
            counter,
            ban_store,
            blocklist,
        }
    }

    /// Run the checks for one newly accepted connection.
    ///
    /// On `Accept` the connection counter has already been incremented for
    /// `address`; the caller must pair it with a decrement on disconnect.
    /// On `Reject` no state was reserved.
    pub async fn admit(&self, address: SourceAddress) -> AdmissionVerdict {
        // 1. Transport-level block list
        if self.config.block_exit_nodes {
            if let Some(blocklist) = &self.blocklist {
                if blocklist.should_block(&address) {
                    info!("Blocked Tor exit node {}", address.masked());
                    return AdmissionVerdict::Reject(RejectReason::TorBlocked);
                }
            }
        }

        // 2. Exempt addresses skip the remaining checks but still count
        //    toward the per-address total
        if self.config.exempt_addresses.contains(&address) {
            self.counter.increment(address).await;
            return AdmissionVerdict::Accept;
        }

        // 3. Connection rate limit
        if self
            .limiters
            .throttle(address, &self.config.connect_policy)
            .await
        {
            warn!("IP throttled: {}", address.masked());
            return AdmissionVerdict::Reject(RejectReason::RateLimited);
        }

        // 4. Global ban
        if self.check_ban(&address).await {
            info!("Rejecting {} - globally banned", address.masked());
            return AdmissionVerdict::Reject(RejectReason::GloballyBanned);
        }

        // 5. Per-address concurrency cap; reserves the counter slot
        if !self
            .counter
            .try_increment(address, self.config.max_connections_per_ip)
            .await
        {
            info!("Rejecting {} - too many connections", address.masked());
            return AdmissionVerdict::Reject(RejectReason::TooManyConnections);
        }

        AdmissionVerdict::Accept
    }

    /// Query the ban store under a deadline. An error or timeout resolves
    /// to the configured fail policy instead of hanging the pipeline.
    async fn check_ban(&self, address: &SourceAddress) -> bool {
        let fail_banned = self.config.ban_fail_policy == BanFailPolicy::FailClosed;
        match tokio::time::timeout(
            self.config.ban_store_timeout,
            self.ban_store.is_address_banned(address),
        )
        .await
        {
            Ok(Ok(banned)) => banned,
            Ok(Err(e)) => {
                warn!(
                    "Ban store error for {}: {} (failing {})",
                    address.masked(),
                    e,
                    if fail_banned { "closed" } else { "open" }
                );
                fail_banned
            }
            Err(_) => {
                warn!(
                    "Ban store timed out for {} (failing {})",
                    address.masked(),
                    if fail_banned { "closed" } else { "open" }
                );
                fail_banned
            }
        }
    }
}
