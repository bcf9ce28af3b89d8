// Admission pipeline tests: check ordering, exemptions, and ban store
// failure policies

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use gateward::config::{BanFailPolicy, GatewayConfig};
use gateward::core::{
    AdmissionPipeline, AdmissionVerdict, ConnectionCounter, LimiterRegistry, RejectReason,
    SourceAddress,
};
use gateward::error::{GatewardError, Result};
use gateward::stores::{BanStore, ExitNodeBlocklist, MemoryBanStore, StaticBlocklist};

fn addr(s: &str) -> SourceAddress {
    s.parse().unwrap()
}

struct PipelineParts {
    pipeline: AdmissionPipeline,
    counter: Arc<ConnectionCounter>,
}

fn build_pipeline(
    config: GatewayConfig,
    ban_store: Arc<dyn BanStore>,
    blocklist: Option<StaticBlocklist>,
) -> PipelineParts {
    let config = Arc::new(config);
    let limiters = Arc::new(LimiterRegistry::new(config.idle_threshold));
    let counter = Arc::new(ConnectionCounter::new());
    let pipeline = AdmissionPipeline::new(
        config,
        limiters,
        counter.clone(),
        ban_store,
        blocklist.map(|b| Arc::new(b) as Arc<dyn ExitNodeBlocklist>),
    );
    PipelineParts { pipeline, counter }
}

/// Ban store that always errors, for fail-open/fail-closed tests.
struct BrokenBanStore;

#[async_trait]
impl BanStore for BrokenBanStore {
    async fn is_address_banned(&self, _address: &SourceAddress) -> Result<bool> {
        Err(GatewardError::UpstreamUnavailable(
            "ban database offline".to_string(),
        ))
    }
}

/// Ban store that never answers within any reasonable deadline.
struct StalledBanStore;

#[async_trait]
impl BanStore for StalledBanStore {
    async fn is_address_banned(&self, _address: &SourceAddress) -> Result<bool> {
        loop {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
    }
}

#[tokio::test]
async fn test_rate_limit_check_precedes_ban_check() {
    let ban_store = Arc::new(MemoryBanStore::new());
    let a = addr("203.0.113.7");
    ban_store.ban_address(&a).await;

    let parts = build_pipeline(GatewayConfig::default(), ban_store, None);

    // Connect burst is 5: the first five attempts reach the ban check
    for _ in 0..5 {
        assert_eq!(
            parts.pipeline.admit(a).await,
            AdmissionVerdict::Reject(RejectReason::GloballyBanned)
        );
    }
    // The sixth is over the rate limit, and the earlier check wins
    assert_eq!(
        parts.pipeline.admit(a).await,
        AdmissionVerdict::Reject(RejectReason::RateLimited)
    );
    // Rejections never reserve counter slots
    assert_eq!(parts.counter.count(a).await, 0);
}

#[tokio::test]
async fn test_blocklist_check_runs_first_and_honors_toggle() {
    let a = addr("203.0.113.7");
    let ban_store = Arc::new(MemoryBanStore::new());
    ban_store.ban_address(&a).await;
    let blocklist = StaticBlocklist::new([a]);

    let parts = build_pipeline(
        GatewayConfig::default(),
        ban_store.clone(),
        Some(blocklist),
    );
    assert_eq!(
        parts.pipeline.admit(a).await,
        AdmissionVerdict::Reject(RejectReason::TorBlocked)
    );

    // With the toggle off the same address falls through to the ban check
    let config = GatewayConfig {
        block_exit_nodes: false,
        ..Default::default()
    };
    let parts = build_pipeline(config, ban_store, Some(StaticBlocklist::new([a])));
    assert_eq!(
        parts.pipeline.admit(a).await,
        AdmissionVerdict::Reject(RejectReason::GloballyBanned)
    );
}

#[tokio::test]
async fn test_exempt_address_bypasses_rate_ban_and_cap() {
    let a = addr("203.0.113.7");
    let ban_store = Arc::new(MemoryBanStore::new());
    ban_store.ban_address(&a).await;

    let mut config = GatewayConfig {
        max_connections_per_ip: 1,
        ..Default::default()
    };
    config.exempt_addresses.insert(a);

    let parts = build_pipeline(config, ban_store, None);
    for _ in 0..8 {
        assert_eq!(parts.pipeline.admit(a).await, AdmissionVerdict::Accept);
    }
    // Exempt connections still count toward the per-address total
    assert_eq!(parts.counter.count(a).await, 8);
}

#[tokio::test]
async fn test_concurrency_cap() {
    let a = addr("203.0.113.7");
    let config = GatewayConfig {
        max_connections_per_ip: 2,
        ..Default::default()
    };
    let parts = build_pipeline(config, Arc::new(MemoryBanStore::new()), None);

    assert_eq!(parts.pipeline.admit(a).await, AdmissionVerdict::Accept);
    assert_eq!(parts.pipeline.admit(a).await, AdmissionVerdict::Accept);
    assert_eq!(
        parts.pipeline.admit(a).await,
        AdmissionVerdict::Reject(RejectReason::TooManyConnections)
    );
    assert_eq!(parts.counter.count(a).await, 2);
}

#[tokio::test]
async fn test_range_banned_address_is_rejected() {
    let ban_store = Arc::new(MemoryBanStore::new());
    ban_store.ban_range(&addr("2001:db8::1")).await;

    let parts = build_pipeline(GatewayConfig::default(), ban_store, None);
    // A different member of the same /64, in a different textual form
    assert_eq!(
        parts
            .pipeline
            .admit(addr("2001:0db8:0000:0000:ffff:ffff:ffff:ffff"))
            .await,
        AdmissionVerdict::Reject(RejectReason::GloballyBanned)
    );
}

#[tokio::test]
async fn test_broken_ban_store_applies_fail_policy() {
    let a = addr("203.0.113.7");

    let config = GatewayConfig {
        ban_fail_policy: BanFailPolicy::FailClosed,
        ..Default::default()
    };
    let parts = build_pipeline(config, Arc::new(BrokenBanStore), None);
    assert_eq!(
        parts.pipeline.admit(a).await,
        AdmissionVerdict::Reject(RejectReason::GloballyBanned)
    );

    let config = GatewayConfig {
        ban_fail_policy: BanFailPolicy::FailOpen,
        ..Default::default()
    };
    let parts = build_pipeline(config, Arc::new(BrokenBanStore), None);
    assert_eq!(parts.pipeline.admit(a).await, AdmissionVerdict::Accept);
}

#[tokio::test]
async fn test_stalled_ban_store_does_not_hang_the_pipeline() {
    let a = addr("203.0.113.7");
    let config = GatewayConfig {
        ban_store_timeout: Duration::from_millis(50),
        ban_fail_policy: BanFailPolicy::FailOpen,
        ..Default::default()
    };
    let parts = build_pipeline(config, Arc::new(StalledBanStore), None);

    let verdict = tokio::time::timeout(Duration::from_secs(2), parts.pipeline.admit(a))
        .await
        .expect("admission must finish despite a stalled ban store");
    assert_eq!(verdict, AdmissionVerdict::Accept);
}
