//! Gateway configuration
//! Loaded from environment variables with validated defaults

use std::collections::HashSet;
use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_BAN_STORE_TIMEOUT_MS, DEFAULT_CONNECT_BURST, DEFAULT_CONNECT_SUSTAINED_RATE,
    DEFAULT_IDENTITY_TIMEOUT_MS, DEFAULT_IDLE_THRESHOLD_SECS, DEFAULT_MAX_CONNECTIONS_PER_IP,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::core::address::SourceAddress;
use crate::core::rate_limiter::RatePolicy;
use crate::error::{GatewardError, Result};

/// Policy applied when the ban store is unreachable or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanFailPolicy {
    /// Admit the connection when the ban store cannot answer.
    FailOpen,
    /// Reject the connection when the ban store cannot answer.
    FailClosed,
}

/// Gateway configuration parameters
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum concurrently open connections per source address
    pub max_connections_per_ip: usize,
    /// Rate policy applied to connection attempts
    pub connect_policy: RatePolicy,
    /// Whether the exit-node blocklist check runs at all
    pub block_exit_nodes: bool,
    /// Trusted addresses that bypass rate, ban, and concurrency checks
    pub exempt_addresses: HashSet<SourceAddress>,
    /// Period of the background limiter sweep
    pub sweep_interval: Duration,
    /// Idle duration after which a limiter is swept
    pub idle_threshold: Duration,
    /// Deadline for a single ban store query
    pub ban_store_timeout: Duration,
    /// What to do when the ban store cannot answer in time
    pub ban_fail_policy: BanFailPolicy,
    /// Deadline for a single identity resolution call
    pub identity_timeout: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_connections_per_ip: DEFAULT_MAX_CONNECTIONS_PER_IP,
            connect_policy: RatePolicy::new(DEFAULT_CONNECT_BURST, DEFAULT_CONNECT_SUSTAINED_RATE),
            block_exit_nodes: true,
            exempt_addresses: HashSet::new(),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            idle_threshold: Duration::from_secs(DEFAULT_IDLE_THRESHOLD_SECS),
            ban_store_timeout: Duration::from_millis(DEFAULT_BAN_STORE_TIMEOUT_MS),
            ban_fail_policy: BanFailPolicy::FailClosed,
            identity_timeout: Duration::from_millis(DEFAULT_IDENTITY_TIMEOUT_MS),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from environment variables, falling back to the
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(max) = parse_var("GATEWARD_MAX_CONN_PER_IP")? {
            config.max_connections_per_ip = max;
        }
        if let Some(burst) = parse_var("GATEWARD_CONNECT_BURST")? {
            config.connect_policy.burst = burst;
        }
        if let Some(sustained) = parse_var("GATEWARD_CONNECT_SUSTAINED")? {
            config.connect_policy.sustained = sustained;
        }
        if let Some(enabled) = parse_bool("GATEWARD_BLOCK_EXIT_NODES") {
            config.block_exit_nodes = enabled;
        }
        if let Ok(list) = env::var("GATEWARD_EXEMPT_ADDRS") {
            for entry in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                config.exempt_addresses.insert(entry.parse()?);
            }
        }
        if let Some(secs) = parse_var("GATEWARD_SWEEP_INTERVAL_SECS")? {
            config.sweep_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var("GATEWARD_IDLE_THRESHOLD_SECS")? {
            config.idle_threshold = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var("GATEWARD_BAN_TIMEOUT_MS")? {
            config.ban_store_timeout = Duration::from_millis(ms);
        }
        if let Ok(policy) = env::var("GATEWARD_BAN_FAIL_POLICY") {
            config.ban_fail_policy = match policy.to_lowercase().as_str() {
                "open" => BanFailPolicy::FailOpen,
                "closed" => BanFailPolicy::FailClosed,
                other => {
                    return Err(GatewardError::ConfigError(format!(
                        "GATEWARD_BAN_FAIL_POLICY must be 'open' or 'closed', got '{}'",
                        other
                    )))
                }
            };
        }
        if let Some(ms) = parse_var("GATEWARD_IDENTITY_TIMEOUT_MS")? {
            config.identity_timeout = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would disable admission entirely or divide by
    /// zero inside the limiter.
    pub fn validate(&self) -> Result<()> {
        if self.max_connections_per_ip == 0 {
            return Err(GatewardError::ConfigError(
                "max_connections_per_ip must be at least 1".to_string(),
            ));
        }
        if self.connect_policy.burst == 0 {
            return Err(GatewardError::ConfigError(
                "connect burst must be at least 1".to_string(),
            ));
        }
        if self.connect_policy.sustained <= 0.0 {
            return Err(GatewardError::ConfigError(
                "connect sustained rate must be positive".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() || self.idle_threshold.is_zero() {
            return Err(GatewardError::ConfigError(
                "sweep interval and idle threshold must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Err(_) => Ok(None),
        Ok(raw) => raw.parse().map(Some).map_err(|_| {
            GatewardError::ConfigError(format!("{} has unparseable value '{}'", name, raw))
        }),
    }
}

fn parse_bool(name: &str) -> Option<bool> {
    env::var(name)
        .ok()
        .map(|v| v.to_lowercase() == "true" || v == "1")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = GatewayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connect_policy.burst, 5);
        assert_eq!(config.connect_policy.cooldown(), Duration::from_secs(50));
        assert_eq!(config.ban_fail_policy, BanFailPolicy::FailClosed);
    }

    #[test]
    fn test_zero_burst_rejected() {
        let mut config = GatewayConfig::default();
        config.connect_policy.burst = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nonpositive_sustained_rejected() {
        let mut config = GatewayConfig::default();
        config.connect_policy.sustained = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_connection_cap_rejected() {
        let mut config = GatewayConfig::default();
        config.max_connections_per_ip = 0;
        assert!(config.validate().is_err());
    }
}
