//! Gateward - connection admission and rate-limiting gateway
//!
//! Sits in front of a persistent, bidirectional real-time transport and
//! decides, for every inbound connection attempt, whether traffic may
//! proceed, at what rate, and with what identity attached. Application
//! messages are never interpreted here; the gateway hands off a ready
//! session and gets out of the way.

pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod stores;

// Re-export main components
pub use config::*;
pub use constants::*;

/// Initialize env_logger for binaries and tests embedding the gateway.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::builder().format_timestamp_millis().try_init();
}
