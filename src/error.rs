use std::error::Error;
use std::fmt;

use crate::core::admission::RejectReason;

#[derive(Debug)]
pub enum GatewardError {
    // Admission errors - user visible, communicated then disconnected
    RejectedAdmission(RejectReason),

    // Identity errors - internal, degrade to anonymous rather than surfacing
    IdentityResolutionFailed(String),

    // Upstream errors - ban store or session store unreachable
    UpstreamUnavailable(String),

    // Connection errors
    ConnectionClosed,

    // Configuration errors
    ConfigError(String),
}

impl fmt::Display for GatewardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RejectedAdmission(reason) => write!(f, "Connection rejected: {}", reason),
            Self::IdentityResolutionFailed(msg) => {
                write!(f, "Identity resolution failed: {}", msg)
            }
            Self::UpstreamUnavailable(msg) => write!(f, "Upstream unavailable: {}", msg),
            Self::ConnectionClosed => write!(f, "Connection closed unexpectedly"),
            Self::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl Error for GatewardError {}

// Generic result type for Gateward
pub type Result<T> = std::result::Result<T, GatewardError>;
