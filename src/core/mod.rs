//! Core admission, rate-limiting, and session bootstrap logic

pub mod address;
pub mod admission;
pub mod bootstrap;
pub mod connection_counter;
pub mod gateway;
pub mod rate_limiter;
pub mod session;

// Re-export main components for convenience
pub use address::SourceAddress;
pub use admission::{AdmissionPipeline, AdmissionVerdict, RejectReason};
pub use bootstrap::{ConnectionCredentials, HandshakeOutcome, IdentityResolver};
pub use connection_counter::ConnectionCounter;
pub use gateway::Gateway;
pub use rate_limiter::{Limiter, LimiterRegistry, RatePolicy};
pub use session::{
    ChannelConnection, ConnectionHandle, ControlMessage, Identity, Session, SessionState,
};
