// Default rate limiter policy
pub const DEFAULT_BURST: u32 = 10;
pub const DEFAULT_SUSTAINED_RATE: f64 = 2.0;

// Default policy applied to connection attempts: bursts of 5, roughly one
// connection every 10 seconds sustained
pub const DEFAULT_CONNECT_BURST: u32 = 5;
pub const DEFAULT_CONNECT_SUSTAINED_RATE: f64 = 0.1;

// Admission defaults
pub const DEFAULT_MAX_CONNECTIONS_PER_IP: usize = 10;

// Limiter registry maintenance
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 60;

// Upstream store deadlines
pub const DEFAULT_BAN_STORE_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_IDENTITY_TIMEOUT_MS: u64 = 10_000;
