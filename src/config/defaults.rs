//! Built-in default constants.
//!
//! An absent config file or key falls back to these.

// ============================================================================
// Restart
// ============================================================================

/// Upper bound on waiting for a route to stop during a restart (ms).
pub const STOP_ROUTE_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Unconditional Restart Policy
// ============================================================================

/// Interval between forced restarts of every registered route (ms).
pub const RESTART_INTERVAL_MS: u64 = 500;

// ============================================================================
// Inactivity Restart Policy
// ============================================================================

/// Interval between activity checks (ms).
pub const CHECK_INTERVAL_MS: u64 = 1_000;

/// A started route with no message for this long is restarted (ms).
pub const INACTIVITY_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// Host
// ============================================================================

/// Route hosted by the binary when none are configured.
pub const DEFAULT_ROUTE_ID: &str = "TestRoute";

/// Delay between demo messages sent to each hosted route (ms).
pub const FEED_INTERVAL_MS: u64 = 2_000;

/// Demo messages sent to each route before the producer goes silent.
pub const FEED_MESSAGES: u32 = 5;

/// Capacity of each hosted route's inbox.
pub const ROUTE_INBOX_CAPACITY: usize = 1_024;

/// Environment variable naming the config file.
pub const CONFIG_ENV_VAR: &str = "ROUTE_WATCHDOG_CONFIG";

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = "watchdog.toml";
