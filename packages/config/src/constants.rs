// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Arena

// Backend Selection
pub const ARENA_PROVIDER: &str = "ARENA_PROVIDER";
pub const ARENA_PUBLIC_ENTRY_HOST: &str = "ARENA_PUBLIC_ENTRY_HOST";
pub const ARENA_LABEL_PREFIX: &str = "ARENA_LABEL_PREFIX";

// Persistence
pub const ARENA_DATABASE_URL: &str = "ARENA_DATABASE_URL";
pub const DATABASE_URL: &str = "DATABASE_URL"; // Legacy

// Container Engine Timeouts
pub const ARENA_STOP_TIMEOUT_SECS: &str = "ARENA_STOP_TIMEOUT_SECS";
pub const ARENA_PULL_TIMEOUT_SECS: &str = "ARENA_PULL_TIMEOUT_SECS";

// Background Reclamation
pub const ARENA_SWEEP_INTERVAL_SECS: &str = "ARENA_SWEEP_INTERVAL_SECS";
pub const ARENA_REGISTRY_RETENTION_SECS: &str = "ARENA_REGISTRY_RETENTION_SECS";

// Logging
pub const RUST_LOG: &str = "RUST_LOG";
