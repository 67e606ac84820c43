// ABOUTME: Environment variable name constants
// ABOUTME: Centralized definitions of all environment variable names used across Automa

// Persistence
pub const AUTOMA_DATABASE_URL: &str = "AUTOMA_DATABASE_URL";

// Sandbox Runtime
pub const AUTOMA_SANDBOX_IMAGE: &str = "AUTOMA_SANDBOX_IMAGE";
pub const AUTOMA_SANDBOX_MEMORY_MB: &str = "AUTOMA_SANDBOX_MEMORY_MB";
pub const AUTOMA_SANDBOX_CPU_LIMIT: &str = "AUTOMA_SANDBOX_CPU_LIMIT";
pub const AUTOMA_SANDBOX_PIDS_LIMIT: &str = "AUTOMA_SANDBOX_PIDS_LIMIT";
pub const AUTOMA_SANDBOX_TIMEOUT_SECS: &str = "AUTOMA_SANDBOX_TIMEOUT_SECS";
pub const AUTOMA_SANDBOX_COMMAND: &str = "AUTOMA_SANDBOX_COMMAND";
pub const AUTOMA_SANDBOX_USER: &str = "AUTOMA_SANDBOX_USER";
pub const AUTOMA_SANDBOX_WORK_DIR: &str = "AUTOMA_SANDBOX_WORK_DIR";
pub const AUTOMA_SANDBOX_SCRIPT_FILE: &str = "AUTOMA_SANDBOX_SCRIPT_FILE";
pub const AUTOMA_SANDBOX_NETWORK_ENABLED: &str = "AUTOMA_SANDBOX_NETWORK_ENABLED";
pub const AUTOMA_SANDBOX_STOP_GRACE_SECS: &str = "AUTOMA_SANDBOX_STOP_GRACE_SECS";
pub const AUTOMA_SANDBOX_MAX_OUTPUT_BYTES: &str = "AUTOMA_SANDBOX_MAX_OUTPUT_BYTES";

// Retry policy for container infrastructure calls
pub const AUTOMA_RETRY_MAX_ATTEMPTS: &str = "AUTOMA_RETRY_MAX_ATTEMPTS";
pub const AUTOMA_RETRY_INITIAL_DELAY_MS: &str = "AUTOMA_RETRY_INITIAL_DELAY_MS";
pub const AUTOMA_RETRY_BACKOFF_FACTOR: &str = "AUTOMA_RETRY_BACKOFF_FACTOR";
pub const AUTOMA_RETRY_MAX_DELAY_MS: &str = "AUTOMA_RETRY_MAX_DELAY_MS";

// Scheduler
pub const AUTOMA_SCHEDULER_TICK_MS: &str = "AUTOMA_SCHEDULER_TICK_MS";
pub const AUTOMA_SCHEDULER_SYNC_SECS: &str = "AUTOMA_SCHEDULER_SYNC_SECS";

// Credential Vault
pub const AUTOMA_VAULT_PASSWORD: &str = "AUTOMA_VAULT_PASSWORD";
pub const AUTOMA_VAULT_ARGON2_MEMORY_KIB: &str = "AUTOMA_VAULT_ARGON2_MEMORY_KIB";
pub const AUTOMA_VAULT_ARGON2_ITERATIONS: &str = "AUTOMA_VAULT_ARGON2_ITERATIONS";
pub const AUTOMA_VAULT_ARGON2_PARALLELISM: &str = "AUTOMA_VAULT_ARGON2_PARALLELISM";

// Logging (read by tracing-subscriber's EnvFilter)
pub const RUST_LOG: &str = "RUST_LOG";
