//! Centralized defaults and limits.
//!
//! All magic numbers live here with their rationale, so tuning does not
//! require a code search and the timing contract of the supervisor stays
//! auditable in one place.

// =============================================================================
// Logger
// =============================================================================

/// Maximum log file size before rotation (20 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 20 * 1024 * 1024;

/// Maximum time a queued log line may wait before the writer flushes it.
pub const DEFAULT_MAX_WRITE_DELAY_MS: u64 = 500;

/// Rotated files kept by default. 0 means unlimited.
pub const DEFAULT_MAX_OLD_FILES: usize = 0;

// =============================================================================
// Email plugin
// =============================================================================

/// Maximum batch age before an email flush (seconds).
pub const DEFAULT_EMAIL_MAX_DELAY_SECS: u64 = 300;

/// Maximum batch size before an email flush.
pub const DEFAULT_EMAIL_MAX_LOGS: usize = 1000;

/// SMTP delivery timeout used while the process is shutting down.
/// Short enough that service stop stays responsive.
pub const DEFAULT_EMAIL_TIMEOUT_ON_SHUTDOWN_MS: u64 = 3000;

/// Default SMTP delivery timeout during normal operation.
pub const DEFAULT_SMTP_TIMEOUT_MS: u64 = 120_000;

/// Lines whose location prefix contains this marker never enter an email
/// batch, otherwise a delivery failure would feed its own error report.
/// The marker is the SMTP sender's type name, which every one of its log
/// lines carries in the location prefix.
pub const SMTP_LOG_MARKER: &str = "SmtpMailer";

// =============================================================================
// Supervisor timing
// =============================================================================

/// Grace window between the shutdown signal and forced termination.
pub const DEFAULT_SHUTDOWN_TIME_MS: u64 = 10_000;

/// Pause between child generations.
pub const DEFAULT_RESTART_DELAY_MS: u64 = 5000;

/// Monitor loop poll interval. Heartbeat expiry and the kill deadline are
/// detected within one of these.
pub const MONITOR_POLL_MS: u64 = 200;

/// Settling wait right after spawning a child, before monitoring starts.
pub const POST_SPAWN_WAIT_MS: u64 = 250;

/// Poll interval of the idle loop entered when the configuration is unusable.
pub const IDLE_POLL_MS: u64 = 1000;

/// Wait after a forced kill before the child handle is released.
pub const KILL_SETTLE_MS: u64 = 50;

// =============================================================================
// Heartbeat
// =============================================================================

/// Length of the per-generation heartbeat secret.
pub const HEARTBEAT_SECRET_LEN: usize = 32;

/// Receive buffer for heartbeat datagrams. Valid pings are far smaller;
/// anything larger is junk by definition.
pub const HEARTBEAT_RECV_BUFFER: usize = 1024;

/// Environment variable carrying the heartbeat UDP port.
pub const ENV_WATCHDOG_PORT: &str = "WATCHDOG_PORT";

/// Environment variable carrying the heartbeat secret.
pub const ENV_WATCHDOG_SECRET: &str = "WATCHDOG_SECRET";

/// Environment variable naming the shutdown handshake artifact.
pub const ENV_SHUTDOWN_EVENT: &str = "SHUTDOWN_EVENT";

// =============================================================================
// Crypto
// =============================================================================

/// PBKDF2-HMAC-SHA256 iteration count, fixed for compatibility with
/// `openssl enc -aes-256-cbc -pbkdf2 -nosalt`.
pub const PBKDF2_ITERATIONS: u32 = 10_000;

/// Derived material: 32-byte AES-256 key followed by a 16-byte IV.
pub const DERIVED_KEY_IV_LEN: usize = 48;

/// Minimum number of usable bytes in a password file.
pub const MIN_PASSWORD_FILE_LEN: usize = 12;

/// Compiled-in fallback password. A deployment placeholder, not a secret:
/// real installations point `cryptoTools.passwordFile` at local key material.
pub const DEFAULT_CRYPTO_PASSWORD: &str = "warden-placeholder-password";

// =============================================================================
// Configuration sections
// =============================================================================

/// Logger configuration section.
pub const SECTION_LOG: &str = "log";

/// Email plugin parent section; each child key describes one plugin.
pub const SECTION_LOG_EMAIL: &str = "log.email";

/// Supervisor configuration section.
pub const SECTION_SUPERVISOR: &str = "svcWatchDog";

/// Crypto helper configuration section.
pub const SECTION_CRYPTO: &str = "cryptoTools";
