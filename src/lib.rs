//! warden - service supervisor with a heartbeat watchdog.
//!
//! The crate supervises one child executable per generation: it spawns the
//! child, watches a secret-gated UDP heartbeat on loopback, signals a
//! graceful-shutdown handshake before force-killing, and restarts with a
//! configurable delay. Supporting infrastructure:
//!
//! - [`logger`] - thread-safe asynchronous logger with file rotation and
//!   pluggable sinks (including an SMTP batching sink).
//! - [`config`] - one-shot JSON configuration with forgiving getters and
//!   HMAC-SHA256 tamper protection over declared sections.
//! - [`crypto`] - AES-256-CBC helper for secrets embedded in
//!   configuration, key material derived openssl-compatibly.
//! - [`supervisor`] - the child lifecycle, heartbeat server, shutdown
//!   handshake and OS service integration.

pub mod config;
pub mod constants;
pub mod crypto;
pub mod error;
pub mod logger;
pub mod mailer;
pub mod supervisor;
pub mod utils;

pub use error::{Error, Result};
