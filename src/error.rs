//! Error types shared across the crate.
//!
//! Bootstrap is the only place where these become process exit codes; the
//! logger and the configuration getters are infallible by contract and the
//! supervisor turns transient failures into log lines instead of errors.

use std::path::PathBuf;

/// Result type for warden operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed errors with structured context.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The configuration file could not be read or parsed.
    #[error("failed to parse configuration file {path}: {reason}")]
    ConfigParse { path: PathBuf, reason: String },

    /// A strictly-bound configuration section is absent.
    #[error("configuration section not found: {section}")]
    ConfigMissingSection { section: String },

    /// A strictly-bound configuration section has the wrong shape.
    #[error("configuration section '{section}' does not match the expected schema: {reason}")]
    ConfigSchema { section: String, reason: String },

    /// The crypto helper was used before `configure`.
    #[error("crypto helper has not been configured")]
    NotConfigured,

    /// A cipher operation failed (bad base64, padding, or key material).
    #[error("cipher operation failed: {0}")]
    Cipher(String),

    /// The heartbeat listener could not be set up for this generation.
    #[error("heartbeat setup failed: {0}")]
    HeartbeatSetup(String),

    /// The supervised child could not be spawned.
    #[error("failed to start child process '{target}': {source}")]
    ChildSpawn {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// A protected section's stored hash does not match its content.
    /// `section` is `protectedSections` when the array itself is tampered.
    #[error("hash verification failed for protected section '{section}'")]
    HmacMismatch { section: String },

    /// The protected document is structurally unusable.
    #[error("protected document is malformed: {0}")]
    Protection(String),

    /// Service-control manager interaction failed.
    #[error("service control error: {0}")]
    Service(String),

    /// IO error with context.
    #[error("IO error in {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a schema error for a named section.
    pub fn schema(section: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSchema {
            section: section.into(),
            reason: reason.into(),
        }
    }

    /// Create a mismatch error naming the offending section.
    pub fn hmac_mismatch(section: impl Into<String>) -> Self {
        Self::HmacMismatch {
            section: section.into(),
        }
    }
}
