//! Error taxonomy shared by the swarm tools.
//!
//! Most failures in an interactive build accelerator are fatal by policy:
//! the binaries log the error and exit rather than risk a silently corrupt
//! object file. The two recoverable paths are the rewriter bypass (not an
//! error at all) and per-host probe failures during least-loaded selection,
//! which are skipped.

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, SwarmError>;

#[derive(Debug, Error)]
pub enum SwarmError {
    /// Malformed invocation of one of the binaries.
    #[error("invalid invocation: {0}")]
    Usage(String),

    /// Missing or malformed environment/configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// SSH connect, handshake, authentication or channel failure.
    #[error("transport error on '{host}': {message}")]
    Transport { host: String, message: String },

    /// The remote presented a key the known-hosts policy refuses.
    #[error("host key verification failed for '{host}': {reason}")]
    HostKey { host: String, reason: String },

    /// Least-loaded selection exhausted the fleet without a usable session.
    #[error("no usable host in fleet")]
    NoUsableHost,

    /// Local filesystem or stream failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Shared-memory or semaphore setup failure.
    #[error("ipc error: {0}")]
    Ipc(String),

    /// A positional query was offset past the end of the argument vector.
    #[error("argument offset out of range for pattern '{pattern}'")]
    OffsetOutOfRange { pattern: String },

    /// The local preprocess subprocess exited non-zero.
    #[error("local preprocess exited with status {0}")]
    Preprocess(i32),
}

impl SwarmError {
    /// Wrap an `ssh2` error with the host it occurred on.
    pub fn transport(host: impl Into<String>, err: ssh2::Error) -> Self {
        Self::Transport {
            host: host.into(),
            message: err.to_string(),
        }
    }
}
