//! Environment variables, paths and tuning constants.
//!
//! Everything user-tunable is an environment variable so the wrapper can be
//! dropped in front of an existing build system without touching its
//! configuration; the rest are fixed protocol constants shared by the
//! daemon and its clients.

use std::time::Duration;
use tracing::warn;

/// Comma-separated fleet host list.
pub const HOSTNAMES_ENV: &str = "SWARM_HOSTNAMES";

/// Fleet used when [`HOSTNAMES_ENV`] is unset.
pub const DEFAULT_HOSTNAMES: &str = "localhost";

/// Delimiter of the fleet host list.
pub const HOSTNAME_LIST_DELIMITER: char = ',';

/// SSH username override; defaults to `$USER`.
pub const SSH_USER_ENV: &str = "SWARM_SSH_USER";

/// Tracing filter directive (same grammar as `RUST_LOG`).
pub const LOG_ENV: &str = "SWARM_LOG";

/// Override for the rendezvous reply wait, in milliseconds.
pub const REPLY_TIMEOUT_ENV: &str = "SWARM_REPLY_TIMEOUT_MS";

/// Staging root on both sides: preprocessed units land in
/// `/tmp/swarm/<source>` locally and `/tmp/swarm/<hostname>/...` remotely.
pub const STAGING_ROOT: &str = "/tmp/swarm";

/// Chunk size for SFTP uploads and downloads.
pub const COPY_BUFFER_SIZE: usize = 1024 * 1024;

/// Chunk size when draining remote stdout/stderr.
pub const EXEC_READ_CHUNK: usize = 256;

/// Bounded retry count for remote mkdir.
pub const MAX_TRIALS: usize = 2;

/// Backoff between remote mkdir retries.
pub const MKDIR_RETRY_DELAY: Duration = Duration::from_millis(1);

/// Exit status the local preprocess subprocess must produce.
pub const PREPROCESS_EXPECTED_STATUS: i32 = 0;

/// Name of the placement rendezvous slot (shm object; the semaphores add
/// `.req`/`.rep` suffixes).
pub const PLACEMENT_SLOT_NAME: &str = "/swarm-lb-hostname";

/// Size of the hostname slot, NUL terminator included.
pub const HOSTNAME_MAX_LEN: usize = 64;

/// How long the daemon blocks waiting for a placement request.
pub const REQUEST_WAIT: Duration = Duration::from_secs(1);

/// Default client-side wait for the daemon's reply.
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_millis(1);

/// CPU probe window used during least-loaded selection.
pub const SELECT_PROBE_WINDOW_S: f64 = 0.01;

/// CPU probe window used by the fleet viewer.
pub const VIEWER_PROBE_WINDOW_S: f64 = 0.05;

/// TCP connect timeout for new sessions.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the rendezvous reply wait, honoring [`REPLY_TIMEOUT_ENV`].
pub fn reply_timeout() -> Duration {
    match std::env::var(REPLY_TIMEOUT_ENV) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(ms) => Duration::from_millis(ms),
            Err(_) => {
                warn!(
                    var = REPLY_TIMEOUT_ENV,
                    value = %raw,
                    "ignoring non-integer reply timeout"
                );
                DEFAULT_REPLY_TIMEOUT
            }
        },
        Err(_) => DEFAULT_REPLY_TIMEOUT,
    }
}

/// SSH username: [`SSH_USER_ENV`], then `$USER`.
pub fn ssh_user() -> Option<String> {
    for var in [SSH_USER_ENV, "USER"] {
        if let Ok(user) = std::env::var(var) {
            if !user.trim().is_empty() {
                return Some(user);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_timeout_defaults_to_one_ms() {
        // Only meaningful when the override is unset in the test env.
        if std::env::var(REPLY_TIMEOUT_ENV).is_err() {
            assert_eq!(reply_timeout(), Duration::from_millis(1));
        }
    }

    #[test]
    fn hostname_slot_fits_a_nul() {
        assert!(HOSTNAME_MAX_LEN > 1);
    }
}
