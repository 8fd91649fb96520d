//! Fleet host registry.
//!
//! The fleet is a comma-separated hostname list in `SWARM_HOSTNAMES`; order
//! is preserved so telemetry rows stay stable across refreshes. The local
//! hostname names the per-client staging directory on remote hosts.

use std::ffi::CStr;
use std::time::Duration;

use crate::config::{
    DEFAULT_HOSTNAMES, HOSTNAMES_ENV, HOSTNAME_LIST_DELIMITER, HOSTNAME_MAX_LEN,
    PLACEMENT_SLOT_NAME,
};
use crate::errors::{Result, SwarmError};
use crate::ipc::PlacementRequest;

/// The configured fleet, in configuration order. Empty fragments are
/// dropped; an unset variable yields the `localhost` singleton.
pub fn fleet() -> Vec<String> {
    let raw = std::env::var(HOSTNAMES_ENV).unwrap_or_else(|_| DEFAULT_HOSTNAMES.to_string());
    raw.split(HOSTNAME_LIST_DELIMITER)
        .filter(|frag| !frag.is_empty())
        .map(|frag| frag.to_string())
        .collect()
}

/// The local hostname, from the OS.
pub fn local() -> Result<String> {
    let mut buf = [0u8; 256];
    // SAFETY: buf is valid for the whole call and gethostname writes at
    // most buf.len() bytes, NUL-terminating on success.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast::<libc::c_char>(), buf.len()) };
    if rc != 0 {
        return Err(SwarmError::Config(format!(
            "gethostname failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    buf[buf.len() - 1] = 0;
    // SAFETY: the buffer is NUL-terminated (enforced above).
    let name = unsafe { CStr::from_ptr(buf.as_ptr().cast::<libc::c_char>()) };
    Ok(name.to_string_lossy().into_owned())
}

/// Ask a running `swarmd` for the current best host. Returns `Ok(None)`
/// when the daemon does not answer within `reply_timeout`.
pub fn from_balancer(reply_timeout: Duration) -> Result<Option<String>> {
    let client = PlacementRequest::open(PLACEMENT_SLOT_NAME, HOSTNAME_MAX_LEN, reply_timeout)?;
    let mut buf = [0u8; HOSTNAME_MAX_LEN];
    if client.request(&mut buf)? {
        Ok(Some(decode_hostname(&buf)))
    } else {
        Ok(None)
    }
}

/// Copy `name` into a fixed slot buffer, truncating and NUL-terminating.
pub fn encode_hostname(name: &str, buf: &mut [u8]) {
    buf.fill(0);
    let take = name.len().min(buf.len().saturating_sub(1));
    buf[..take].copy_from_slice(&name.as_bytes()[..take]);
}

/// Read a NUL-terminated hostname out of a slot buffer.
pub fn decode_hostname(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_truncates_and_terminates() {
        let mut buf = [0xffu8; 8];
        encode_hostname("a-very-long-hostname", &mut buf);
        assert_eq!(&buf[..7], b"a-very-");
        assert_eq!(buf[7], 0);
        assert_eq!(decode_hostname(&buf), "a-very-");
    }

    #[test]
    fn decode_stops_at_nul() {
        let mut buf = [0u8; 16];
        encode_hostname("h1", &mut buf);
        assert_eq!(decode_hostname(&buf), "h1");
    }

    #[test]
    fn local_hostname_is_nonempty() {
        let name = local().expect("gethostname");
        assert!(!name.is_empty());
    }

    #[test]
    fn fleet_splits_and_drops_empties() {
        // Exercise the split logic on a raw string the same way fleet()
        // does, without mutating process environment.
        let raw = "h1,,h2,";
        let hosts: Vec<&str> = raw
            .split(HOSTNAME_LIST_DELIMITER)
            .filter(|frag| !frag.is_empty())
            .collect();
        assert_eq!(hosts, ["h1", "h2"]);
    }
}
