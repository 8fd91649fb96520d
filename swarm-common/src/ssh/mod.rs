//! SSH transport facade: sessions, command execution, file transfer and
//! the least-loaded selection sweep.
//!
//! One concrete implementation backed by libssh2 (`ssh2`). A [`Session`]
//! owns the transport; channels and SFTP streams are created per call and
//! torn down before the call returns, so nothing outlives the session.

pub mod probe;
pub mod sftp;

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Instant;

use ssh2::{CheckResult, HostKeyType, KnownHostFileKind, KnownHostKeyFormat};
use tracing::{debug, info};

use crate::config::{
    CONNECT_TIMEOUT, COPY_BUFFER_SIZE, EXEC_READ_CHUNK, SELECT_PROBE_WINDOW_S,
};
use crate::errors::{Result, SwarmError};
use self::probe::FitnessSample;
use self::sftp::{SftpReader, SftpWriter};

/// What to do with a host key that is not in the known-hosts store.
///
/// Keys that *changed* are always refused; this policy only governs hosts
/// never seen before.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKeyPolicy {
    /// Trust and persist unseen keys. For non-interactive processes.
    AcceptNew,
    /// Refuse unseen keys.
    RejectNew,
    /// Ask on stdin; `yes` trusts and persists, anything else refuses.
    Prompt,
}

/// Connection settings shared by all sessions of one process.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub user: String,
    pub port: u16,
    pub host_key_policy: HostKeyPolicy,
    pub known_hosts_path: Option<PathBuf>,
}

impl SshOptions {
    /// Options for a given policy, with the user resolved from the
    /// environment and the OpenSSH known-hosts file.
    pub fn from_env(policy: HostKeyPolicy) -> Result<Self> {
        let user = crate::config::ssh_user()
            .ok_or_else(|| SwarmError::Config("cannot determine ssh user ($USER unset)".into()))?;
        Ok(Self {
            user,
            port: 22,
            host_key_policy: policy,
            known_hosts_path: dirs::home_dir().map(|home| home.join(".ssh").join("known_hosts")),
        })
    }
}

/// A connected, authenticated transport to one host.
pub struct Session {
    raw: ssh2::Session,
    hostname: String,
}

impl Session {
    /// Connect, verify the host key and authenticate against the agent.
    /// Any failure is fatal to the caller.
    pub fn connect(hostname: &str, opts: &SshOptions) -> Result<Self> {
        let stream = open_stream(hostname, opts.port)?;
        let mut raw = ssh2::Session::new().map_err(|e| SwarmError::transport(hostname, e))?;
        raw.set_tcp_stream(stream);
        raw.handshake()
            .map_err(|e| SwarmError::transport(hostname, e))?;

        verify_host_key(&raw, hostname, opts)?;

        raw.userauth_agent(&opts.user)
            .map_err(|e| SwarmError::transport(hostname, e))?;
        if !raw.authenticated() {
            return Err(SwarmError::Transport {
                host: hostname.to_string(),
                message: "agent authentication did not complete".into(),
            });
        }

        debug!(host = hostname, "session established");
        Ok(Self {
            raw,
            hostname: hostname.to_string(),
        })
    }

    /// Connect to the least-loaded host of `hostnames`.
    ///
    /// Each candidate is connected and probed with a short CPU window; the
    /// session with the strictly lowest sample survives, so the earliest
    /// host wins ties. Hosts that fail to connect or probe are skipped;
    /// refused host keys stay fatal. A single-host fleet short-circuits to
    /// the fatal single-host constructor.
    pub fn connect_least_loaded(hostnames: &[String], opts: &SshOptions) -> Result<Self> {
        if hostnames.len() == 1 {
            return Self::connect(&hostnames[0], opts);
        }

        let mut best: Option<(u8, Session)> = None;
        for hostname in hostnames {
            let session = match Self::connect(hostname, opts) {
                Ok(session) => session,
                Err(err @ SwarmError::HostKey { .. }) => return Err(err),
                Err(err) => {
                    debug!(host = %hostname, error = %err, "skipping candidate");
                    continue;
                }
            };
            let cpu = match session.cpu_percent(SELECT_PROBE_WINDOW_S) {
                Some(cpu) => cpu,
                None => {
                    debug!(host = %hostname, "cpu sample unavailable, skipping candidate");
                    continue;
                }
            };
            debug!(host = %hostname, cpu, "candidate probed");
            if best.as_ref().map_or(true, |(lowest, _)| cpu < *lowest) {
                best = Some((cpu, session));
            }
        }

        match best {
            Some((cpu, session)) => {
                info!(host = %session.hostname, cpu, "selected least-loaded host");
                Ok(session)
            }
            None => Err(SwarmError::NoUsableHost),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Run a remote command, streaming its stdout/stderr onto the local
    /// stdout/stderr in small chunks. Returns the remote exit status.
    pub fn execute(&self, command: &str) -> Result<i32> {
        let mut channel = self.channel()?;
        channel
            .exec(command)
            .map_err(|e| SwarmError::transport(&self.hostname, e))?;
        channel
            .send_eof()
            .map_err(|e| SwarmError::transport(&self.hostname, e))?;

        let mut buf = [0u8; EXEC_READ_CHUNK];
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        loop {
            let n = channel.read(&mut buf)?;
            if n > 0 {
                stdout.lock().write_all(&buf[..n])?;
                continue;
            }
            let n = channel.stderr().read(&mut buf)?;
            if n > 0 {
                stderr.lock().write_all(&buf[..n])?;
                continue;
            }
            break;
        }

        channel
            .wait_close()
            .map_err(|e| SwarmError::transport(&self.hostname, e))?;
        channel
            .exit_status()
            .map_err(|e| SwarmError::transport(&self.hostname, e))
    }

    /// Run a remote command and capture its combined output. The exit
    /// status is ignored; probe recipes report through their output.
    pub fn exec_capture(&self, command: &str) -> Result<String> {
        let mut channel = self.channel()?;
        channel
            .exec(command)
            .map_err(|e| SwarmError::transport(&self.hostname, e))?;
        channel
            .send_eof()
            .map_err(|e| SwarmError::transport(&self.hostname, e))?;

        let mut output = String::new();
        channel.read_to_string(&mut output)?;
        channel.stderr().read_to_string(&mut output)?;
        let _ = channel.wait_close();
        Ok(output)
    }

    /// Sample the remote CPU utilization over `window_s` seconds.
    /// `None` when the transport is unusable or the sample is garbled.
    pub fn cpu_percent(&self, window_s: f64) -> Option<u8> {
        let script = probe::cpu_probe_script(window_s);
        match self.exec_capture(&script) {
            Ok(output) => probe::parse_cpu_percent(&output),
            Err(err) => {
                debug!(host = %self.hostname, error = %err, "cpu probe failed");
                None
            }
        }
    }

    /// Measure round-trip latency and CPU load, then score the host.
    pub fn fitness(&self, window_s: f64) -> FitnessSample {
        let started = Instant::now();
        if self.exec_capture(probe::RTT_PROBE_COMMAND).is_err() {
            return FitnessSample::unavailable(started.elapsed().as_millis() as u64);
        }
        let latency_ms = started.elapsed().as_millis() as u64;
        let cpu_percent = self.cpu_percent(window_s);
        FitnessSample::new(cpu_percent, latency_ms)
    }

    /// Upload a local file, creating the remote parent directory chain.
    pub fn copy_local_to_remote(&self, local: &str, remote: &str) -> Result<()> {
        let mut writer = SftpWriter::new(&self.raw, &self.hostname)?;
        if let Some(parent) = std::path::Path::new(remote).parent() {
            writer.push_directory(&parent.to_string_lossy())?;
        }

        let mut file = std::fs::File::open(local)?;
        let size = file.metadata()?.len();
        writer.push_file(remote, size)?;

        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        let mut remaining = size;
        while remaining > 0 {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            writer.write(&buf[..n])?;
            remaining = remaining.saturating_sub(n as u64);
        }
        writer.close()
    }

    /// Download a remote file into `local`, streaming until EOF.
    pub fn copy_remote_to_local(&self, remote: &str, local: &str) -> Result<()> {
        let mut reader = SftpReader::new(&self.raw, &self.hostname, remote)?;
        let mut out = std::fs::File::create(local)?;
        let mut buf = vec![0u8; COPY_BUFFER_SIZE];
        while !reader.is_eof() {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n])?;
        }
        Ok(())
    }

    fn channel(&self) -> Result<ssh2::Channel> {
        self.raw
            .channel_session()
            .map_err(|e| SwarmError::transport(&self.hostname, e))
    }
}

fn open_stream(hostname: &str, port: u16) -> Result<TcpStream> {
    let addrs = (hostname, port)
        .to_socket_addrs()
        .map_err(|e| SwarmError::Transport {
            host: hostname.to_string(),
            message: format!("address resolution failed: {e}"),
        })?;

    let mut last_err = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(SwarmError::Transport {
        host: hostname.to_string(),
        message: match last_err {
            Some(err) => format!("connect failed: {err}"),
            None => "no addresses resolved".into(),
        },
    })
}

/// Check the server key against the known-hosts store, applying the
/// configured policy to hosts that are not in it. A changed key or a store
/// failure always refuses the connection.
fn verify_host_key(session: &ssh2::Session, hostname: &str, opts: &SshOptions) -> Result<()> {
    let mut store = session
        .known_hosts()
        .map_err(|e| SwarmError::transport(hostname, e))?;

    let path = opts.known_hosts_path.clone();
    if let Some(ref path) = path {
        if path.exists() {
            store
                .read_file(path, KnownHostFileKind::OpenSSH)
                .map_err(|e| SwarmError::transport(hostname, e))?;
        }
    }

    let (key, key_type) = session.host_key().ok_or_else(|| SwarmError::HostKey {
        host: hostname.to_string(),
        reason: "server presented no host key".into(),
    })?;

    match store.check_port(hostname, opts.port, key) {
        CheckResult::Match => Ok(()),
        CheckResult::Mismatch => Err(SwarmError::HostKey {
            host: hostname.to_string(),
            reason: "host key changed; refusing to connect".into(),
        }),
        CheckResult::Failure => Err(SwarmError::HostKey {
            host: hostname.to_string(),
            reason: "known-hosts check failed".into(),
        }),
        CheckResult::NotFound => {
            let trusted = match opts.host_key_policy {
                HostKeyPolicy::AcceptNew => true,
                HostKeyPolicy::RejectNew => false,
                HostKeyPolicy::Prompt => prompt_for_trust(session, hostname)?,
            };
            if !trusted {
                return Err(SwarmError::HostKey {
                    host: hostname.to_string(),
                    reason: "unknown host key refused".into(),
                });
            }
            store
                .add(hostname, key, "", known_host_key_format(key_type))
                .map_err(|e| SwarmError::transport(hostname, e))?;
            if let Some(ref path) = path {
                store
                    .write_file(path, KnownHostFileKind::OpenSSH)
                    .map_err(|e| SwarmError::transport(hostname, e))?;
            }
            Ok(())
        }
    }
}

/// The known-hosts entry format matching a negotiated host key type.
fn known_host_key_format(key_type: HostKeyType) -> KnownHostKeyFormat {
    match key_type {
        HostKeyType::Rsa => KnownHostKeyFormat::SshRsa,
        HostKeyType::Dss => KnownHostKeyFormat::SshDss,
        HostKeyType::Ecdsa256 => KnownHostKeyFormat::Ecdsa256,
        HostKeyType::Ecdsa384 => KnownHostKeyFormat::Ecdsa384,
        HostKeyType::Ecdsa521 => KnownHostKeyFormat::Ecdsa521,
        HostKeyType::Ed25519 => KnownHostKeyFormat::Ed25519,
        _ => KnownHostKeyFormat::Unknown,
    }
}

/// Interactive trust decision for an unseen host key, answered on stdin.
fn prompt_for_trust(session: &ssh2::Session, hostname: &str) -> Result<bool> {
    let fingerprint = session
        .host_key_hash(ssh2::HashType::Sha1)
        .map(hex_digest)
        .unwrap_or_else(|| "<unavailable>".to_string());

    eprintln!("The authenticity of host '{hostname}' can't be established.");
    eprintln!("Key fingerprint: {fingerprint}");
    eprintln!("Do you trust this host key? (yes/no)");

    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 3);
    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_digest_is_colon_separated() {
        assert_eq!(hex_digest(&[0xde, 0xad, 0x01]), "de:ad:01");
    }

    #[test]
    fn key_formats_map_per_type() {
        assert!(matches!(
            known_host_key_format(HostKeyType::Rsa),
            KnownHostKeyFormat::SshRsa
        ));
        assert!(matches!(
            known_host_key_format(HostKeyType::Ed25519),
            KnownHostKeyFormat::Ed25519
        ));
        assert!(matches!(
            known_host_key_format(HostKeyType::Unknown),
            KnownHostKeyFormat::Unknown
        ));
    }

    #[test]
    fn options_from_env_resolve_a_user() {
        // $USER is set in any normal environment this runs in.
        if std::env::var("USER").is_ok() {
            let opts = SshOptions::from_env(HostKeyPolicy::RejectNew).unwrap();
            assert!(!opts.user.is_empty());
            assert_eq!(opts.port, 22);
        }
    }
}
