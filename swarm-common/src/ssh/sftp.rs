//! Short-lived SFTP streams over an established session.
//!
//! The writer creates the remote directory chain one segment at a time
//! with a bounded retry (remote mkdir races with concurrent wrappers from
//! other clients), then streams into a freshly created file. The reader
//! streams an existing remote file until EOF. Both are created per
//! transfer and dropped immediately after.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::config::{MAX_TRIALS, MKDIR_RETRY_DELAY};
use crate::errors::{Result, SwarmError};

pub struct SftpWriter {
    sftp: ssh2::Sftp,
    host: String,
    file: Option<ssh2::File>,
}

impl SftpWriter {
    pub(super) fn new(session: &ssh2::Session, host: &str) -> Result<Self> {
        let sftp = session
            .sftp()
            .map_err(|e| SwarmError::transport(host, e))?;
        Ok(Self {
            sftp,
            host: host.to_string(),
            file: None,
        })
    }

    /// Create every segment of `path` in order, user-rwx. A segment that
    /// already exists as a directory is fine; transient failures are
    /// retried a bounded number of times with a short backoff.
    pub fn push_directory(&mut self, path: &str) -> Result<()> {
        let mut current = PathBuf::from("/");
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push(segment);
            self.make_directory(&current)?;
        }
        Ok(())
    }

    fn make_directory(&self, dir: &std::path::Path) -> Result<()> {
        let mut last_err = None;
        for trial in 0..MAX_TRIALS {
            match self.sftp.mkdir(dir, 0o700) {
                Ok(()) => return Ok(()),
                Err(err) => {
                    if self.sftp.stat(dir).map(|st| st.is_dir()).unwrap_or(false) {
                        return Ok(());
                    }
                    last_err = Some(err);
                    if trial + 1 < MAX_TRIALS {
                        std::thread::sleep(MKDIR_RETRY_DELAY);
                    }
                }
            }
        }
        Err(SwarmError::Transport {
            host: self.host.clone(),
            message: format!(
                "cannot create remote directory '{}': {}",
                dir.display(),
                last_err.map(|e| e.to_string()).unwrap_or_default()
            ),
        })
    }

    /// Open the remote file for writing. `size` is the number of bytes the
    /// following writes will deliver.
    pub fn push_file(&mut self, path: &str, _size: u64) -> Result<()> {
        let file = self
            .sftp
            .create(std::path::Path::new(path))
            .map_err(|e| SwarmError::transport(&self.host, e))?;
        self.file = Some(file);
        Ok(())
    }

    /// Stream a chunk into the open file. An empty chunk is a no-op.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }
        let file = self.file.as_mut().ok_or_else(|| SwarmError::Transport {
            host: self.host.clone(),
            message: "write before push_file".into(),
        })?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Flush and close the open file.
    pub fn close(mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

pub struct SftpReader {
    file: ssh2::File,
    eof: bool,
}

impl SftpReader {
    pub(super) fn new(session: &ssh2::Session, host: &str, path: &str) -> Result<Self> {
        let sftp = session
            .sftp()
            .map_err(|e| SwarmError::transport(host, e))?;
        let file = sftp
            .open(std::path::Path::new(path))
            .map_err(|e| SwarmError::transport(host, e))?;
        Ok(Self { file, eof: false })
    }

    /// True once a read has returned no bytes.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Read up to `buf.len()` bytes; 0 marks EOF.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self.file.read(buf)?;
        if n == 0 {
            self.eof = true;
        }
        Ok(n)
    }
}
