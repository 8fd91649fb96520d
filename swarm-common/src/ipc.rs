//! Shared-memory rendezvous between the load-balancer daemon and its
//! clients.
//!
//! A rendezvous slot is a named fixed-size shared buffer plus two named
//! counting semaphores, `<slot>.req` and `<slot>.rep`, both starting at
//! zero. The daemon owns the slot (`PlacementReply`): it creates all three
//! objects, drains stale semaphore tokens left over from a crashed peer,
//! and unlinks everything on drop. Clients (`PlacementRequest`) open the
//! same names without unlinking.
//!
//! The protocol is post-`req` / wait-`rep` on the client and wait-`req` /
//! write-then-post-`rep` on the owner. A client that gives up waiting for
//! the reply leaves its request token behind; the owner will consume it on
//! the next loop and answer whichever client is waiting then, so pairings
//! can shift by one request after a timeout. Callers that care tune the
//! reply wait (`SWARM_REPLY_TIMEOUT_MS`) above the daemon's refresh jitter.

use std::ffi::CString;
use std::time::Duration;

use crate::errors::{Result, SwarmError};

/// Low-level slot shared by the owner and client wrappers.
struct SharedSlot {
    shm_name: CString,
    req_name: CString,
    rep_name: CString,
    size: usize,
    owner: bool,
    fd: libc::c_int,
    ptr: *mut libc::c_void,
    sem_req: *mut libc::sem_t,
    sem_rep: *mut libc::sem_t,
}

// SAFETY: the raw pointers reference process-shared OS objects; all access
// goes through the semaphore protocol and &self methods never alias the
// buffer mutably across threads without a semaphore handoff.
unsafe impl Send for SharedSlot {}

impl SharedSlot {
    fn open(name: &str, size: usize, owner: bool) -> Result<Self> {
        if size == 0 {
            return Err(SwarmError::Ipc("slot size must be non-zero".into()));
        }
        let shm_name = cstring(name)?;
        let req_name = cstring(&format!("{name}.req"))?;
        let rep_name = cstring(&format!("{name}.rep"))?;

        // SAFETY: the names are valid NUL-terminated strings; flags and
        // mode are plain integers.
        let fd = unsafe {
            libc::shm_open(
                shm_name.as_ptr(),
                libc::O_CREAT | libc::O_RDWR,
                libc::S_IRUSR | libc::S_IWUSR,
            )
        };
        if fd < 0 {
            return Err(ipc_err("shm_open", name));
        }
        // SAFETY: fd is a freshly opened shm descriptor.
        if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
            let err = ipc_err("ftruncate", name);
            // SAFETY: fd is open and owned here.
            unsafe { libc::close(fd) };
            return Err(err);
        }
        // SAFETY: fd is a valid descriptor truncated to `size`.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            let err = ipc_err("mmap", name);
            // SAFETY: fd is open and owned here.
            unsafe { libc::close(fd) };
            return Err(err);
        }

        let sem_req = open_semaphore(&req_name, name)?;
        let sem_rep = open_semaphore(&rep_name, name)?;

        let slot = Self {
            shm_name,
            req_name,
            rep_name,
            size,
            owner,
            fd,
            ptr,
            sem_req,
            sem_rep,
        };

        // A crashed peer can leave tokens behind; the owner starts from a
        // clean rendezvous.
        if owner {
            slot.drain(slot.sem_req);
            slot.drain(slot.sem_rep);
        }

        Ok(slot)
    }

    fn drain(&self, sem: *mut libc::sem_t) {
        // SAFETY: sem is a live semaphore owned by this slot.
        while unsafe { libc::sem_trywait(sem) } == 0 {}
    }

    /// Timed wait on a semaphore. `Ok(true)` when acquired, `Ok(false)` on
    /// timeout; anything else is fatal.
    fn timed_wait(&self, sem: *mut libc::sem_t, wait: Duration) -> Result<bool> {
        let deadline = absolute_deadline(wait)?;
        loop {
            // SAFETY: sem is a live semaphore; the timespec is initialized.
            let rc = unsafe { libc::sem_timedwait(sem, &deadline) };
            if rc == 0 {
                return Ok(true);
            }
            match std::io::Error::last_os_error().raw_os_error() {
                Some(libc::ETIMEDOUT) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => {
                    return Err(SwarmError::Ipc(format!(
                        "sem_timedwait failed: {}",
                        std::io::Error::last_os_error()
                    )))
                }
            }
        }
    }

    fn post(&self, sem: *mut libc::sem_t) {
        // SAFETY: sem is a live semaphore owned by this slot.
        unsafe { libc::sem_post(sem) };
    }

    fn copy_in(&self, data: &[u8]) {
        let take = data.len().min(self.size);
        // SAFETY: ptr maps `size` writable bytes; take <= size.
        unsafe {
            std::ptr::write_bytes(self.ptr.cast::<u8>(), 0, self.size);
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.ptr.cast::<u8>(), take);
        }
    }

    fn copy_out(&self, out: &mut [u8]) {
        let take = out.len().min(self.size);
        // SAFETY: ptr maps `size` readable bytes; take <= size.
        unsafe {
            std::ptr::copy_nonoverlapping(self.ptr.cast::<u8>(), out.as_mut_ptr(), take);
        }
    }
}

impl Drop for SharedSlot {
    fn drop(&mut self) {
        // Teardown is best-effort; the owner additionally scrubs and
        // unlinks so a later daemon starts from scratch.
        if self.owner {
            // SAFETY: ptr maps `size` writable bytes until munmap below.
            unsafe { std::ptr::write_bytes(self.ptr.cast::<u8>(), 0, self.size) };
        }
        // SAFETY: ptr/fd/semaphores were created in open() and are only
        // released here.
        unsafe {
            libc::munmap(self.ptr, self.size);
            libc::close(self.fd);
            libc::sem_close(self.sem_req);
            libc::sem_close(self.sem_rep);
            if self.owner {
                libc::shm_unlink(self.shm_name.as_ptr());
                libc::sem_unlink(self.req_name.as_ptr());
                libc::sem_unlink(self.rep_name.as_ptr());
            }
        }
    }
}

/// Owner side of a rendezvous slot, held by the daemon.
pub struct PlacementReply {
    slot: SharedSlot,
    request_wait: Duration,
}

impl PlacementReply {
    pub fn create(name: &str, size: usize, request_wait: Duration) -> Result<Self> {
        Ok(Self {
            slot: SharedSlot::open(name, size, true)?,
            request_wait,
        })
    }

    /// Block for up to the request wait; true when a client posted a
    /// request. Timeouts are normal control flow.
    pub fn available(&self) -> Result<bool> {
        self.slot.timed_wait(self.slot.sem_req, self.request_wait)
    }

    /// Publish a reply: copy `data` into the slot and wake the client.
    pub fn publish(&self, data: &[u8]) -> Result<()> {
        self.slot.copy_in(data);
        self.slot.post(self.slot.sem_rep);
        Ok(())
    }
}

/// Client side of a rendezvous slot.
pub struct PlacementRequest {
    slot: SharedSlot,
    reply_timeout: Duration,
}

impl PlacementRequest {
    pub fn open(name: &str, size: usize, reply_timeout: Duration) -> Result<Self> {
        Ok(Self {
            slot: SharedSlot::open(name, size, false)?,
            reply_timeout,
        })
    }

    /// Post a request and wait briefly for the reply. `Ok(true)` fills
    /// `out` with the slot contents; `Ok(false)` means the daemon did not
    /// answer in time.
    pub fn request(&self, out: &mut [u8]) -> Result<bool> {
        self.slot.post(self.slot.sem_req);
        if self.slot.timed_wait(self.slot.sem_rep, self.reply_timeout)? {
            self.slot.copy_out(out);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

fn cstring(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| SwarmError::Ipc(format!("slot name '{name}' contains NUL")))
}

fn open_semaphore(name: &CString, slot: &str) -> Result<*mut libc::sem_t> {
    // SAFETY: name is a valid NUL-terminated string; initial value 0.
    let sem = unsafe {
        libc::sem_open(
            name.as_ptr(),
            libc::O_CREAT,
            (libc::S_IRUSR | libc::S_IWUSR) as libc::c_uint,
            0,
        )
    };
    // Failure is SEM_FAILED, which glibc defines as the null pointer.
    if sem.is_null() {
        return Err(ipc_err("sem_open", slot));
    }
    Ok(sem)
}

fn absolute_deadline(wait: Duration) -> Result<libc::timespec> {
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: now is a valid out-pointer.
    if unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut now) } != 0 {
        return Err(SwarmError::Ipc(format!(
            "clock_gettime failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    let mut sec = now.tv_sec + wait.as_secs() as libc::time_t;
    let mut nsec = now.tv_nsec + wait.subsec_nanos() as libc::c_long;
    const NANOS: libc::c_long = 1_000_000_000;
    while nsec >= NANOS {
        nsec -= NANOS;
        sec += 1;
    }
    Ok(libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    })
}

fn ipc_err(call: &str, slot: &str) -> SwarmError {
    SwarmError::Ipc(format!(
        "{call} failed for slot '{slot}': {}",
        std::io::Error::last_os_error()
    ))
}
