//! Process-wide quit flag raised from signal context.
//!
//! The daemon and the viewer both loop until SIGINT, SIGABRT or SIGALRM
//! arrives. The handler only stores into an atomic, which is
//! async-signal-safe; in-flight blocking calls finish or error naturally.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::{Result, SwarmError};

static QUIT: AtomicBool = AtomicBool::new(false);

extern "C" fn raise_quit(_signo: libc::c_int) {
    QUIT.store(true, Ordering::SeqCst);
}

/// Install the handlers. Returns the flag so callers can poll it.
pub fn install_handlers() -> Result<&'static AtomicBool> {
    let handler: extern "C" fn(libc::c_int) = raise_quit;
    for signo in [libc::SIGINT, libc::SIGABRT, libc::SIGALRM] {
        // SAFETY: the handler only performs an atomic store, which is
        // async-signal-safe; the function pointer outlives the process.
        let prev = unsafe { libc::signal(signo, handler as libc::sighandler_t) };
        if prev == libc::SIG_ERR {
            return Err(SwarmError::Config(format!(
                "cannot install handler for signal {signo}: {}",
                std::io::Error::last_os_error()
            )));
        }
    }
    Ok(&QUIT)
}

/// True once any of the handled signals fired.
pub fn quit_requested() -> bool {
    QUIT.load(Ordering::SeqCst)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handlers_install_and_flag_raises() {
        install_handlers().expect("install");
        // SAFETY: raising a handled signal in-process only runs the
        // registered atomic-store handler.
        unsafe { libc::raise(libc::SIGALRM) };
        assert!(quit_requested());
    }
}
