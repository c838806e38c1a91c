//! Deferral of the process's coordination signals around blocking calls.
#![allow(unsafe_code)]

use std::io;
use std::mem;
use std::ptr;

/// Signals the outer process uses for coordination.
pub const FAULT_SIGNALS: [libc::c_int; 5] = [
    libc::SIGCHLD,
    libc::SIGALRM,
    libc::SIGUSR1,
    libc::SIGTERM,
    libc::SIGHUP,
];

/// Blocks [`FAULT_SIGNALS`] on the calling thread until dropped.
///
/// Signals raised meanwhile stay pending and are delivered once the
/// previous mask is restored.
#[must_use = "signals are unblocked again when the guard is dropped"]
pub struct SignalGuard {
    previous: libc::sigset_t,
}

impl SignalGuard {
    /// Block the fault signals, remembering the current mask.
    pub fn block() -> io::Result<Self> {
        // SAFETY: sigset_t is plain data; sigemptyset initializes it fully.
        let mut set: libc::sigset_t = unsafe { mem::zeroed() };
        let mut previous: libc::sigset_t = unsafe { mem::zeroed() };
        // SAFETY: both sets are valid, exclusively borrowed sigset_t values.
        unsafe {
            libc::sigemptyset(&mut set);
            for signal in FAULT_SIGNALS {
                libc::sigaddset(&mut set, signal);
            }
            let rc = libc::pthread_sigmask(libc::SIG_BLOCK, &set, &mut previous);
            if rc != 0 {
                return Err(io::Error::from_raw_os_error(rc));
            }
        }
        Ok(Self { previous })
    }
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        // SAFETY: previous holds the mask returned by pthread_sigmask.
        unsafe {
            libc::pthread_sigmask(libc::SIG_SETMASK, &self.previous, ptr::null_mut());
        }
    }
}
