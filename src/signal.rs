use std::io;
use std::sync::atomic::{AtomicBool, Ordering};

static SHUTDOWN: AtomicBool = AtomicBool::new(false);

extern "C" fn on_shutdown_signal(_sig: libc::c_int) {
    SHUTDOWN.store(true, Ordering::SeqCst);
}

/// Installs the process signal handlers: SIGINT/SIGTERM/SIGQUIT raise the
/// shutdown flag, SIGPIPE is ignored so a dead peer surfaces as a write
/// error instead of killing the process.
pub fn install() -> io::Result<()> {
    unsafe {
        for sig in [libc::SIGINT, libc::SIGTERM, libc::SIGQUIT] {
            if libc::signal(sig, on_shutdown_signal as libc::sighandler_t) == libc::SIG_ERR {
                return Err(io::Error::last_os_error());
            }
        }
        if libc::signal(libc::SIGPIPE, libc::SIG_IGN) == libc::SIG_ERR {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN.load(Ordering::SeqCst)
}

/// Sends SIGTERM to a child process. The forced SIGKILL escalation lives in
/// the timeout sweep.
pub fn terminate_child(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
}
