//! SIGINT/SIGTERM cleanup listener
//!
//! Installed at init, before the first mutation. The handler itself only
//! writes the signal number to a self-pipe (the only async-signal-safe
//! part); a background thread parked on the read end performs the actual
//! cleanup through the warden and exits with the conventional
//! 128+signal code. The listener consumes one signal; further signals
//! arriving during cleanup are absorbed by the still-installed handler.

use std::fs::File;
use std::io::Read;
use std::os::fd::IntoRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::{error, warn};

use crate::backup::Warden;
use crate::error::{Result, WeaveError};

static PIPE_WR: AtomicI32 = AtomicI32::new(-1);

extern "C" fn notify(signum: libc::c_int) {
    let fd = PIPE_WR.load(Ordering::Relaxed);
    if fd >= 0 {
        let byte = signum as u8;
        unsafe {
            libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
        }
    }
}

/// State the listener needs to undo a half-finished run.
pub struct CleanupTask {
    pub warden: Warden,
    pub bootstrap: PathBuf,
    pub debug: bool,
}

/// Install the handler and spawn the listener thread.
pub fn install(task: CleanupTask) -> Result<()> {
    let (read_end, write_end) = nix::unistd::pipe().map_err(|e| WeaveError::FileIo {
        context: "create signal pipe".into(),
        source: e.into(),
    })?;
    // The write end lives for the whole process; the handler reads the
    // raw fd from the atomic.
    PIPE_WR.store(write_end.into_raw_fd(), Ordering::Relaxed);

    let action = SigAction::new(
        SigHandler::Handler(notify),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    for sig in [Signal::SIGINT, Signal::SIGTERM] {
        unsafe {
            sigaction(sig, &action).map_err(|e| WeaveError::FileIo {
                context: format!("install {sig} handler"),
                source: e.into(),
            })?;
        }
    }

    let mut pipe = File::from(read_end);
    thread::spawn(move || {
        let mut buf = [0u8; 1];
        if pipe.read_exact(&mut buf).is_err() {
            return;
        }
        let signum = i32::from(buf[0]);
        warn!("interrupted by signal {signum}, cleaning up");
        if task.debug {
            task.warden.snapshot_changed(&[&task.bootstrap]);
        } else {
            let _ = std::fs::remove_file(&task.bootstrap);
            if let Err(err) = task.warden.restore_all() {
                // The exit status is already decided by the signal.
                error!("restore failed: {err}");
            }
        }
        std::process::exit(128 + signum);
    });
    Ok(())
}
