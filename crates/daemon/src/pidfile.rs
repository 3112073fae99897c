//! Single-instance lock for the supervisor.
//!
//! At most one supervisor per mode may run on a host. The lock is a PID file
//! holding the owner's process id as decimal text:
//!
//! ```text
//! <pidPath>/oni-dev.pid
//! <pidPath>/oni-prod.pid
//! ```
//!
//! A file left behind by a crashed supervisor is detected at the next
//! acquisition (its pid no longer answers a zero signal, or its content is
//! not a pid) and replaced.
//!
//! ## Example
//!
//! ```rust,no_run
//! use oni_daemon::pidfile::PidLock;
//! use oni_protocol::Mode;
//!
//! let lock = PidLock::acquire("./pids".as_ref(), Mode::Dev)?;
//! // ... run the supervisor ...
//! lock.release();
//! # Ok::<(), oni_daemon::pidfile::LockError>(())
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use oni_protocol::Mode;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors raised while taking the lock.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another live process owns the lock for this mode.
    #[error(
        "Oni server ({mode}) appears to already be running (pid {pid}). Remove {} if this is wrong.",
        path.display()
    )]
    AlreadyRunning { mode: Mode, pid: u32, path: PathBuf },

    /// The lock directory or file could not be accessed.
    #[error("PID file error at {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Lost creation races tolerated before giving up.
const ACQUIRE_ATTEMPTS: usize = 3;

/// Path of the lock file for `mode` inside `dir`.
pub fn pid_file_path(dir: &Path, mode: Mode) -> PathBuf {
    dir.join(format!("oni-{}.pid", mode))
}

/// Ownership of a mode's PID file. Released explicitly or on drop.
#[derive(Debug)]
pub struct PidLock {
    path: PathBuf,
    released: bool,
}

impl PidLock {
    /// Take the lock for `mode`, creating `dir` if needed.
    ///
    /// # Errors
    ///
    /// - [`LockError::AlreadyRunning`] if the file names a live process
    /// - [`LockError::Io`] if the directory or file cannot be read or written
    pub fn acquire(dir: &Path, mode: Mode) -> Result<Self, LockError> {
        fs::create_dir_all(dir).map_err(io_error(dir))?;
        let dir = std::path::absolute(dir).map_err(io_error(dir))?;
        let path = pid_file_path(&dir, mode);
        let pid = std::process::id();

        let mut attempt = 0;
        loop {
            attempt += 1;

            match fs::read_to_string(&path) {
                Ok(raw) => match parse_pid(&raw) {
                    Some(pid) if is_process_alive(pid) => {
                        return Err(LockError::AlreadyRunning { mode, pid, path });
                    }
                    stale => {
                        warn!(path = %path.display(), pid = ?stale, "removing stale PID file");
                        cleanup_stale_pid_file(&path);
                    }
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_error(&path)(e)),
            }

            match create_pid_file(&path, pid) {
                Ok(()) => break,
                Err(e)
                    if e.kind() == io::ErrorKind::AlreadyExists && attempt < ACQUIRE_ATTEMPTS =>
                {
                    debug!(path = %path.display(), attempt, "PID file appeared, rechecking");
                }
                Err(e) => return Err(io_error(&path)(e)),
            }
        }
        info!(pid, path = %path.display(), "PID file created");

        Ok(Self {
            path,
            released: false,
        })
    }

    /// Absolute path of the held lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the lock file. Errors are logged and ignored.
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "PID file removed"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, path = %self.path.display(), "failed to remove PID file"),
        }
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Create `path` holding `pid`, failing with `AlreadyExists` if it is there.
///
/// The content is written to a private file first and hard-linked into
/// place, so the lock file is never visible empty.
fn create_pid_file(path: &Path, pid: u32) -> io::Result<()> {
    static SEQ: AtomicU64 = AtomicU64::new(0);

    let mut staging = path.as_os_str().to_owned();
    staging.push(format!(".{pid}.{}.tmp", SEQ.fetch_add(1, Ordering::Relaxed)));
    let staging = PathBuf::from(staging);

    fs::write(&staging, pid.to_string())?;
    let linked = fs::hard_link(&staging, path);
    let _ = fs::remove_file(&staging);
    linked
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> LockError {
    let path = path.to_path_buf();
    move |source| LockError::Io { path, source }
}

/// Pid of the live supervisor for `mode`, if any.
///
/// Unlike [`PidLock::acquire`] this never modifies the file, so clients can
/// use it for diagnostics.
pub fn read_pid(dir: &Path, mode: Mode) -> Option<u32> {
    let raw = fs::read_to_string(pid_file_path(dir, mode)).ok()?;
    parse_pid(&raw).filter(|&pid| is_process_alive(pid))
}

fn parse_pid(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|&pid| pid > 0)
}

/// Check whether a process with the given pid exists.
///
/// Sends the null signal: nothing is delivered, but the kernel still checks
/// that the target exists. `EPERM` means it exists under another user.
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(e) => {
            debug!(pid, error = %e, "process not alive");
            false
        }
    }
}

/// Remove a stale PID file.
fn cleanup_stale_pid_file(path: &Path) {
    let _ = fs::remove_file(path);
}
