// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemonization and PID file handling.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

use nix::unistd::{dup2, fork, setsid, ForkResult};

/// Detach from the controlling terminal: double fork with a `setsid` in
/// between, stdio pointed at /dev/null. Must run before the async runtime
/// starts; forking a multi-threaded process is not survivable.
pub fn daemonize() -> std::io::Result<()> {
    fork_and_exit_parent()?;
    setsid().map_err(io_error)?;
    fork_and_exit_parent()?;

    let devnull = OpenOptions::new()
        .read(true)
        .write(true)
        .open("/dev/null")?;
    for fd in 0..=2 {
        dup2(devnull.as_raw_fd(), fd).map_err(io_error)?;
    }
    Ok(())
}

fn fork_and_exit_parent() -> std::io::Result<()> {
    // Safety: called before any threads are spawned.
    match unsafe { fork() }.map_err(io_error)? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

fn io_error(errno: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(errno as i32)
}

/// PID file that disappears again when dropped on clean exit.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: PathBuf) -> std::io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "pidfile not removed");
        }
    }
}

#[cfg(test)]
#[path = "detach_tests.rs"]
mod tests;
