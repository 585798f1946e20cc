//! Host-wide advisory lock serializing mutating commands

use crate::error::{Error, Result};
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{File, OpenOptions};
use std::path::Path;

/// Held exclusive lock; released on drop
pub struct FabricLock {
    _file: Flock<File>,
}

impl FabricLock {
    /// Take the lock without waiting
    ///
    /// Fails with `FabricLocked` if another process holds it.
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)
            .map_err(|e| Error::LockOpen {
                path: path.to_path_buf(),
                source: e,
            })?;

        let file = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_, errno)| {
            if errno == Errno::EWOULDBLOCK {
                Error::FabricLocked(path.to_path_buf())
            } else {
                Error::Lock {
                    path: path.to_path_buf(),
                    source: errno,
                }
            }
        })?;

        tracing::debug!(path = %path.display(), "fabric lock taken");
        Ok(Self { _file: file })
    }
}
