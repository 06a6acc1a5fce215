//! File locking that serializes index builds per cache directory.
//!
//! Uses flock() for advisory locking. The holder of the lock is the only
//! process allowed to load-or-build the index and write the cache blob;
//! others wait and then find the freshly written cache.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Lock file name placed in the cache directory
const LOCK_FILE_NAME: &str = "index.lock";

/// A held file lock that releases on drop
pub struct BuildLock {
    #[allow(dead_code)]
    file: File,
}

impl BuildLock {
    /// Attempt to acquire the lock without waiting.
    /// Returns a `WouldBlock` error if another process holds it.
    #[cfg(test)]
    pub fn try_acquire(cache_dir: &Path) -> io::Result<Self> {
        let file = Self::open(cache_dir)?;
        Self::try_lock_exclusive(&file)?;
        Ok(BuildLock { file })
    }

    /// Acquire the lock, blocking until available.
    pub fn acquire(cache_dir: &Path) -> io::Result<Self> {
        let file = Self::open(cache_dir)?;
        Self::lock_exclusive(&file)?;
        Ok(BuildLock { file })
    }

    fn open(cache_dir: &Path) -> io::Result<File> {
        std::fs::create_dir_all(cache_dir)?;
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(cache_dir.join(LOCK_FILE_NAME))
    }

    #[cfg(all(unix, test))]
    fn try_lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
        if result != 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::WouldBlock
                || err.raw_os_error() == Some(libc::EWOULDBLOCK)
                || err.raw_os_error() == Some(libc::EAGAIN)
            {
                return Err(io::Error::new(
                    io::ErrorKind::WouldBlock,
                    "Index cache is locked by another build",
                ));
            }
            return Err(err);
        }
        Ok(())
    }

    #[cfg(unix)]
    fn lock_exclusive(file: &File) -> io::Result<()> {
        let fd = file.as_raw_fd();
        let result = unsafe { libc::flock(fd, libc::LOCK_EX) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    // TODO: use LockFileEx on Windows; builds are not serialized there yet.
    #[cfg(all(not(unix), test))]
    fn try_lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }

    #[cfg(not(unix))]
    fn lock_exclusive(_file: &File) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
impl Drop for BuildLock {
    fn drop(&mut self) {
        let fd = self.file.as_raw_fd();
        // Release the lock - ignore errors on drop
        unsafe { libc::flock(fd, libc::LOCK_UN) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(unix)]
    fn test_acquire_and_release() {
        let dir = tempfile::tempdir().unwrap();

        let lock1 = BuildLock::try_acquire(dir.path());
        assert!(lock1.is_ok(), "First lock should succeed");

        // flock locks belong to the open file description, so a second open
        // in the same process conflicts too
        let lock2 = BuildLock::try_acquire(dir.path());
        assert!(matches!(lock2, Err(ref e) if e.kind() == io::ErrorKind::WouldBlock));

        drop(lock1);

        let lock3 = BuildLock::try_acquire(dir.path());
        assert!(lock3.is_ok(), "Lock should succeed after release");
    }

    #[test]
    fn test_acquire_creates_cache_dir() {
        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join("cache");

        let _lock = BuildLock::acquire(&cache_dir).unwrap();
        assert!(cache_dir.join(LOCK_FILE_NAME).exists());
    }
}
