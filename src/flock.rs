use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

use crate::error::Result;
use crate::Error;

/// Exclusive advisory lock held by the single writer of a history file.
pub struct FileLock {
    _file: File,
    path: PathBuf,
}

impl FileLock {
    /// Lock file guarding `history`: the same path with `.lock` appended.
    pub fn path_for(history: &Path) -> PathBuf {
        let mut name = history.as_os_str().to_os_string();
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Creates the lock file if needed and locks it without blocking.
    /// The lock file contains the process ID for debugging purposes.
    pub fn lock<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
            .map_err(Error::LockError)?;

        Self::try_lock(&file).map_err(Error::LockError)?;

        writeln!(file, "{}", std::process::id()).map_err(Error::LockError)?;
        file.flush().map_err(Error::LockError)?;

        tracing::debug!(path = %path.display(), "Acquired writer lock");
        Ok(Self { _file: file, path })
    }

    #[cfg(unix)]
    fn try_lock(file: &File) -> io::Result<()> {
        use libc::{flock, LOCK_EX, LOCK_NB};

        let fd = file.as_raw_fd();
        let result = unsafe { flock(fd, LOCK_EX | LOCK_NB) };
        if result != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn try_lock(_file: &File) -> io::Result<()> {
        // No advisory locking off unix; the lock file still records the owner.
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        // Closing the descriptor releases the flock. The file itself is
        // left in place so a concurrent locker never races a removal.
        tracing::debug!(path = %self.path.display(), "Released writer lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_lock_records_pid() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("kernel.ht.lock");

        let lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
        assert_eq!(lock.path(), lock_path.as_path());

        let content = fs::read_to_string(&lock_path).expect("Failed to read lock file");
        assert!(content.contains(&std::process::id().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_double_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("double.lock");

        let _first = FileLock::lock(&lock_path).expect("Failed to acquire first lock");
        let second = FileLock::lock(&lock_path);
        assert!(matches!(second, Err(Error::LockError(_))));
    }

    #[test]
    fn test_auto_unlock_on_drop() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("auto.lock");

        {
            let _lock = FileLock::lock(&lock_path).expect("Failed to acquire lock");
            assert!(lock_path.exists());
        }

        // The file outlives the lock, but the lock itself is free again.
        let _again = FileLock::lock(&lock_path).expect("Should be able to acquire lock after drop");
    }

    #[test]
    fn test_path_for() {
        assert_eq!(
            FileLock::path_for(Path::new("/var/trace/state.ht")),
            PathBuf::from("/var/trace/state.ht.lock")
        );
    }
}
