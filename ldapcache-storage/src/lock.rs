//! Advisory file locks.

use ldapcache_core::StorageError;
use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::path::Path;

/// Exclusive `flock` held for the lifetime of the guard.
///
/// The lock belongs to the open file description, so it is released when
/// the guard (and with it the file) is dropped, on every exit path.
#[derive(Debug)]
pub struct FlockGuard {
    file: File,
}

impl FlockGuard {
    /// Block until an exclusive lock on `file` is held.
    pub fn lock_exclusive(file: File, path: &Path) -> Result<Self, StorageError> {
        loop {
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
            if rc == 0 {
                return Ok(Self { file });
            }
            let err = std::io::Error::last_os_error();
            if err.kind() != std::io::ErrorKind::Interrupted {
                return Err(StorageError::LockFailed {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                });
            }
        }
    }

    /// Open (creating if needed) a dedicated lock file and lock it.
    pub fn lock_path(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::io(parent, e))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        Self::lock_exclusive(file, path)
    }

    pub fn file(&self) -> &File {
        &self.file
    }

    pub fn file_mut(&mut self) -> &mut File {
        &mut self.file
    }
}

impl Drop for FlockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn try_lock(path: &Path) -> bool {
        let file = File::open(path).expect("open should succeed");
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        rc == 0
    }

    #[test]
    fn test_lock_is_exclusive_until_drop() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("x.lock");
        let guard = FlockGuard::lock_path(&path).expect("lock should succeed");
        assert!(!try_lock(&path), "second description must not get the lock");
        drop(guard);
        assert!(try_lock(&path), "lock must be released on drop");
    }

    #[test]
    fn test_lock_path_creates_parents() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("a/b/c.lock");
        let _guard = FlockGuard::lock_path(&path).expect("lock should succeed");
        assert!(path.exists());
    }
}
