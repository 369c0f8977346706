//! Ownership and permissions of engine files.
//!
//! Every file an engine creates, truncates or replaces is handed to the
//! listener service account (uid only, group unchanged) and given a mode
//! that keeps it unreadable for other users.

use ldapcache_core::{OwnershipConfig, StorageError};
use std::ffi::CString;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Owner and mode to stamp on engine files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOwnership {
    user: Option<String>,
    mode: u32,
}

impl FileOwnership {
    pub fn new(user: Option<String>, mode: u32) -> Self {
        Self { user, mode }
    }

    /// Leave the owner alone, only fix the mode.
    pub fn mode_only(mode: u32) -> Self {
        Self { user: None, mode }
    }

    /// `chown` to the configured account (if any), then `chmod`.
    pub fn apply(&self, path: &Path) -> Result<(), StorageError> {
        if let Some(user) = &self.user {
            let uid = lookup_uid(user)?;
            std::os::unix::fs::chown(path, Some(uid), None)
                .map_err(|e| StorageError::io(path, e))?;
        }
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(self.mode))
            .map_err(|e| StorageError::io(path, e))
    }

    /// Apply to every path that exists; missing paths are skipped.
    pub fn apply_all<'a>(&self, paths: impl IntoIterator<Item = &'a Path>) -> Result<(), StorageError> {
        for path in paths {
            if path.exists() {
                self.apply(path)?;
            }
        }
        Ok(())
    }
}

impl From<&OwnershipConfig> for FileOwnership {
    fn from(config: &OwnershipConfig) -> Self {
        Self::new(config.user.clone(), config.mode)
    }
}

/// Resolve an account name to its uid via the system user database.
pub fn lookup_uid(user: &str) -> Result<u32, StorageError> {
    let unknown = || StorageError::UnknownAccount {
        user: user.to_string(),
    };
    let name = CString::new(user).map_err(|_| unknown())?;

    let mut buf_len = 1024usize;
    loop {
        let mut passwd: libc::passwd = unsafe { std::mem::zeroed() };
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        let mut buf = vec![0 as libc::c_char; buf_len];
        let rc = unsafe {
            libc::getpwnam_r(
                name.as_ptr(),
                &mut passwd,
                buf.as_mut_ptr(),
                buf.len(),
                &mut result,
            )
        };
        if rc == libc::ERANGE && buf_len < (1 << 20) {
            buf_len *= 2;
            continue;
        }
        if rc != 0 || result.is_null() {
            return Err(lookup_error(user, rc));
        }
        return Ok(passwd.pw_uid);
    }
}

/// `getpwnam_r` reports a missing entry as success with no result; any
/// nonzero return code is a failure of the lookup itself.
fn lookup_error(user: &str, rc: libc::c_int) -> StorageError {
    if rc == 0 {
        return StorageError::UnknownAccount {
            user: user.to_string(),
        };
    }
    StorageError::Io {
        path: format!("passwd entry of {user}"),
        reason: std::io::Error::from_raw_os_error(rc).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_mode_is_applied() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("memberUids.db");
        std::fs::write(&path, b"").expect("write should succeed");

        FileOwnership::mode_only(0o640)
            .apply(&path)
            .expect("apply should succeed");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o7777, 0o640);
    }

    #[test]
    fn test_root_resolves() {
        assert_eq!(lookup_uid("root"), Ok(0));
    }

    #[test]
    fn test_unknown_account() {
        assert_eq!(
            lookup_uid("no-such-account-ldapcache"),
            Err(StorageError::UnknownAccount {
                user: "no-such-account-ldapcache".to_string()
            })
        );
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let path = dir.path().join("x.db");
        std::fs::write(&path, b"").expect("write should succeed");
        let ownership = FileOwnership::new(Some("no-such-account-ldapcache".into()), 0o640);
        assert!(matches!(
            ownership.apply(&path),
            Err(StorageError::UnknownAccount { .. })
        ));
    }

    #[test]
    fn test_lookup_failure_is_not_unknown_account() {
        assert_eq!(
            lookup_error("listener", 0),
            StorageError::UnknownAccount {
                user: "listener".to_string()
            }
        );
        match lookup_error("listener", libc::EIO) {
            StorageError::Io { path, reason } => {
                assert!(path.contains("listener"));
                assert_eq!(reason, std::io::Error::from_raw_os_error(libc::EIO).to_string());
            }
            other => panic!("Expected Io, got {other:?}"),
        }
    }

    #[test]
    fn test_apply_all_skips_missing() {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let missing = dir.path().join("lock.mdb");
        FileOwnership::mode_only(0o640)
            .apply_all([missing.as_path()])
            .expect("missing files are skipped");
    }
}
