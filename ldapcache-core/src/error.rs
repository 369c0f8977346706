//! Error types for cache operations

use thiserror::Error;

/// Storage engine errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Transaction failed on {sub_cache}: {reason}")]
    Transaction { sub_cache: String, reason: String },

    #[error("I/O error on {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Corrupt record in {path} at line {line}: {reason}")]
    Corrupt {
        path: String,
        line: usize,
        reason: String,
    },

    #[error("Serialization failed for {sub_cache}: {reason}")]
    Serialization { sub_cache: String, reason: String },

    #[error("Unknown service account: {user}")]
    UnknownAccount { user: String },

    #[error("Cleanup of {sub_cache} failed {attempts} times in a row: {reason}")]
    CleanupFailed {
        sub_cache: String,
        attempts: u32,
        reason: String,
    },

    #[error("Failed to lock {path}: {reason}")]
    LockFailed { path: String, reason: String },
}

impl StorageError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl AsRef<std::path::Path>, err: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            reason: err.to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid LDAP filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("Failed to read {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Catalog lookup and registration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Sub-cache not registered: {name}")]
    UnknownSubCache { name: String },

    #[error("Sub-cache {name} already registered with a different layout")]
    DuplicateSubCache { name: String },
}

/// Change event errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Invalid change event for {dn}: {reason}")]
    InvalidEvent { dn: String, reason: String },

    #[error("Attribute {attribute} holds a value that is not UTF-8")]
    InvalidAttributeValue { attribute: String },
}

/// Master error type for all cache errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),
}

/// Result type alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_failed_display() {
        let err = StorageError::CleanupFailed {
            sub_cache: "uniqueMembers".to_string(),
            attempts: 6,
            reason: "disk full".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("uniqueMembers"));
        assert!(msg.contains('6'));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_unknown_sub_cache_display() {
        let err = CatalogError::UnknownSubCache {
            name: "testcache".to_string(),
        };
        assert!(format!("{}", err).contains("testcache"));
    }

    #[test]
    fn test_invalid_filter_display() {
        let err = ConfigError::InvalidFilter {
            filter: "(objectClass=".to_string(),
            reason: "unexpected end".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("(objectClass="));
        assert!(msg.contains("unexpected end"));
    }

    #[test]
    fn test_io_helper_keeps_path() {
        let err = StorageError::io(
            "/tmp/x.db",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        match err {
            StorageError::Io { path, reason } => {
                assert_eq!(path, "/tmp/x.db");
                assert!(reason.contains("gone"));
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn test_cache_error_from_variants() {
        let storage = CacheError::from(StorageError::UnknownAccount {
            user: "listener".to_string(),
        });
        assert!(matches!(storage, CacheError::Storage(_)));

        let config = CacheError::from(ConfigError::MissingRequired {
            field: "base_directory".to_string(),
        });
        assert!(matches!(config, CacheError::Config(_)));

        let catalog = CacheError::from(CatalogError::UnknownSubCache {
            name: "x".to_string(),
        });
        assert!(matches!(catalog, CacheError::Catalog(_)));

        let event = CacheError::from(EventError::InvalidAttributeValue {
            attribute: "sn".to_string(),
        });
        assert!(matches!(event, CacheError::Event(_)));
    }
}
