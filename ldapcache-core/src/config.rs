//! Configuration types
//!
//! All fields are required unless explicitly marked optional. No defaults
//! are filled in during parsing; [`CacheConfig::standard`] is the one place
//! that spells out the production values.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "LDAPCACHE_CONFIG";

/// Storage engine backing all sub-caches of a catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// One dbm-style hash file per sub-cache, exclusive writer lock,
    /// unlocked readers.
    #[serde(alias = "gdbm")]
    Dbm,
    /// One LMDB environment with a named database per sub-cache.
    Lmdb,
}

/// Owner and mode applied to every engine file after it is created,
/// cleared or reorganized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OwnershipConfig {
    /// Account that owns the files. `None` leaves ownership untouched.
    pub user: Option<String>,
    pub mode: u32,
}

/// LMDB environment limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LmdbConfig {
    pub map_size: usize,
    pub max_dbs: u32,
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    pub backend: BackendKind,
    /// Directory holding the dbm files or the LMDB environment.
    pub base_directory: PathBuf,
    /// JSON file listing the administrator-defined shards.
    pub shard_config: PathBuf,
    pub ownership: OwnershipConfig,
    pub lmdb: LmdbConfig,
}

impl CacheConfig {
    /// Production configuration: dbm backend, files owned by `listener`
    /// with mode 0640, LMDB limits of 128 databases and a 4 GiB map.
    pub fn standard() -> Self {
        Self {
            backend: BackendKind::Dbm,
            base_directory: PathBuf::from("/var/lib/ldapcache/cache"),
            shard_config: PathBuf::from("/var/lib/ldapcache/shards.json"),
            ownership: OwnershipConfig {
                user: Some("listener".to_string()),
                mode: 0o640,
            },
            lmdb: LmdbConfig {
                map_size: (1usize << 32) - 1,
                max_dbs: 128,
            },
        }
    }

    /// Configuration rooted in `dir` with ownership changes disabled,
    /// for tests and unprivileged tooling.
    pub fn in_directory(dir: &Path, backend: BackendKind) -> Self {
        Self {
            backend,
            base_directory: dir.join("cache"),
            shard_config: dir.join("shards.json"),
            ownership: OwnershipConfig {
                user: None,
                mode: 0o640,
            },
            lmdb: LmdbConfig {
                map_size: 10 * 1024 * 1024,
                max_dbs: 128,
            },
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let config: CacheConfig = toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `explicit`, else from `$LDAPCACHE_CONFIG`, else fall back to
    /// [`CacheConfig::standard`].
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_path(&path),
            None => Ok(Self::standard()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_directory.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "base_directory".to_string(),
            });
        }
        if self.shard_config.as_os_str().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "shard_config".to_string(),
            });
        }
        if self.ownership.mode > 0o7777 {
            return Err(ConfigError::InvalidValue {
                field: "ownership.mode".to_string(),
                value: format!("{:o}", self.ownership.mode),
                reason: "not a permission mode".to_string(),
            });
        }
        if let Some(user) = &self.ownership.user {
            if user.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "ownership.user".to_string(),
                    value: user.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.lmdb.map_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lmdb.map_size".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.lmdb.max_dbs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lmdb.max_dbs".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
