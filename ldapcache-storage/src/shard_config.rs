//! Shard Configuration Store.
//!
//! The administrator-defined shards live in one JSON file holding an array
//! of shard objects. Reads are forgiving: a missing or unreadable file is an
//! empty list and a malformed entry is skipped on its own. Updates are a
//! read-modify-write of the whole file under an exclusive `flock` on
//! `<path>.lock`, written through a temp file and renamed into place.

use std::io::Write;
use std::path::{Path, PathBuf};

use ldapcache_core::{CacheError, CacheResult, ConfigError, Shard, StorageError};
use serde_json::Value;

use crate::lock::FlockGuard;

/// The persisted shard list.
#[derive(Debug, Clone)]
pub struct ShardConfigStore {
    path: PathBuf,
}

impl ShardConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All well-formed shards in the file, in file order.
    pub fn shards_from_config(&self) -> Vec<Shard> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No shard configuration");
                return Vec::new();
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Cannot read shard configuration");
                return Vec::new();
            }
        };
        let entries: Vec<Value> = match serde_json::from_str(&text) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Shard configuration is not a JSON array");
                return Vec::new();
            }
        };

        let mut shards = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            let shard: Shard = match serde_json::from_value(entry) {
                Ok(shard) => shard,
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), index, error = %e, "Skipping malformed shard entry");
                    continue;
                }
            };
            if let Err(e) = shard.validate() {
                tracing::warn!(
                    path = %self.path.display(),
                    index,
                    db_name = %shard.db_name,
                    error = %e,
                    "Skipping invalid shard entry"
                );
                continue;
            }
            shards.push(shard);
        }
        shards
    }

    /// Append `shard` unless an identical entry is already present.
    ///
    /// Returns whether the file changed.
    pub fn add_shard_to_config(&self, shard: &Shard) -> CacheResult<bool> {
        shard.validate()?;
        let entry = shard_value(shard)?;
        self.update(Unreadable::Fail, |entries| {
            if entries.contains(&entry) {
                return false;
            }
            entries.push(entry);
            true
        })
    }

    /// Remove the entry identical to `shard`, if present.
    ///
    /// Returns whether the file changed; removing an absent shard is not an
    /// error, and a file that cannot be read or parsed is left untouched.
    pub fn rm_shard_from_config(&self, shard: &Shard) -> CacheResult<bool> {
        let entry = shard_value(shard)?;
        self.update(Unreadable::Skip, |entries| match entries.iter().position(|e| *e == entry) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        })
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    /// Read-modify-write under the store lock. `mutate` returns whether it
    /// changed anything; unchanged lists are not written back.
    fn update<F>(&self, unreadable: Unreadable, mutate: F) -> CacheResult<bool>
    where
        F: FnOnce(&mut Vec<Value>) -> bool,
    {
        let _guard = FlockGuard::lock_path(&self.lock_path())?;

        let read = match std::fs::read_to_string(&self.path) {
            Ok(text) => serde_json::from_str::<Vec<Value>>(&text).map_err(|e| {
                CacheError::from(ConfigError::Parse {
                    path: self.path.display().to_string(),
                    reason: e.to_string(),
                })
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(StorageError::io(&self.path, e).into()),
        };
        let mut entries = match (read, unreadable) {
            (Ok(entries), _) => entries,
            (Err(err), Unreadable::Fail) => return Err(err),
            (Err(err), Unreadable::Skip) => {
                tracing::warn!(path = %self.path.display(), error = %err, "Shard configuration unusable, leaving it unchanged");
                return Ok(false);
            }
        };

        if !mutate(&mut entries) {
            return Ok(false);
        }

        // serde_json objects keep their keys sorted.
        let mut content = serde_json::to_string_pretty(&entries).map_err(|e| ConfigError::Parse {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        content.push('\n');

        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".tmp.{}", std::process::id()));
        let tmp_path = self.path.with_file_name(tmp_name);
        {
            let mut file =
                std::fs::File::create(&tmp_path).map_err(|e| StorageError::io(&tmp_path, e))?;
            file.write_all(content.as_bytes())
                .and_then(|_| file.sync_all())
                .map_err(|e| StorageError::io(&tmp_path, e))?;
        }
        std::fs::rename(&tmp_path, &self.path).map_err(|e| StorageError::io(&self.path, e))?;
        tracing::info!(path = %self.path.display(), entries = entries.len(), "Updated shard configuration");
        Ok(true)
    }
}

/// What an update does when the current file cannot be read or parsed.
#[derive(Debug, Clone, Copy)]
enum Unreadable {
    Fail,
    Skip,
}

fn shard_value(shard: &Shard) -> Result<Value, ConfigError> {
    serde_json::to_value(shard).map_err(|e| ConfigError::InvalidValue {
        field: "shard".to_string(),
        value: shard.db_name.clone(),
        reason: e.to_string(),
    })
}
