//! LMDB-backed sub-caches.
//!
//! Uses the heed crate (Rust bindings for LMDB). All sub-caches of a catalog
//! share one environment directory (`data.mdb` + `lock.mdb`) and each gets a
//! named database in it. Multi-valued and reverse tables are opened with
//! `DUP_SORT`, so their values come back in byte-wise sorted order.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions:
//! - Read transactions back [`CacheReader`] handles (snapshot isolation)
//! - Write transactions back [`CacheWriter`] handles (one writer at a time)
//!
//! # UUID keys
//!
//! Shards keyed by `entryUUID` store UUIDs as keys. The catalog keeps an
//! `EntryUUID` table (uuid -> DN) and [`SubCache::load`] maps such keys back
//! to DNs through it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use heed::types::Str;
use heed::{Database, DatabaseFlags, Env, EnvOpenOptions, RoTxn, RwTxn};
use ldapcache_core::{dn, CacheError, CacheResult, LmdbConfig, StorageError, ENTRY_UUID};
use uuid::Uuid;

use crate::ownership::FileOwnership;
use crate::traits::{CacheReader, CacheValue, CacheWriter, Layout, SubCache};

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment at {path}: {reason}")]
    EnvOpen { path: String, reason: String },

    /// Failed to open the database within the environment.
    #[error("Failed to open database {name}: {reason}")]
    DbOpen { name: String, reason: String },

    /// Transaction error.
    #[error("Transaction error on {name}: {reason}")]
    Transaction { name: String, reason: String },
}

/// Convert LmdbCacheError to CacheError.
impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        let sub_cache = match &e {
            LmdbCacheError::EnvOpen { path, .. } => path.clone(),
            LmdbCacheError::DbOpen { name, .. } | LmdbCacheError::Transaction { name, .. } => {
                name.clone()
            }
        };
        CacheError::Storage(StorageError::Transaction {
            sub_cache,
            reason: e.to_string(),
        })
    }
}

fn txn_error(name: &str) -> impl Fn(heed::Error) -> LmdbCacheError + '_ {
    move |e| LmdbCacheError::Transaction {
        name: name.to_string(),
        reason: e.to_string(),
    }
}

/// Shared LMDB environment of one catalog.
pub struct LmdbEnvironment {
    env: Env,
    path: PathBuf,
    ownership: FileOwnership,
}

impl LmdbEnvironment {
    /// Open (creating if needed) the environment in `path`.
    pub fn open(path: &Path, limits: &LmdbConfig, ownership: FileOwnership) -> CacheResult<Self> {
        std::fs::create_dir_all(path).map_err(|e| StorageError::io(path, e))?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(limits.map_size)
                .max_dbs(limits.max_dbs)
                .open(path)
        }
        .map_err(|e| LmdbCacheError::EnvOpen {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let environment = Self {
            env,
            path: path.to_path_buf(),
            ownership,
        };
        environment.fix_ownership()?;
        Ok(environment)
    }

    /// Open (creating if needed) the named database backing one sub-cache.
    pub fn open_sub_cache(
        &self,
        name: &str,
        layout: Layout,
        translate_uuid_keys: bool,
    ) -> CacheResult<LmdbCache> {
        let mut wtxn = self.env.write_txn().map_err(txn_error(name))?;
        let db = self.create_database(&mut wtxn, name, layout)?;
        let uuid_index = if translate_uuid_keys && name != ENTRY_UUID {
            Some(self.create_database(&mut wtxn, ENTRY_UUID, Layout::SINGLE)?)
        } else {
            None
        };
        wtxn.commit().map_err(txn_error(name))?;
        self.fix_ownership()?;

        Ok(LmdbCache {
            name: name.to_string(),
            layout,
            env: self.env.clone(),
            db,
            uuid_index,
            files: self.files(),
            ownership: self.ownership.clone(),
        })
    }

    fn create_database(
        &self,
        wtxn: &mut RwTxn<'_>,
        name: &str,
        layout: Layout,
    ) -> Result<Database<Str, Str>, LmdbCacheError> {
        let mut options = self.env.database_options().types::<Str, Str>();
        options.name(name);
        if layout.is_multi() {
            options.flags(DatabaseFlags::DUP_SORT);
        }
        options.create(wtxn).map_err(|e| LmdbCacheError::DbOpen {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }

    fn files(&self) -> [PathBuf; 2] {
        [self.path.join("data.mdb"), self.path.join("lock.mdb")]
    }

    fn fix_ownership(&self) -> CacheResult<()> {
        let files = self.files();
        self.ownership
            .apply_all(files.iter().map(PathBuf::as_path))
            .map_err(Into::into)
    }
}

/// One named database of the shared environment.
pub struct LmdbCache {
    name: String,
    layout: Layout,
    env: Env,
    db: Database<Str, Str>,
    /// `EntryUUID` table used to translate UUID keys in `load()`.
    uuid_index: Option<Database<Str, Str>>,
    files: [PathBuf; 2],
    ownership: FileOwnership,
}

impl LmdbCache {
    fn read_value(&self, txn: &RoTxn<'_>, key: &str) -> CacheResult<CacheValue> {
        if self.layout.single_value {
            let value = self.db.get(txn, key).map_err(txn_error(&self.name))?;
            return Ok(CacheValue::Single(value.map(str::to_string)));
        }
        let mut values = Vec::new();
        if let Some(iter) = self
            .db
            .get_duplicates(txn, key)
            .map_err(txn_error(&self.name))?
        {
            for item in iter {
                let (_, value) = item.map_err(txn_error(&self.name))?;
                values.push(value.to_string());
            }
        }
        Ok(CacheValue::Multi(values))
    }

    fn read_keys(&self, txn: &RoTxn<'_>) -> CacheResult<Vec<String>> {
        let mut keys: Vec<String> = Vec::new();
        for item in self.db.iter(txn).map_err(txn_error(&self.name))? {
            let (key, _) = item.map_err(txn_error(&self.name))?;
            if keys.last().map(String::as_str) != Some(key) {
                keys.push(key.to_string());
            }
        }
        Ok(keys)
    }

    /// Map a UUID key to the lower-cased DN recorded for it, if any.
    fn translate_key(&self, txn: &RoTxn<'_>, key: &str) -> CacheResult<String> {
        let Some(index) = self.uuid_index else {
            return Ok(key.to_string());
        };
        if Uuid::parse_str(key).is_err() {
            return Ok(key.to_string());
        }
        let dn = index.get(txn, key).map_err(txn_error(&self.name))?;
        Ok(dn.map_or_else(|| key.to_string(), dn::normalize))
    }
}

impl SubCache for LmdbCache {
    fn name(&self) -> &str {
        &self.name
    }

    fn layout(&self) -> Layout {
        self.layout
    }

    fn reader(&self) -> CacheResult<Box<dyn CacheReader + '_>> {
        let txn = self.env.read_txn().map_err(txn_error(&self.name))?;
        Ok(Box::new(LmdbReader { cache: self, txn }))
    }

    fn writer(&self) -> CacheResult<Box<dyn CacheWriter + '_>> {
        let txn = self.env.write_txn().map_err(txn_error(&self.name))?;
        Ok(Box::new(LmdbWriter { cache: self, txn }))
    }

    fn load(&self) -> CacheResult<BTreeMap<String, CacheValue>> {
        let txn = self.env.read_txn().map_err(txn_error(&self.name))?;
        let mut loaded = BTreeMap::new();
        for key in self.read_keys(&txn)? {
            let value = self.read_value(&txn, &key)?;
            loaded.insert(self.translate_key(&txn, &key)?, value);
        }
        Ok(loaded)
    }

    fn clear(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error(&self.name))?;
        self.db.clear(&mut wtxn).map_err(txn_error(&self.name))?;
        wtxn.commit().map_err(txn_error(&self.name))?;
        self.ownership
            .apply_all(self.files.iter().map(PathBuf::as_path))?;
        Ok(())
    }

    /// LMDB reuses freed pages on its own.
    fn cleanup(&self) -> CacheResult<()> {
        Ok(())
    }
}

/// Read transaction on one sub-cache.
pub struct LmdbReader<'a> {
    cache: &'a LmdbCache,
    txn: RoTxn<'a>,
}

impl CacheReader for LmdbReader<'_> {
    fn get(&self, key: &str) -> CacheResult<CacheValue> {
        self.cache.read_value(&self.txn, key)
    }

    fn keys(&self) -> CacheResult<Vec<String>> {
        self.cache.read_keys(&self.txn)
    }
}

/// Write transaction on one sub-cache. Dropping it aborts.
pub struct LmdbWriter<'a> {
    cache: &'a LmdbCache,
    txn: RwTxn<'a>,
}

impl LmdbWriter<'_> {
    fn has_member(&self, key: &str, member: &str) -> CacheResult<bool> {
        Ok(self
            .cache
            .read_value(&self.txn, key)?
            .into_values()
            .iter()
            .any(|m| m == member))
    }
}

impl CacheWriter for LmdbWriter<'_> {
    fn get(&self, key: &str) -> CacheResult<CacheValue> {
        self.cache.read_value(&self.txn, key)
    }

    fn save(&mut self, key: &str, values: &[String]) -> CacheResult<()> {
        let cache = self.cache;
        let err = txn_error(&cache.name);
        let layout = cache.layout;

        if layout.reverse {
            for value in values {
                if !self.has_member(value, key)? {
                    cache.db.put(&mut self.txn, value, key).map_err(&err)?;
                }
            }
        } else if layout.single_value {
            match values.first() {
                Some(value) => cache.db.put(&mut self.txn, key, value).map_err(&err)?,
                None => {
                    cache.db.delete(&mut self.txn, key).map_err(&err)?;
                }
            }
        } else {
            cache.db.delete(&mut self.txn, key).map_err(&err)?;
            for value in values {
                cache.db.put(&mut self.txn, key, value).map_err(&err)?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, key: &str, values: &[String]) -> CacheResult<()> {
        let cache = self.cache;
        let err = txn_error(&cache.name);

        if !cache.layout.reverse {
            cache.db.delete(&mut self.txn, key).map_err(&err)?;
            return Ok(());
        }
        for value in values {
            cache
                .db
                .delete_one_duplicate(&mut self.txn, value, key)
                .map_err(&err)?;
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> CacheResult<()> {
        let name = &self.cache.name;
        self.txn.commit().map_err(txn_error(name))?;
        Ok(())
    }
}
