//! Cache Catalog: `db_name -> sub-cache` for one storage engine.

use std::collections::BTreeMap;
use std::path::PathBuf;

use ldapcache_core::{BackendKind, CacheConfig, CacheResult, CatalogError};

use crate::dbm_backend::DbmCache;
use crate::lmdb_backend::LmdbEnvironment;
use crate::ownership::FileOwnership;
use crate::traits::{Layout, SubCache};

/// Engine state shared by every sub-cache of a catalog.
enum Engine {
    Dbm {
        base_directory: PathBuf,
        ownership: FileOwnership,
    },
    Lmdb(LmdbEnvironment),
}

/// All sub-caches of one process, bound to one engine.
pub struct Caches {
    engine: Engine,
    sub_caches: BTreeMap<String, Box<dyn SubCache>>,
}

impl Caches {
    /// Open a catalog rooted in `config.base_directory`.
    pub fn open(config: &CacheConfig) -> CacheResult<Self> {
        let ownership = FileOwnership::from(&config.ownership);
        let engine = match config.backend {
            BackendKind::Dbm => Engine::Dbm {
                base_directory: config.base_directory.clone(),
                ownership,
            },
            BackendKind::Lmdb => Engine::Lmdb(LmdbEnvironment::open(
                &config.base_directory,
                &config.lmdb,
                ownership,
            )?),
        };
        Ok(Self {
            engine,
            sub_caches: BTreeMap::new(),
        })
    }

    /// Register a sub-cache.
    ///
    /// Registering an existing name again with the same layout returns the
    /// existing sub-cache; a different layout is rejected.
    pub fn add_sub_cache(
        &mut self,
        name: &str,
        layout: Layout,
        translate_uuid_keys: bool,
    ) -> CacheResult<&dyn SubCache> {
        if let Some(existing) = self.sub_caches.get(name) {
            if existing.layout() != layout {
                return Err(CatalogError::DuplicateSubCache {
                    name: name.to_string(),
                }
                .into());
            }
        } else {
            let sub_cache: Box<dyn SubCache> = match &self.engine {
                Engine::Dbm {
                    base_directory,
                    ownership,
                } => Box::new(DbmCache::new(
                    base_directory,
                    name,
                    layout,
                    ownership.clone(),
                )?),
                Engine::Lmdb(env) => Box::new(env.open_sub_cache(name, layout, translate_uuid_keys)?),
            };
            tracing::debug!(sub_cache = name, ?layout, "Registered sub-cache");
            self.sub_caches.insert(name.to_string(), sub_cache);
        }
        self.get_sub_cache(name)
    }

    /// Look up a registered sub-cache.
    pub fn get_sub_cache(&self, name: &str) -> CacheResult<&dyn SubCache> {
        self.sub_caches
            .get(name)
            .map(|sub_cache| sub_cache.as_ref())
            .ok_or_else(|| {
                CatalogError::UnknownSubCache {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sub_caches.keys().map(String::as_str)
    }

    pub fn sub_caches(&self) -> impl Iterator<Item = &dyn SubCache> {
        self.sub_caches.values().map(|sub_cache| sub_cache.as_ref())
    }

    /// Wipe every registered sub-cache.
    pub fn clear_all(&self) -> CacheResult<()> {
        for sub_cache in self.sub_caches() {
            sub_cache.clear()?;
        }
        Ok(())
    }

    /// Run engine maintenance on every registered sub-cache.
    pub fn cleanup_all(&self) -> CacheResult<()> {
        for sub_cache in self.sub_caches() {
            sub_cache.cleanup()?;
        }
        Ok(())
    }
}
