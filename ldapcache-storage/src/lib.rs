//! ldapcache Storage Layer
//!
//! Sub-cache engines (dbm-style files or LMDB), the Cache Catalog that binds
//! shards to them, the Shard Configuration Store and the Shard Update
//! Engine. [`get_cache`] assembles all of it from a [`CacheConfig`].

pub mod catalog;
pub mod dbm_backend;
pub mod engine;
pub mod lmdb_backend;
pub mod lock;
pub mod ownership;
pub mod shard_config;
pub mod traits;

pub use catalog::Caches;
pub use dbm_backend::{DbmCache, MAX_CLEANUP_FAILURES};
pub use engine::{apply_event, ActiveShard, UpdateSummary};
pub use lmdb_backend::{LmdbCache, LmdbCacheError, LmdbEnvironment};
pub use ownership::FileOwnership;
pub use shard_config::ShardConfigStore;
pub use traits::{CacheReader, CacheValue, CacheWriter, Layout, SubCache};

use ldapcache_core::{BackendKind, CacheConfig, CacheError, CacheResult, CatalogError, ChangeEvent, Shard};

/// A catalog together with the shards feeding it.
pub struct MembershipCache {
    caches: Caches,
    shards: Vec<ActiveShard>,
    store: ShardConfigStore,
}

impl MembershipCache {
    pub fn caches(&self) -> &Caches {
        &self.caches
    }

    pub fn get_sub_cache(&self, name: &str) -> CacheResult<&dyn SubCache> {
        self.caches.get_sub_cache(name)
    }

    /// Active shards in registration order.
    pub fn shards(&self) -> impl Iterator<Item = &Shard> {
        self.shards.iter().map(|active| &active.shard)
    }

    pub fn shard_config(&self) -> &ShardConfigStore {
        &self.store
    }

    /// Activate `shard` and register its sub-cache.
    ///
    /// Returns `false` for a shard identical to one already active.
    pub fn register_shard(&mut self, shard: Shard) -> CacheResult<bool> {
        if self.shards.iter().any(|active| active.shard == shard) {
            return Ok(false);
        }
        let filter = shard.validate()?;
        self.caches.add_sub_cache(
            &shard.db_name,
            Layout::new(shard.single_value, shard.reverse),
            shard.keyed_by_uuid(),
        )?;
        self.shards.push(ActiveShard { shard, filter });
        Ok(true)
    }

    /// Apply one directory change event to every active shard.
    pub fn handle(&self, event: &ChangeEvent) -> CacheResult<UpdateSummary> {
        apply_event(&self.caches, &self.shards, event)
    }
}

/// Open the catalog described by `config` with the built-in and the
/// configured shards registered.
///
/// Built-ins are `memberUids` and `uniqueMembers`, plus `EntryUUID` on
/// LMDB. A configured shard whose layout conflicts with an already
/// registered sub-cache is logged and skipped.
pub fn get_cache(config: &CacheConfig) -> CacheResult<MembershipCache> {
    config.validate()?;
    let mut cache = MembershipCache {
        caches: Caches::open(config)?,
        shards: Vec::new(),
        store: ShardConfigStore::new(&config.shard_config),
    };

    let mut builtins = Shard::defaults();
    if config.backend == BackendKind::Lmdb {
        builtins.push(Shard::entry_uuid());
    }
    for shard in builtins {
        cache.register_shard(shard)?;
    }

    for shard in cache.store.shards_from_config() {
        let db_name = shard.db_name.clone();
        match cache.register_shard(shard) {
            Ok(_) => {}
            Err(CacheError::Catalog(err @ CatalogError::DuplicateSubCache { .. })) => {
                tracing::warn!(shard = %db_name, error = %err, "Skipping conflicting shard");
            }
            Err(err) => return Err(err),
        }
    }

    tracing::debug!(
        backend = ?config.backend,
        shards = cache.shards.len(),
        "Opened membership cache"
    );
    Ok(cache)
}
