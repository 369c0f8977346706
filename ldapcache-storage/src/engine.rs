//! Shard Update Engine: applies one directory change event to every shard.
//!
//! Each shard that matched the object before the change gets a
//! `delete(old_key, old_values)`, each shard that matches it afterwards a
//! `save(new_key, new_values)`, both through one write handle per shard.
//! Modifications are always remove-then-add, never a diff, so reverse
//! shards never keep stale associations.

use ldapcache_core::{Attributes, CacheError, CacheResult, ChangeEvent, EventError, Filter, Shard, ShardEntry};
use serde::Serialize;

use crate::catalog::Caches;

/// A registered shard with its compiled filter.
#[derive(Debug, Clone)]
pub struct ActiveShard {
    pub shard: Shard,
    pub filter: Filter,
}

impl ActiveShard {
    /// The entry this shard derives from one snapshot, if the snapshot
    /// passes the filter.
    fn entry(&self, snapshot: Option<(&str, &Attributes)>) -> Result<Option<ShardEntry>, EventError> {
        match snapshot {
            Some((dn, attrs)) if self.filter.matches(attrs) => self.shard.extract(dn, attrs),
            _ => Ok(None),
        }
    }
}

/// What one event changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub saves: usize,
    pub deletes: usize,
    /// Shards left untouched because the event carried undecodable values.
    pub skipped: Vec<String>,
}

/// Apply `event` to the sub-caches of all `shards`.
pub fn apply_event(caches: &Caches, shards: &[ActiveShard], event: &ChangeEvent) -> CacheResult<UpdateSummary> {
    event.validate()?;
    let old = event.old_snapshot();
    let new = event.new_snapshot();
    let mut summary = UpdateSummary::default();

    for active in shards {
        let name = &active.shard.db_name;
        let entries = active
            .entry(old)
            .and_then(|old_entry| Ok((old_entry, active.entry(new)?)));
        let (old_entry, new_entry) = match entries {
            Ok(entries) => entries,
            Err(err @ EventError::InvalidAttributeValue { .. }) => {
                tracing::warn!(dn = %event.dn, shard = %name, error = %err, "Skipping shard");
                summary.skipped.push(name.clone());
                continue;
            }
            Err(err) => return Err(CacheError::from(err)),
        };
        if old_entry.is_none() && new_entry.is_none() {
            continue;
        }

        let mut writer = caches.get_sub_cache(name)?.writer()?;
        if let Some(entry) = &old_entry {
            writer.delete(&entry.key, &entry.values)?;
            summary.deletes += 1;
        }
        if let Some(entry) = &new_entry {
            writer.save(&entry.key, &entry.values)?;
            summary.saves += 1;
        }
        writer.commit()?;
        tracing::debug!(
            dn = %event.dn,
            command = %event.command,
            shard = %name,
            deleted = old_entry.is_some(),
            saved = new_entry.is_some(),
            "Updated shard"
        );
    }
    Ok(summary)
}
