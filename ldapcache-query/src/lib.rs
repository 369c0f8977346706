//! ldapcache Query Layer
//!
//! Transitive group membership answered from the `uniqueMembers` and
//! `memberUids` sub-caches alone, without contacting the directory server.
//!
//! All comparisons run on lower-cased DNs and uids. Unknown users and
//! groups resolve to empty results.

mod groups;
mod users;

pub use groups::groups_for_user;
pub use users::{users_groups, users_in_group, users_in_group_with, GroupCache};

use ldapcache_core::{dn, CacheResult, MEMBER_UIDS, UNIQUE_MEMBERS};
use ldapcache_storage::{CacheReader, Caches};

/// One open reader per sub-cache, shared by a whole recursive resolution.
pub struct Readers<'a> {
    unique_members: Box<dyn CacheReader + 'a>,
    member_uids: Box<dyn CacheReader + 'a>,
}

impl<'a> Readers<'a> {
    pub fn open(caches: &'a Caches) -> CacheResult<Self> {
        Ok(Self {
            unique_members: caches.get_sub_cache(UNIQUE_MEMBERS)?.reader()?,
            member_uids: caches.get_sub_cache(MEMBER_UIDS)?.reader()?,
        })
    }

    /// Lower-cased member DNs of `group`.
    fn members(&self, group: &str) -> CacheResult<Vec<String>> {
        Ok(lowered(self.unique_members.get(group)?.into_values()))
    }

    /// Lower-cased POSIX member uids of `group`.
    fn uids(&self, group: &str) -> CacheResult<Vec<String>> {
        Ok(lowered(self.member_uids.get(group)?.into_values()))
    }

    fn groups(&self) -> CacheResult<Vec<String>> {
        self.unique_members.keys()
    }
}

fn lowered(values: Vec<String>) -> Vec<String> {
    values.iter().map(|v| dn::normalize(v)).collect()
}
