//! Users in a group, and the inverse map for all groups.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use ldapcache_core::{dn, CacheResult};
use ldapcache_storage::Caches;

use crate::Readers;

/// Resolved users per group, shared across the groups of one top-level
/// query. Direct and nested resolutions of a group are kept apart.
#[derive(Debug, Default, Clone)]
pub struct GroupCache {
    resolved: HashMap<(String, bool), BTreeSet<String>>,
}

impl GroupCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

struct Resolution {
    users: BTreeSet<String>,
    /// False when a cycle cut the walk short somewhere below this group.
    complete: bool,
}

/// Sorted DNs of all users in `group_dn`.
///
/// A member whose first RDN value is one of the group's `memberUids` is a
/// user. One whose RDN value followed by `$` is listed there is a computer
/// account and is dropped. Any other member is taken to be a nested group
/// and, with `consider_nested_groups`, resolved in turn.
pub fn users_in_group(caches: &Caches, group_dn: &str, consider_nested_groups: bool) -> CacheResult<Vec<String>> {
    let readers = Readers::open(caches)?;
    users_in_group_with(&readers, group_dn, consider_nested_groups, &mut GroupCache::new())
}

/// [`users_in_group`] on already open readers and a caller-owned memo.
pub fn users_in_group_with(
    readers: &Readers<'_>,
    group_dn: &str,
    consider_nested_groups: bool,
    memo: &mut GroupCache,
) -> CacheResult<Vec<String>> {
    let mut visiting = HashSet::new();
    let resolution = resolve(
        readers,
        &dn::normalize(group_dn),
        consider_nested_groups,
        memo,
        &mut visiting,
    )?;
    Ok(resolution.users.into_iter().collect())
}

fn resolve(
    readers: &Readers<'_>,
    group: &str,
    nested: bool,
    memo: &mut GroupCache,
    visiting: &mut HashSet<String>,
) -> CacheResult<Resolution> {
    let memo_key = (group.to_string(), nested);
    if let Some(users) = memo.resolved.get(&memo_key) {
        return Ok(Resolution {
            users: users.clone(),
            complete: true,
        });
    }

    let uids: HashSet<String> = readers.uids(group)?.into_iter().collect();
    let mut users = BTreeSet::new();
    let mut complete = true;
    visiting.insert(group.to_string());

    for member in readers.members(group)? {
        let rdn = dn::first_rdn_value(&member);
        if uids.contains(rdn) {
            users.insert(member);
        } else if uids.contains(&format!("{rdn}$")) {
            continue;
        } else if nested {
            if visiting.contains(&member) {
                tracing::warn!(group = %group, member = %member, "Group membership cycle, not descending");
                complete = false;
                continue;
            }
            let nested_group = resolve(readers, &member, nested, memo, visiting)?;
            complete &= nested_group.complete;
            users.extend(nested_group.users);
        }
    }

    visiting.remove(group);
    if complete {
        memo.resolved.insert(memo_key, users.clone());
    }
    Ok(Resolution { users, complete })
}

/// Short user name -> sorted DNs of every group the user is in, nested
/// memberships included.
pub fn users_groups(caches: &Caches) -> CacheResult<BTreeMap<String, Vec<String>>> {
    let readers = Readers::open(caches)?;
    let mut memo = GroupCache::new();
    let mut groups_of: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

    for group in readers.groups()? {
        for user in users_in_group_with(&readers, &group, true, &mut memo)? {
            groups_of
                .entry(dn::username(&user))
                .or_default()
                .insert(dn::normalize(&group));
        }
    }
    Ok(groups_of
        .into_iter()
        .map(|(user, groups)| (user, groups.into_iter().collect()))
        .collect())
}
