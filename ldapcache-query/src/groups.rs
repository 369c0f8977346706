//! Groups a user belongs to.

use std::collections::{BTreeSet, HashMap, HashSet};

use ldapcache_core::{dn, CacheResult, UNIQUE_MEMBERS};
use ldapcache_storage::Caches;

/// Sorted DNs of all groups containing `user_dn`.
///
/// Walks the `uniqueMembers` table loaded into memory: every group listing
/// the user is a result, and with `consider_nested_groups` every group
/// listing a result is one too. Without nesting only direct memberships
/// are returned.
pub fn groups_for_user(caches: &Caches, user_dn: &str, consider_nested_groups: bool) -> CacheResult<Vec<String>> {
    let table = caches.get_sub_cache(UNIQUE_MEMBERS)?.load()?;
    let membership: HashMap<String, HashSet<String>> = table
        .into_iter()
        .map(|(group, members)| {
            let members: HashSet<String> =
                members.into_values().iter().map(|m| dn::normalize(m)).collect();
            (dn::normalize(&group), members)
        })
        .collect();

    let mut found = BTreeSet::new();
    let mut worklist = vec![dn::normalize(user_dn)];
    while let Some(member) = worklist.pop() {
        for (group, members) in &membership {
            if members.contains(&member) && found.insert(group.clone()) && consider_nested_groups {
                worklist.push(group.clone());
            }
        }
    }
    Ok(found.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ldapcache_test_utils::fixtures::{group_dn, user_dn};
    use ldapcache_test_utils::TestCache;

    #[test]
    fn test_direct_only() {
        for test in TestCache::all() {
            let alice = user_dn("alice");
            let (inner, outer) = (group_dn("inner"), group_dn("outer"));
            test.put_group(&inner, &[alice.as_str()], &["alice"]);
            test.put_group(&outer, &[inner.as_str()], &[]);

            let caches = test.cache().caches();
            assert_eq!(
                groups_for_user(caches, &alice, false).expect("query"),
                vec![inner.clone()]
            );
            assert_eq!(
                groups_for_user(caches, &alice, true).expect("query"),
                vec![inner, outer]
            );
        }
    }

    #[test]
    fn test_cycle_terminates() {
        let test = TestCache::new(ldapcache_test_utils::BackendKind::Dbm);
        let alice = user_dn("alice");
        let (a, b) = (group_dn("a"), group_dn("b"));
        test.put_group(&a, &[alice.as_str(), b.as_str()], &["alice"]);
        test.put_group(&b, &[a.as_str()], &[]);
        assert_eq!(
            groups_for_user(test.cache().caches(), &alice, true).expect("query"),
            vec![a, b]
        );
    }
}
