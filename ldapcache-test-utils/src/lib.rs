//! ldapcache Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - A throwaway on-disk cache per test ([`TestCache`])
//! - Attribute snapshot fixtures for groups, users and hosts
//! - Proptest generators for DNs, uids and shards
//! - Assertions on cache results

pub use ldapcache_core::{
    Attributes, BackendKind, CacheConfig, CacheError, CacheResult, CatalogError, ChangeEvent,
    Shard, MEMBER_UIDS, UNIQUE_MEMBERS,
};
pub use ldapcache_storage::{get_cache, CacheValue, MembershipCache, ShardConfigStore, SubCache};

use tempfile::TempDir;

// ============================================================================
// TEST CACHE
// ============================================================================

/// A membership cache rooted in a temporary directory that is removed on
/// drop. Ownership changes are disabled.
pub struct TestCache {
    cache: MembershipCache,
    config: CacheConfig,
    _dir: TempDir,
}

impl TestCache {
    pub fn new(backend: BackendKind) -> Self {
        Self::with_shards(backend, &[])
    }

    /// Cache whose shard configuration lists `shards` before it is opened.
    pub fn with_shards(backend: BackendKind, shards: &[Shard]) -> Self {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = CacheConfig::in_directory(dir.path(), backend);
        let store = ShardConfigStore::new(&config.shard_config);
        for shard in shards {
            store.add_shard_to_config(shard).expect("add shard should succeed");
        }
        let cache = get_cache(&config).expect("get_cache should succeed");
        Self {
            cache,
            config,
            _dir: dir,
        }
    }

    /// Both backends, for tests that must hold on either engine.
    pub fn all() -> Vec<TestCache> {
        vec![Self::new(BackendKind::Dbm), Self::new(BackendKind::Lmdb)]
    }

    pub fn cache(&self) -> &MembershipCache {
        &self.cache
    }

    pub fn backend(&self) -> BackendKind {
        self.config.backend
    }

    /// Feed an add event for a POSIX group.
    pub fn add_group(&self, dn: &str, members: &[&str], uids: &[&str]) -> &Self {
        self.cache
            .handle(&ChangeEvent::add(dn, fixtures::group(members, uids)))
            .expect("group add should apply");
        self
    }

    /// Write `uniqueMembers` and `memberUids` rows directly, bypassing the
    /// update engine.
    pub fn put_group(&self, dn: &str, members: &[&str], uids: &[&str]) -> &Self {
        let to_strings = |values: &[&str]| values.iter().map(|v| v.to_string()).collect::<Vec<_>>();
        let key = dn.to_lowercase();
        self.sub_cache(UNIQUE_MEMBERS)
            .save(&key, &to_strings(members))
            .expect("uniqueMembers save should succeed");
        self.sub_cache(MEMBER_UIDS)
            .save(&key, &to_strings(uids))
            .expect("memberUids save should succeed");
        self
    }

    pub fn sub_cache(&self, name: &str) -> &dyn SubCache {
        self.cache.get_sub_cache(name).expect("sub-cache should be registered")
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;

    pub const BASE: &str = "dc=example,dc=org";

    pub fn user_dn(uid: &str) -> String {
        format!("uid={uid},cn=users,{BASE}")
    }

    pub fn group_dn(cn: &str) -> String {
        format!("cn={cn},cn=groups,{BASE}")
    }

    pub fn host_dn(cn: &str) -> String {
        format!("cn={cn},cn=computers,{BASE}")
    }

    /// POSIX group snapshot with `uniqueMember` and `memberUid` values.
    pub fn group(members: &[&str], uids: &[&str]) -> Attributes {
        let mut attrs = Attributes::new().with("objectClass", ["top", "posixGroup", "univentionGroup"]);
        if !members.is_empty() {
            attrs.insert("uniqueMember", members.iter().copied());
        }
        if !uids.is_empty() {
            attrs.insert("memberUid", uids.iter().copied());
        }
        attrs
    }

    /// POSIX account snapshot.
    pub fn user(uid: &str, sn: &str) -> Attributes {
        Attributes::new()
            .with("objectClass", ["top", "person", "posixAccount"])
            .with("univentionObjectType", ["users/user"])
            .with("uid", [uid])
            .with("sn", [sn])
    }

    /// Administrator shard from the end-to-end scenario.
    pub fn surname_shard() -> Shard {
        Shard::new("testcache", "dn", "sn", "(univentionObjectType=users/user)", true, false)
    }

    /// Reverse shard: member DN -> groups listing it.
    pub fn member_of_shard() -> Shard {
        Shard::new("memberOf", "dn", "uniqueMember", "(objectClass=posixGroup)", false, true)
    }
}

// ============================================================================
// GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// POSIX-style account name.
    pub fn arb_uid() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9._-]{0,11}"
    }

    /// User DN with a random-case RDN.
    pub fn arb_user_dn() -> impl Strategy<Value = String> {
        ("[a-zA-Z][a-zA-Z0-9]{0,9}", any::<bool>()).prop_map(|(uid, upper)| {
            let dn = fixtures::user_dn(&uid);
            if upper {
                dn.to_uppercase()
            } else {
                dn
            }
        })
    }

    pub fn arb_group_dn() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9 ]{0,9}".prop_map(|cn| fixtures::group_dn(cn.trim()))
    }

    /// Valid administrator shard.
    pub fn arb_shard() -> impl Strategy<Value = Shard> {
        (
            "[a-zA-Z][a-zA-Z0-9]{0,11}",
            prop_oneof![Just("dn"), Just("uid"), Just("entryUUID")],
            prop_oneof![Just("sn"), Just("mail"), Just("memberUid"), Just("dn")],
            prop_oneof![
                Just("(objectClass=posixGroup)"),
                Just("(univentionObjectType=users/user)"),
                Just("(&(objectClass=person)(!(uid=admin*)))"),
            ],
            any::<bool>(),
            any::<bool>(),
        )
            .prop_map(|(db_name, key, value, filter, single_value, reverse)| {
                Shard::new(db_name, key, value, filter, single_value, reverse)
            })
    }

    /// Acyclic nesting: group `i` may contain groups `j > i` only.
    pub fn arb_group_forest(max_groups: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
        (1..=max_groups).prop_flat_map(|n| {
            (0..n)
                .map(move |i| {
                    let later: Vec<usize> = (i + 1..n).collect();
                    let len = later.len();
                    proptest::sample::subsequence(later, 0..=len)
                })
                .collect::<Vec<_>>()
        })
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    pub fn assert_unknown_sub_cache<T: std::fmt::Debug>(result: &CacheResult<T>, name: &str) {
        match result {
            Err(CacheError::Catalog(CatalogError::UnknownSubCache { name: actual })) => {
                assert_eq!(actual, name)
            }
            other => panic!("Expected UnknownSubCache({name}), got {other:?}"),
        }
    }

    pub fn assert_sorted_unique(values: &[String]) {
        assert!(
            values.windows(2).all(|pair| pair[0] < pair[1]),
            "Expected sorted unique values, got {values:?}"
        );
    }

    pub fn assert_lowercase(values: &[String]) {
        for value in values {
            assert_eq!(value, &value.to_lowercase(), "Expected lower-cased value");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
