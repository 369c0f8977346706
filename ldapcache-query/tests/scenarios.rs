//! Event-driven scenarios: directory changes flow through the update engine
//! and show up in query results.

use ldapcache_core::dn;
use ldapcache_query::{groups_for_user, users_groups, users_in_group};
use ldapcache_test_utils::fixtures::{self, group_dn, user_dn};
use ldapcache_test_utils::{generators, BackendKind, CacheValue, ChangeEvent, TestCache};
use proptest::prelude::*;

#[test]
fn test_membership_follows_group_modifications() {
    for test in TestCache::all() {
        let backend = test.backend();
        let staff = group_dn("staff");
        let (alice, bob) = (user_dn("alice"), user_dn("bob"));
        test.add_group(&staff, &[alice.as_str()], &["alice"]);

        test.cache()
            .handle(&ChangeEvent::modify(
                &staff,
                fixtures::group(&[alice.as_str()], &["alice"]),
                fixtures::group(&[bob.as_str()], &["bob"]),
            ))
            .expect("modify should apply");

        let caches = test.cache().caches();
        assert_eq!(users_in_group(caches, &staff, true).expect("query"), vec![bob.clone()], "{backend:?}");
        assert!(groups_for_user(caches, &alice, true).expect("query").is_empty(), "{backend:?}");

        test.cache()
            .handle(&ChangeEvent::delete(&staff, fixtures::group(&[bob.as_str()], &["bob"])))
            .expect("delete should apply");
        assert!(users_groups(test.cache().caches()).expect("query").is_empty(), "{backend:?}");
    }
}

#[test]
fn test_renamed_group_keeps_its_members() {
    for test in TestCache::all() {
        let alice = user_dn("alice");
        let attrs = fixtures::group(&[alice.as_str()], &["alice"]);
        let (old, new) = (group_dn("old"), group_dn("new"));
        test.add_group(&old, &[alice.as_str()], &["alice"]);
        test.cache()
            .handle(&ChangeEvent::rename(&old, &new, attrs.clone(), attrs))
            .expect("rename should apply");
        assert_eq!(
            groups_for_user(test.cache().caches(), &alice, true).expect("query"),
            vec![new]
        );
    }
}

#[test]
fn test_user_shards_and_reverse_index() {
    for backend in [BackendKind::Dbm, BackendKind::Lmdb] {
        let test = TestCache::with_shards(backend, &[fixtures::surname_shard(), fixtures::member_of_shard()]);
        let alice = user_dn("alice");
        test.cache()
            .handle(&ChangeEvent::add(&alice, fixtures::user("alice", "Smith")))
            .expect("user add should apply");
        let (a, b) = (group_dn("a"), group_dn("b"));
        test.add_group(&a, &[alice.as_str()], &["alice"]);
        test.add_group(&b, &[alice.as_str()], &["alice"]);

        assert_eq!(
            test.sub_cache("testcache").get(&alice).expect("get"),
            CacheValue::Single(Some("Smith".to_string()))
        );
        assert_eq!(
            test.sub_cache("memberOf").get(&alice).expect("get"),
            CacheValue::Multi(vec![a.clone(), b.clone()])
        );
        assert_eq!(
            groups_for_user(test.cache().caches(), &alice, true).expect("query"),
            vec![a, b]
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_lookups_ignore_dn_case(
        user in generators::arb_user_dn(),
        group in generators::arb_group_dn(),
        extra_uid in generators::arb_uid(),
    ) {
        let test = TestCache::new(BackendKind::Dbm);
        let uid = dn::username(&user);
        test.put_group(&group, &[user.as_str()], &[uid.as_str(), extra_uid.as_str()]);
        let caches = test.cache().caches();

        let expected = vec![dn::normalize(&group)];
        prop_assert_eq!(groups_for_user(caches, &user.to_uppercase(), true).expect("query"), expected.clone());
        prop_assert_eq!(groups_for_user(caches, &user.to_lowercase(), true).expect("query"), expected);
        prop_assert_eq!(
            users_in_group(caches, &group.to_uppercase(), true).expect("query"),
            vec![dn::normalize(&user)]
        );
    }
}
