//! Nested membership resolution against both engines.

use ldapcache_core::dn;
use ldapcache_query::{groups_for_user, users_groups, users_in_group};
use ldapcache_test_utils::assertions::{assert_lowercase, assert_sorted_unique};
use ldapcache_test_utils::fixtures::{group_dn, host_dn, user_dn};
use ldapcache_test_utils::{generators, BackendKind, TestCache};
use proptest::prelude::*;

#[test]
fn test_groups_for_user_ignores_case() {
    for test in TestCache::all() {
        let alice = user_dn("alice");
        let staff = group_dn("Staff");
        test.add_group(&staff, &[alice.as_str()], &["alice"]);

        let caches = test.cache().caches();
        let upper = groups_for_user(caches, "UID=Alice,CN=Users,DC=Example,DC=Org", true).expect("query");
        let lower = groups_for_user(caches, &alice, true).expect("query");
        assert_eq!(upper, lower);
        assert_eq!(lower, vec![staff.to_lowercase()]);
    }
}

#[test]
fn test_nested_closure_without_uids() {
    // uniqueMembers = {A: [B], B: [X]}, memberUids empty: X is never
    // recognized as a user, so A resolves to nothing.
    for test in TestCache::all() {
        let (a, b, x) = (group_dn("a"), group_dn("b"), user_dn("x"));
        test.put_group(&a, &[b.as_str()], &[]);
        test.put_group(&b, &[x.as_str()], &[]);

        let caches = test.cache().caches();
        assert!(users_in_group(caches, &a, true).expect("query").is_empty());
        assert_eq!(groups_for_user(caches, &x, true).expect("query"), vec![a, b]);
    }
}

#[test]
fn test_nested_closure_with_uids() {
    for test in TestCache::all() {
        let (a, b, x) = (group_dn("a"), group_dn("b"), user_dn("x"));
        test.add_group(&a, &[b.as_str()], &[]);
        test.add_group(&b, &[x.as_str()], &["x"]);

        let caches = test.cache().caches();
        assert_eq!(users_in_group(caches, &a, true).expect("query"), vec![x.clone()]);
        assert!(users_in_group(caches, &a, false).expect("query").is_empty());
        assert_eq!(users_in_group(caches, &b, false).expect("query"), vec![x.clone()]);
        assert_eq!(groups_for_user(caches, &x, true).expect("query"), vec![a, b]);
    }
}

#[test]
fn test_machine_accounts_are_excluded() {
    for test in TestCache::all() {
        let group = group_dn("hosts");
        test.put_group(&group, &["cn=host1,ou=x"], &["host1$"]);
        let host = host_dn("host2");
        test.put_group(&group_dn("more"), &[host.as_str()], &["host2$"]);

        let caches = test.cache().caches();
        assert!(users_in_group(caches, &group, true).expect("query").is_empty());
        assert!(users_in_group(caches, &group_dn("more"), true).expect("query").is_empty());
    }
}

#[test]
fn test_unknown_dns_resolve_empty() {
    for test in TestCache::all() {
        let caches = test.cache().caches();
        assert!(users_in_group(caches, "cn=nonexistent,dc=x", true).expect("query").is_empty());
        assert!(groups_for_user(caches, "uid=nobody,dc=x", true).expect("query").is_empty());
        assert!(users_groups(caches).expect("query").is_empty());
    }
}

#[test]
fn test_cycles_terminate() {
    for test in TestCache::all() {
        let (a, b, alice, bob) = (group_dn("a"), group_dn("b"), user_dn("alice"), user_dn("bob"));
        test.put_group(&a, &[b.as_str(), alice.as_str()], &["alice"]);
        test.put_group(&b, &[a.as_str(), bob.as_str()], &["bob"]);

        let caches = test.cache().caches();
        assert_eq!(
            users_in_group(caches, &a, true).expect("query"),
            vec![alice.clone(), bob.clone()]
        );
        assert_eq!(users_in_group(caches, &b, true).expect("query"), vec![alice, bob]);
    }
}

#[test]
fn test_self_membership_terminates() {
    let test = TestCache::new(BackendKind::Dbm);
    let (a, alice) = (group_dn("a"), user_dn("alice"));
    test.put_group(&a, &[a.as_str(), alice.as_str()], &["alice"]);
    assert_eq!(
        users_in_group(test.cache().caches(), &a, true).expect("query"),
        vec![alice]
    );
}

#[test]
fn test_users_groups_inverts_with_nesting() {
    for test in TestCache::all() {
        let (top, left, right) = (group_dn("top"), group_dn("left"), group_dn("right"));
        let (alice, bob) = (user_dn("Alice"), user_dn("bob"));
        // Diamond: top contains left and right, both contain alice.
        test.add_group(&top, &[left.as_str(), right.as_str()], &[]);
        test.add_group(&left, &[alice.as_str()], &["alice"]);
        test.add_group(&right, &[alice.as_str(), bob.as_str()], &["alice", "bob"]);

        let map = users_groups(test.cache().caches()).expect("query");
        assert_eq!(map.keys().cloned().collect::<Vec<_>>(), vec!["alice", "bob"]);
        assert_eq!(map["alice"], vec![left.clone(), right.clone(), top.clone()]);
        assert_eq!(map["bob"], vec![right, top]);
        for groups in map.values() {
            assert_sorted_unique(groups);
            assert_lowercase(groups);
        }
    }
}

fn forest_fixture(test: &TestCache, forest: &[Vec<usize>]) -> (Vec<String>, String) {
    let user = user_dn("leaf");
    let groups: Vec<String> = (0..forest.len()).map(|i| group_dn(&format!("g{i}"))).collect();
    for (i, children) in forest.iter().enumerate() {
        let mut members: Vec<&str> = children.iter().map(|&j| groups[j].as_str()).collect();
        let mut uids = Vec::new();
        if i + 1 == forest.len() {
            members.push(user.as_str());
            uids.push("leaf");
        }
        test.put_group(&groups[i], &members, &uids);
    }
    (groups, user)
}

/// Groups from which the last group is reachable through the forest.
fn ancestors_of_last(forest: &[Vec<usize>]) -> Vec<usize> {
    let last = forest.len() - 1;
    let mut reaches = vec![false; forest.len()];
    reaches[last] = true;
    for i in (0..forest.len()).rev() {
        if forest[i].iter().any(|&j| reaches[j]) {
            reaches[i] = true;
        }
    }
    (0..forest.len()).filter(|&i| reaches[i]).collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_queries_agree_on_acyclic_nesting(forest in generators::arb_group_forest(6)) {
        let test = TestCache::new(BackendKind::Dbm);
        let (groups, user) = forest_fixture(&test, &forest);
        let caches = test.cache().caches();

        let mut expected: Vec<String> = ancestors_of_last(&forest)
            .into_iter()
            .map(|i| groups[i].clone())
            .collect();
        expected.sort();
        prop_assert_eq!(groups_for_user(caches, &user, true).expect("query"), expected.clone());

        for group in &expected {
            prop_assert_eq!(users_in_group(caches, group, true).expect("query"), vec![user.clone()]);
        }
        let map = users_groups(caches).expect("query");
        prop_assert_eq!(map.get(&dn::username(&user)).cloned().unwrap_or_default(), expected);
    }
}
