//! Full path from shard configuration through change events to lookups.

use ldapcache_core::{Attributes, BackendKind, CacheConfig, ChangeEvent, Shard, ENTRY_UUID, MEMBER_UIDS, UNIQUE_MEMBERS};
use ldapcache_storage::{get_cache, CacheValue, ShardConfigStore};
use tempfile::TempDir;

const USER_DN: &str = "uid=U1,cn=users,dc=example,dc=org";

fn config(dir: &TempDir, backend: BackendKind) -> CacheConfig {
    CacheConfig::in_directory(dir.path(), backend)
}

fn testcache_shard() -> Shard {
    Shard::new("testcache", "dn", "sn", "(univentionObjectType=users/user)", true, false)
}

fn user(sn: &str) -> Attributes {
    Attributes::new()
        .with("univentionObjectType", ["users/user"])
        .with("uid", ["u1"])
        .with("sn", [sn])
}

#[test]
fn test_configured_shard_follows_add_and_modify() {
    for backend in [BackendKind::Dbm, BackendKind::Lmdb] {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = config(&dir, backend);
        ShardConfigStore::new(&config.shard_config)
            .add_shard_to_config(&testcache_shard())
            .expect("add shard should succeed");

        let cache = get_cache(&config).expect("get_cache should succeed");
        cache
            .handle(&ChangeEvent::add(USER_DN, user("Smith")))
            .expect("add event should apply");
        let key = USER_DN.to_lowercase();
        assert_eq!(
            cache.get_sub_cache("testcache").expect("registered").get(&key).expect("get"),
            CacheValue::Single(Some("Smith".to_string()))
        );

        cache
            .handle(&ChangeEvent::modify(USER_DN, user("Smith"), user("Jones")))
            .expect("modify event should apply");
        assert_eq!(
            cache.get_sub_cache("testcache").expect("registered").get(&key).expect("get"),
            CacheValue::Single(Some("Jones".to_string()))
        );

        cache
            .handle(&ChangeEvent::delete(USER_DN, user("Jones")))
            .expect("delete event should apply");
        assert_eq!(
            cache.get_sub_cache("testcache").expect("registered").get(&key).expect("get"),
            CacheValue::Single(None)
        );
    }
}

#[test]
fn test_state_survives_reopen() {
    for backend in [BackendKind::Dbm, BackendKind::Lmdb] {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let config = config(&dir, backend);
        {
            let cache = get_cache(&config).expect("get_cache should succeed");
            let group = Attributes::new()
                .with("objectClass", ["posixGroup"])
                .with("memberUid", ["u1"]);
            cache
                .handle(&ChangeEvent::add("cn=Staff,dc=example,dc=org", group))
                .expect("event should apply");
        }
        let cache = get_cache(&config).expect("reopen should succeed");
        assert_eq!(
            cache
                .get_sub_cache(MEMBER_UIDS)
                .expect("built-in")
                .get("cn=staff,dc=example,dc=org")
                .expect("get"),
            CacheValue::Multi(vec!["u1".to_string()])
        );
    }
}

#[test]
fn test_builtin_shards_per_backend() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let dbm = get_cache(&config(&dir, BackendKind::Dbm)).expect("dbm");
    let names: Vec<&str> = dbm.caches().names().collect();
    assert_eq!(names, vec![MEMBER_UIDS, UNIQUE_MEMBERS]);

    let dir = TempDir::new().expect("TempDir creation should succeed");
    let lmdb = get_cache(&config(&dir, BackendKind::Lmdb)).expect("lmdb");
    let names: Vec<&str> = lmdb.caches().names().collect();
    assert_eq!(names, vec![ENTRY_UUID, MEMBER_UIDS, UNIQUE_MEMBERS]);
}

#[test]
fn test_duplicate_and_conflicting_configured_shards() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let config = config(&dir, BackendKind::Dbm);
    let store = ShardConfigStore::new(&config.shard_config);
    store.add_shard_to_config(&Shard::member_uids()).expect("add");
    store
        .add_shard_to_config(&Shard::new(MEMBER_UIDS, "dn", "memberUid", "(objectClass=*)", true, false))
        .expect("add");

    let cache = get_cache(&config).expect("conflicts are skipped, not fatal");
    assert_eq!(cache.shards().count(), 2);
}

#[test]
fn test_lmdb_uuid_keyed_shard_loads_by_dn() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let config = config(&dir, BackendKind::Lmdb);
    ShardConfigStore::new(&config.shard_config)
        .add_shard_to_config(&Shard::new(
            "membersByUuid",
            "entryUUID",
            "memberUid",
            "(objectClass=posixGroup)",
            false,
            false,
        ))
        .expect("add");
    let cache = get_cache(&config).expect("get_cache should succeed");

    let group = Attributes::new()
        .with("objectClass", ["posixGroup"])
        .with("entryUUID", ["0f9c6a2e-1d4b-4c7a-9b3e-5a7d2c1e8f00"])
        .with("memberUid", ["u1", "u2"]);
    cache
        .handle(&ChangeEvent::add("cn=Staff,dc=example,dc=org", group))
        .expect("event should apply");

    let loaded = cache
        .get_sub_cache("membersByUuid")
        .expect("registered")
        .load()
        .expect("load");
    assert_eq!(
        loaded.get("cn=staff,dc=example,dc=org"),
        Some(&CacheValue::Multi(vec!["u1".to_string(), "u2".to_string()]))
    );
}
