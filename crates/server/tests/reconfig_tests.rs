use std::str::FromStr;
use std::sync::Arc;

use switchyard_server::cache::MAX_ADB_SIZE_FOR_CACHESHARE;
use switchyard_server::config::Config;
use switchyard_server::error::ErrorKind;
use switchyard_server::proto::rr::{DNSClass, Name};
use switchyard_server::{ServerBuilder, ServerContext};
use test_support::{ServerDir, subscribe};

fn name(name: &str) -> Name {
    Name::from_str(name).unwrap()
}

async fn start(dir: &ServerDir, options: &str, config: &str) -> ServerContext {
    let path = dir.write_config(options, config);
    let server = ServerBuilder::new().config_path(path.clone()).build().unwrap();
    let config = Config::read_config(&path).unwrap();
    server.load_configuration(config, true).await.unwrap();
    server.wait_for_zones_loaded().await;
    server
}

const TWO_VIEWS: &str = r#"
[[views]]
name = "internal"
[views.options]
match-clients = ["10.0.0.0/8"]

[[views.zones]]
name = "example.com"
type = "primary"
file = "example.com.zone"

[[views.zones]]
name = "example.net"
type = "primary"
file = "example.net.zone"

[[views]]
name = "external"

[[views.zones]]
name = "example.org"
type = "primary"
file = "example.org.zone"
"#;

fn write_zones(dir: &ServerDir) {
    dir.write_zone("example.com.zone", "example.com");
    dir.write_zone("example.net.zone", "example.net");
    dir.write_zone("example.org.zone", "example.org");
}

#[tokio::test]
async fn test_reconfig_reuses_everything() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, "", TWO_VIEWS).await;

    let before = server.views();
    let internal = server.find_view("internal", DNSClass::IN).unwrap();
    let zone = internal.zone(&name("example.com.")).unwrap();
    assert!(zone.is_loaded());

    server.reconfig().await.unwrap();
    server.wait_for_zones_loaded().await;

    let after = server.views();
    assert!(!Arc::ptr_eq(&before, &after), "the view list is rebuilt");
    assert_eq!(before.len(), after.len());

    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.name(), new.name());
        assert!(!Arc::ptr_eq(old, new));

        let mut old_zones = old.zones();
        let mut new_zones = new.zones();
        old_zones.sort_by(|a, b| a.origin().cmp(b.origin()));
        new_zones.sort_by(|a, b| a.origin().cmp(b.origin()));
        assert_eq!(old_zones.len(), new_zones.len(), "view {}", old.name());
        for (a, b) in old_zones.iter().zip(&new_zones) {
            assert!(Arc::ptr_eq(a, b), "zone {} was not reused", a.origin());
        }

        match (old.cache(), new.cache()) {
            (Some(a), Some(b)) => assert!(Arc::ptr_eq(a, b), "cache of {} was not reused", old.name()),
            (None, None) => (),
            _ => panic!("cache presence changed for view {}", old.name()),
        }
        if let (Some(a), Some(b)) = (old.resolver(), new.resolver()) {
            assert!(Arc::ptr_eq(a.stats(), b.stats()));
        }
    }

    // reused zones keep their view and stay loaded
    let internal = server.find_view("internal", DNSClass::IN).unwrap();
    let reused = internal.zone(&name("example.com.")).unwrap();
    assert!(Arc::ptr_eq(&zone, &reused));
    assert_eq!(reused.view().as_ref(), Some(internal.id()));
    assert!(reused.is_loaded());
}

#[tokio::test]
async fn test_changed_zone_file_builds_new_zone() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, "", TWO_VIEWS).await;
    let old = server
        .find_view("external", DNSClass::IN)
        .unwrap()
        .zone(&name("example.org."))
        .unwrap();

    dir.write_zone("example.org.v2.zone", "example.org");
    dir.write_config("", &TWO_VIEWS.replace("example.org.zone", "example.org.v2.zone"));
    server.reconfig().await.unwrap();
    server.wait_for_zones_loaded().await;

    let external = server.find_view("external", DNSClass::IN).unwrap();
    let new = external.zone(&name("example.org.")).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(new.is_loaded());
    assert!(!server.zone_manager().is_managed(&old));
    assert!(server.zone_manager().is_managed(&new));
}

#[tokio::test]
async fn test_failed_reload_keeps_old_views() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, "", TWO_VIEWS).await;
    let before = server.views();
    let zone = before
        .find("internal", DNSClass::IN)
        .unwrap()
        .zone(&name("example.com."))
        .unwrap();

    // the external view declares example.org twice
    let broken = format!(
        "{TWO_VIEWS}\n[[views.zones]]\nname = \"example.org\"\ntype = \"primary\"\nfile = \"example.org.zone\"\n"
    );
    dir.write_config("", &broken);
    let err = server.reconfig().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::DuplicateZone(_)), "{err}");

    let after = server.views();
    assert!(Arc::ptr_eq(&before, &after));
    let internal = after.find("internal", DNSClass::IN).unwrap();
    assert_eq!(zone.view().as_ref(), Some(internal.id()), "zone rebinding was reverted");
    assert!(server.zone_manager().is_managed(&zone));
}

fn duplicate_zone(config: &str) -> String {
    format!("{config}\n[[views.zones]]\nname = \"example.org\"\ntype = \"primary\"\nfile = \"example.org.zone\"\n")
}

#[tokio::test]
async fn test_failed_reload_keeps_session_key() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, r#"session-keyfile = "session.key""#, TWO_VIEWS).await;
    let key = server.session_key().unwrap();
    assert_eq!(key.name(), &name("local-ddns."));
    let written = std::fs::read_to_string(dir.join("session.key")).unwrap();

    let options = "session-keyfile = \"session.key\"\nsession-keyname = \"other-key\"";
    dir.write_config(options, &duplicate_zone(TWO_VIEWS));
    server.reconfig().await.unwrap_err();

    assert!(Arc::ptr_eq(&key, &server.session_key().unwrap()));
    assert_eq!(std::fs::read_to_string(dir.join("session.key")).unwrap(), written);

    dir.write_config(options, TWO_VIEWS);
    server.reconfig().await.unwrap();
    let replaced = server.session_key().unwrap();
    assert_eq!(replaced.name(), &name("other-key."));
    assert_ne!(std::fs::read_to_string(dir.join("session.key")).unwrap(), written);
}

#[tokio::test]
async fn test_reload_carries_ntas_and_saves_after_swap() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, "", TWO_VIEWS).await;
    let internal = server.find_view("internal", DNSClass::IN).unwrap();
    internal.ntas().unwrap().add(&name("bad.example."), None, false);

    dir.write_config("", &duplicate_zone(TWO_VIEWS));
    server.reconfig().await.unwrap_err();
    assert!(!dir.exists("internal.nta"), "nothing is written by a failed reload");

    dir.write_config("", TWO_VIEWS);
    server.reconfig().await.unwrap();
    let internal = server.find_view("internal", DNSClass::IN).unwrap();
    assert!(internal.ntas().unwrap().covers(&name("www.bad.example.")));
    assert!(dir.exists("internal.nta"));
    assert!(!dir.exists("external.nta"));
}

#[tokio::test]
async fn test_shared_cache_caps_adb() {
    subscribe();
    let dir = ServerDir::new();
    let config = r#"
[[views]]
name = "first"
[views.options]
max-cache-size = "1G"

[[views]]
name = "second"
[views.options]
attach-cache = "first"
max-cache-size = "1G"

[[views]]
name = "third"
[views.options]
max-cache-size = "1G"
"#;
    let server = start(&dir, "", config).await;
    let first = server.find_view("first", DNSClass::IN).unwrap();
    let second = server.find_view("second", DNSClass::IN).unwrap();
    let third = server.find_view("third", DNSClass::IN).unwrap();

    assert!(Arc::ptr_eq(first.cache().unwrap(), second.cache().unwrap()));
    assert!(second.cache_shared());
    assert!(!first.cache_shared());
    assert!(!Arc::ptr_eq(first.cache().unwrap(), third.cache().unwrap()));

    let first_adb = first.resolver().unwrap().adb().max_size();
    let second_adb = second.resolver().unwrap().adb().max_size();
    assert_eq!(second_adb, MAX_ADB_SIZE_FOR_CACHESHARE);
    assert_eq!(first_adb, MAX_ADB_SIZE_FOR_CACHESHARE);
    assert_eq!(third.resolver().unwrap().adb().max_size(), 1024 * 1024 * 1024 / 8);
}

#[tokio::test]
async fn test_cache_conflict_rolls_back() {
    subscribe();
    let dir = ServerDir::new();
    let config = r#"
[[views]]
name = "first"
[views.options]
max-cache-size = "64M"

[[views]]
name = "second"
[views.options]
max-cache-size = "64M"
"#;
    let server = start(&dir, "", config).await;
    let before = server.views();
    let caches = server.caches();

    dir.write_config(
        "",
        &config.replacen(
            "name = \"second\"\n[views.options]\n",
            "name = \"second\"\n[views.options]\nattach-cache = \"first\"\nmax-cache-ttl = 60\n",
            1,
        ),
    );
    let err = server.reconfig().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::CacheConflict(..)), "{err}");

    assert!(Arc::ptr_eq(&before, &server.views()));
    assert!(Arc::ptr_eq(&caches, &server.caches()));
}

#[tokio::test]
async fn test_changed_cache_params_replace_cache() {
    subscribe();
    let dir = ServerDir::new();
    let server = start(&dir, "max-cache-ttl = 3600", "").await;
    let old = Arc::clone(server.find_view("_default", DNSClass::IN).unwrap().cache().unwrap());

    dir.write_config("max-cache-size = \"32M\"\nmax-cache-ttl = 3600", "");
    server.reconfig().await.unwrap();
    let view = server.find_view("_default", DNSClass::IN).unwrap();
    assert!(Arc::ptr_eq(&old, view.cache().unwrap()), "size changes keep the cache");
    assert_eq!(view.cache().unwrap().max_size(), 32 * 1024 * 1024);

    dir.write_config("max-cache-size = \"32M\"\nmax-cache-ttl = 60", "");
    server.reconfig().await.unwrap();
    let view = server.find_view("_default", DNSClass::IN).unwrap();
    assert!(!Arc::ptr_eq(&old, view.cache().unwrap()), "ttl changes replace the cache");
}

const RPZ_CONFIG: &str = r#"
[[views]]
name = "filtered"
[views.options.response-policy]
zones = [{ zone = "rpz.example", max-policy-ttl = 300 }, { zone = "rpz2.example" }]

[[views.zones]]
name = "rpz.example"
type = "primary"
file = "rpz.example.zone"

[[views.zones]]
name = "rpz2.example"
type = "primary"
file = "rpz2.example.zone"
"#;

#[tokio::test]
async fn test_rpz_table_reuse() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("rpz.example.zone", "rpz.example");
    dir.write_zone("rpz2.example.zone", "rpz2.example");
    let server = start(&dir, "", RPZ_CONFIG).await;

    let view = server.find_view("filtered", DNSClass::IN).unwrap();
    let table = Arc::clone(view.rpz().unwrap());
    let zone = view.zone(&name("rpz.example.")).unwrap();
    assert_eq!(zone.rpz_num(), Some(0));
    assert_eq!(table.zones().len(), 2);

    // unchanged: table and policy zones are carried forward
    server.reconfig().await.unwrap();
    let view = server.find_view("filtered", DNSClass::IN).unwrap();
    assert!(Arc::ptr_eq(&table, view.rpz().unwrap()));
    assert!(Arc::ptr_eq(&zone, &view.zone(&name("rpz.example.")).unwrap()));

    // one changed field of one entry rebuilds the table and its zones
    dir.write_config("", &RPZ_CONFIG.replace("max-policy-ttl = 300", "max-policy-ttl = 600"));
    server.reconfig().await.unwrap();
    server.wait_for_zones_loaded().await;
    let view = server.find_view("filtered", DNSClass::IN).unwrap();
    let rebuilt = view.rpz().unwrap();
    assert!(!Arc::ptr_eq(&table, rebuilt));
    assert_eq!(rebuilt.version(), table.version() + 1);
    let new_zone = view.zone(&name("rpz.example.")).unwrap();
    assert!(!Arc::ptr_eq(&zone, &new_zone));
    assert!(new_zone.is_loaded());
}

#[tokio::test]
async fn test_rpz_zone_must_be_declared() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("rpz.example.zone", "rpz.example");
    let config = r#"
[[views]]
name = "filtered"
[views.options.response-policy]
zones = [{ zone = "rpz.example" }, { zone = "missing.example" }]

[[views.zones]]
name = "rpz.example"
type = "primary"
file = "rpz.example.zone"
"#;
    let path = dir.write_config("", config);
    let server = ServerBuilder::new().config_path(path.clone()).build().unwrap();
    let err = server
        .load_configuration(Config::read_config(&path).unwrap(), true)
        .await
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::RpzZoneMissing { .. }), "{err}");
    assert!(server.views().is_empty());
}

#[tokio::test]
async fn test_zone_pool_sizing() {
    subscribe();
    let dir = ServerDir::new();
    write_zones(&dir);
    let server = start(&dir, "", TWO_VIEWS).await;
    assert_eq!(server.zone_manager().size(), 3);

    // the implicit default view counts its top-level zones
    let dir = ServerDir::new();
    dir.write_zone("example.com.zone", "example.com");
    let config = "[[zones]]\nname = \"example.com\"\ntype = \"primary\"\nfile = \"example.com.zone\"\n";
    let server = start(&dir, "allow-new-zones = true", config).await;
    assert_eq!(server.zone_manager().size(), 1);

    // persisted zones count once the view allows new zones
    dir.write_zone("dyn.example.zone", "dyn.example");
    server
        .execute(r#"addzone dyn.example { type = "primary", file = "dyn.example.zone" }"#)
        .await
        .unwrap();
    server.reconfig().await.unwrap();
    assert_eq!(server.zone_manager().size(), 2);
}

#[tokio::test]
async fn test_builtin_chaos_view() {
    subscribe();
    let dir = ServerDir::new();
    let server = start(&dir, "version = \"hidden\"", "").await;

    let views = server.views();
    let names: Vec<_> = views.iter().map(|v| v.name().to_string()).collect();
    assert_eq!(names, ["_default", "_bind"]);

    let chaos = views.iter().find(|v| v.name() == "_bind").unwrap();
    let version = chaos.zone(&name("version.bind.")).unwrap();
    assert!(version.is_builtin());
    assert!(version.is_loaded());
    assert!(!chaos.recursion());
}
