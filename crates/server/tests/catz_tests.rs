use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use switchyard_server::catz::CatzEntry;
use switchyard_server::config::Config;
use switchyard_server::proto::rr::{DNSClass, Name};
use switchyard_server::zone::{FileZoneLoader, LoadError, Zone, ZoneDb, ZoneLoader, ZoneOptions};
use switchyard_server::{ServerBuilder, ServerContext};
use test_support::{ServerDir, subscribe};

fn name(name: &str) -> Name {
    Name::from_str(name).unwrap()
}

async fn start(path: &Path) -> ServerContext {
    start_with(path, ServerBuilder::new()).await
}

async fn start_with(path: &Path, builder: ServerBuilder) -> ServerContext {
    let server = builder.config_path(path.to_path_buf()).build().unwrap();
    server
        .load_configuration(Config::read_config(path).unwrap(), true)
        .await
        .unwrap();
    server.wait_for_zones_loaded().await;
    server
}

const CATALOG: &str = r#"
[[views]]
name = "consumer"
[views.options.catalog-zones]
zones = [{ zone = "catalog.example", default-primaries = ["192.0.2.53"], in-memory = true }]

[[views.zones]]
name = "catalog.example"
type = "primary"
file = "catalog.example.zone"
"#;

#[tokio::test]
async fn test_catalog_members_follow_updates() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("catalog.example.zone", "catalog.example");
    let path = dir.write_config("", CATALOG);
    let server = start(&path).await;

    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    let catalog = name("catalog.example.");
    assert!(view.zone(&catalog).unwrap().is_catz());

    let members = vec![CatzEntry::new(name("a.example.")), CatzEntry::new(name("b.example."))];
    assert_eq!(server.update_catalog(&view, &catalog, members).unwrap(), 2);
    server.wait_for_background().await;

    for member in ["a.example.", "b.example."] {
        let zone = view.zone(&name(member)).unwrap();
        assert!(zone.is_added());
        assert_eq!(zone.parent_catz(), Some(catalog.clone()));
        assert!(zone.kind().is_secondary());
    }

    // dropping b from the catalog deletes the member zone
    let members = vec![CatzEntry::new(name("a.example."))];
    assert_eq!(server.update_catalog(&view, &catalog, members).unwrap(), 1);
    server.wait_for_background().await;
    assert!(view.zone(&name("b.example.")).is_none());
    let a = view.zone(&name("a.example.")).unwrap();

    // members survive a reconfiguration without being persisted
    server.reconfig().await.unwrap();
    server.wait_for_zones_loaded().await;
    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    let carried = view.zone(&name("a.example.")).unwrap();
    assert_eq!(carried.parent_catz(), Some(catalog.clone()));
    assert!(carried.is_added());
    assert!(Arc::ptr_eq(&a, &carried));
}

#[tokio::test]
async fn test_catalog_cannot_touch_static_zones() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("catalog.example.zone", "catalog.example");
    dir.write_zone("static.example.zone", "static.example");
    let config = format!(
        "{CATALOG}\n[[views.zones]]\nname = \"static.example\"\ntype = \"primary\"\nfile = \"static.example.zone\"\n"
    );
    let path = dir.write_config("", &config);
    let server = start(&path).await;
    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    let original = view.zone(&name("static.example.")).unwrap();

    let members = vec![CatzEntry::new(name("static.example."))];
    server.update_catalog(&view, &name("catalog.example."), members).unwrap();
    server.wait_for_background().await;

    let zone = view.zone(&name("static.example.")).unwrap();
    assert!(Arc::ptr_eq(&original, &zone));
    assert!(!zone.is_added());
    assert_eq!(zone.parent_catz(), None);

    // stale events for a replaced view are ignored
    server.reconfig().await.unwrap();
    let members = vec![CatzEntry::new(name("late.example."))];
    server.update_catalog(&view, &name("catalog.example."), members).unwrap();
    server.wait_for_background().await;
    let current = server.find_view("consumer", DNSClass::IN).unwrap();
    assert!(current.zone(&name("late.example.")).is_none());
}

#[tokio::test]
async fn test_catalog_refuses_to_change_or_delete_static_zones() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("catalog.example.zone", "catalog.example");
    dir.write_zone("static.example.zone", "static.example");
    let config = format!(
        "{CATALOG}\n[[views.zones]]\nname = \"static.example\"\ntype = \"primary\"\nfile = \"static.example.zone\"\n"
    );
    let path = dir.write_config("", &config);
    let server = start(&path).await;
    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    let catalog = name("catalog.example.");
    let original = view.zone(&name("static.example.")).unwrap();

    let listed = CatzEntry::new(name("static.example."));
    server.update_catalog(&view, &catalog, vec![listed.clone()]).unwrap();
    server.wait_for_background().await;

    // changed settings for the listed name
    let mut changed = listed;
    changed.primaries = vec!["192.0.2.99:53".parse().unwrap()];
    server.update_catalog(&view, &catalog, vec![changed]).unwrap();
    server.wait_for_background().await;

    // dropped from the catalog
    server.update_catalog(&view, &catalog, Vec::new()).unwrap();
    server.wait_for_background().await;

    let zone = view.zone(&name("static.example.")).unwrap();
    assert!(Arc::ptr_eq(&original, &zone));
    assert!(zone.is_loaded());
    assert!(!zone.is_added());
    assert!(server.zone_manager().is_managed(&zone));
}

struct FailingLoader {
    fail: AtomicBool,
    zone: Name,
}

#[async_trait]
impl ZoneLoader for FailingLoader {
    async fn load(&self, zone: &Zone, options: &ZoneOptions) -> Result<ZoneDb, LoadError> {
        if self.fail.load(Ordering::SeqCst) && zone.origin() == &self.zone {
            return Err(LoadError::Parse("unreadable".to_string()));
        }
        FileZoneLoader.load(zone, options).await
    }
}

#[tokio::test]
async fn test_failed_member_change_takes_member_out() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("catalog.example.zone", "catalog.example");
    let path = dir.write_config("", CATALOG);
    let loader = Arc::new(FailingLoader {
        fail: AtomicBool::new(false),
        zone: name("a.example."),
    });
    let server = start_with(&path, ServerBuilder::new().zone_loader(loader.clone())).await;
    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    let catalog = name("catalog.example.");

    let entry = CatzEntry::new(name("a.example."));
    server.update_catalog(&view, &catalog, vec![entry.clone()]).unwrap();
    server.wait_for_background().await;
    let member = view.zone(&name("a.example.")).unwrap();
    assert!(member.is_added());

    loader.fail.store(true, Ordering::SeqCst);
    let mut changed = entry;
    changed.primaries = vec!["192.0.2.99:53".parse().unwrap()];
    assert_eq!(server.update_catalog(&view, &catalog, vec![changed]).unwrap(), 1);
    server.wait_for_background().await;

    assert!(view.zone(&name("a.example.")).is_none());
    assert!(!server.zone_manager().is_managed(&member));
    assert!(view.zone(&catalog).unwrap().is_loaded(), "the catalog itself is untouched");
}

#[tokio::test]
async fn test_catalog_change_queued_behind_reload() {
    subscribe();
    let dir = ServerDir::new();
    dir.write_zone("catalog.example.zone", "catalog.example");
    let path = dir.write_config("", CATALOG);
    let server = start(&path).await;
    let old_view = server.find_view("consumer", DNSClass::IN).unwrap();
    let catalog = name("catalog.example.");

    let guard = server.tasks().begin_exclusive().await;
    let reloader = server.clone();
    let reload = tokio::spawn(async move { reloader.reconfig().await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let members = vec![CatzEntry::new(name("queued.example."))];
    assert_eq!(server.update_catalog(&old_view, &catalog, members).unwrap(), 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(old_view.zone(&name("queued.example.")).is_none());

    drop(guard);
    reload.await.unwrap().unwrap();
    server.wait_for_background().await;
    server.wait_for_zones_loaded().await;

    let view = server.find_view("consumer", DNSClass::IN).unwrap();
    assert!(!Arc::ptr_eq(&old_view, &view));
    let member = view.zone(&name("queued.example.")).unwrap();
    assert!(member.is_added());
    assert_eq!(member.parent_catz(), Some(catalog.clone()));
    assert!(old_view.zone(&name("queued.example.")).is_none(), "the replaced view is never changed");
}
