use std::path::Path;
use std::str::FromStr;

use switchyard_server::config::Config;
use switchyard_server::error::ErrorKind;
use switchyard_server::proto::rr::{DNSClass, Name};
use switchyard_server::{ServerBuilder, ServerContext};
use test_support::{ServerDir, subscribe};

fn name(name: &str) -> Name {
    Name::from_str(name).unwrap()
}

async fn start(path: &Path) -> ServerContext {
    let server = ServerBuilder::new().config_path(path.to_path_buf()).build().unwrap();
    server
        .load_configuration(Config::read_config(path).unwrap(), true)
        .await
        .unwrap();
    server.wait_for_zones_loaded().await;
    server
}

const ZONES: &str = r#"
[[zones]]
name = "example.com"
type = "primary"
file = "example.com.zone"

[[zones]]
name = "dyn.example"
type = "primary"
file = "dyn.example.zone"
allow-update = ["127.0.0.1"]
"#;

fn server_dir() -> (ServerDir, std::path::PathBuf) {
    let dir = ServerDir::new();
    dir.write_zone("example.com.zone", "example.com");
    dir.write_zone("dyn.example.zone", "dyn.example");
    let path = dir.write_config("", ZONES);
    (dir, path)
}

#[tokio::test]
async fn test_status() {
    subscribe();
    let (_dir, path) = server_dir();
    let server = start(&path).await;

    let status = server.execute("status").await.unwrap();
    assert!(status.starts_with("version: switchyard "), "{status}");
    assert!(status.contains("number of views: 2 (1 IN)"), "{status}");
    assert!(status.contains("zone manager pool size: 2"), "{status}");
    assert!(status.ends_with("server is up and running"), "{status}");
}

#[tokio::test]
async fn test_reload_commands() {
    subscribe();
    let (_dir, path) = server_dir();
    let server = start(&path).await;

    assert_eq!(server.execute("reload").await.unwrap(), "server reload successful");
    assert_eq!(server.execute("reload example.com").await.unwrap(), "zone reload queued");
    server.wait_for_background().await;

    let err = server.execute("reload example.org").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ZoneNotFound(_)), "{err}");

    let err = server.execute("refresh example.com").await.unwrap_err();
    assert!(err.to_string().contains("not a secondary zone"), "{err}");

    let err = server.execute("frobnicate").await.unwrap_err();
    assert!(err.to_string().contains("frobnicate"), "{err}");
}

#[tokio::test]
async fn test_freeze_thaw() {
    subscribe();
    let (_dir, path) = server_dir();
    let server = start(&path).await;

    let err = server.execute("freeze example.com").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::NotDynamicZone { .. }), "{err}");

    server.execute("freeze dyn.example").await.unwrap();
    let (_, zone) = server.zone_from_args(&name("dyn.example."), DNSClass::IN, None).unwrap();
    assert!(zone.is_frozen());
    assert_eq!(
        server.execute("freeze dyn.example").await.unwrap(),
        "The zone was already frozen."
    );
    assert_eq!(server.execute("reload dyn.example").await.unwrap(), "zone is frozen; thaw it first");

    assert_eq!(
        server.execute("thaw dyn.example").await.unwrap(),
        "The zone reload and thaw was successful."
    );
    assert!(!zone.is_frozen());
    assert!(zone.is_loaded());
}

#[tokio::test]
async fn test_flush_commands() {
    subscribe();
    let (_dir, path) = server_dir();
    let server = start(&path).await;
    let view = server.find_view("_default", DNSClass::IN).unwrap();
    let cache = view.cache().unwrap();
    let generation = cache.generation();

    server.execute("flush _default").await.unwrap();
    assert!(cache.generation() > generation);

    server.execute("flushname www.example.com _default").await.unwrap();
    server.execute("flushtree example.com").await.unwrap();
    assert_eq!(
        cache.flushed_names(),
        [(name("www.example.com."), false), (name("example.com."), true)]
    );

    let err = server.execute("flush nope").await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ViewNotFound(_)), "{err}");
}

#[tokio::test]
async fn test_nta_survives_restart() {
    subscribe();
    let (dir, path) = server_dir();
    let server = start(&path).await;

    assert_eq!(server.execute("nta -dump").await.unwrap(), "no negative trust anchors");
    let reply = server.execute("nta -lifetime 1h bad.example _default").await.unwrap();
    assert!(reply.starts_with("Negative trust anchor added: bad.example./_default"), "{reply}");

    let dump = server.execute("nta -dump _default").await.unwrap();
    assert!(dump.contains("bad.example./_default: expiry"), "{dump}");

    server.shutdown().await.unwrap();
    assert!(dir.exists("_default.nta"));
    drop(server);

    let server = start(&path).await;
    let view = server.find_view("_default", DNSClass::IN).unwrap();
    assert!(view.ntas().unwrap().covers(&name("www.bad.example.")));

    let reply = server.execute("nta -remove bad.example _default").await.unwrap();
    assert_eq!(reply, "Negative trust anchor for bad.example. removed in view _default");
    assert!(!view.ntas().unwrap().covers(&name("bad.example.")));
}
