use statsd_bridge::{BridgeOptions, Labels, ReloadOutcome, StatsdBridge};
use std::fs;
use std::net::UdpSocket;
use std::path::Path;
use std::time::{Duration, Instant};

const INITIAL: &str = r#"
app.*.hits
name="app_hits"
route="$1"
"#;

const UPDATED: &str = r#"
app.*.hits
name="app_requests"
path="$1"
"#;

// ============================================================================
// Helper functions
// ============================================================================

fn start_bridge(mapping: &Path) -> StatsdBridge {
    let options = BridgeOptions {
        statsd_address: "127.0.0.1:0".parse().unwrap(),
        mapping_config: Some(mapping.to_owned()),
        summary_flush_interval: Duration::from_secs(60),
        ..BridgeOptions::default()
    };
    StatsdBridge::start(options).expect("bridge should start")
}

fn send(bridge: &StatsdBridge, payload: &str) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("couldn't bind to address");
    socket
        .send_to(payload.as_bytes(), bridge.local_addr())
        .expect("send should succeed");
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

/// Replaces `path` the way editors that save atomically do.
fn replace_file(path: &Path, contents: &str) {
    let staging = path.with_extension("tmp");
    fs::write(&staging, contents).unwrap();
    fs::rename(&staging, path).unwrap();
}

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ============================================================================
// Reload behaviour
// ============================================================================

#[test]
fn test_initial_mapping_applies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.conf");
    fs::write(&path, INITIAL).unwrap();
    let bridge = start_bridge(&path);
    let registry = bridge.registry();

    send(&bridge, "app.login.hits:1|c");

    let expected = labels(&[("route", "login")]);
    assert!(wait_until(|| registry.counter_value("app_hits", &expected) == Some(1.0)));
}

#[test]
fn test_invalid_initial_mapping_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.conf");
    fs::write(&path, "app.*\nroute=\"$1\"\n").unwrap();

    let options = BridgeOptions {
        statsd_address: "127.0.0.1:0".parse().unwrap(),
        mapping_config: Some(path),
        ..BridgeOptions::default()
    };
    assert!(StatsdBridge::start(options).is_err());
}

#[test]
fn test_missing_mapping_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let options = BridgeOptions {
        statsd_address: "127.0.0.1:0".parse().unwrap(),
        mapping_config: Some(dir.path().join("absent.conf")),
        ..BridgeOptions::default()
    };
    assert!(StatsdBridge::start(options).is_err());
}

#[test]
fn test_replaced_file_is_reloaded_repeatedly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.conf");
    fs::write(&path, INITIAL).unwrap();
    let bridge = start_bridge(&path);
    let mapper = bridge.mapper();
    let registry = bridge.registry();

    replace_file(&path, UPDATED);
    assert!(wait_until(|| mapper.resolve("app.login.hits").name == "app_requests"));

    send(&bridge, "app.login.hits:2|c");
    let expected = labels(&[("path", "login")]);
    assert!(wait_until(|| registry.counter_value("app_requests", &expected) == Some(2.0)));

    // A second replacement only lands if the watch was re-registered after the first.
    replace_file(&path, INITIAL);
    assert!(wait_until(|| mapper.resolve("app.login.hits").name == "app_hits"));
}

#[test]
fn test_in_place_write_is_reloaded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.conf");
    fs::write(&path, INITIAL).unwrap();
    let bridge = start_bridge(&path);
    let mapper = bridge.mapper();
    let stats = bridge.stats();

    fs::write(&path, UPDATED).unwrap();

    assert!(wait_until(|| mapper.resolve("app.x.hits").name == "app_requests"));
    assert!(stats.reloads(ReloadOutcome::Success) >= 1);
}

#[test]
fn test_invalid_update_keeps_previous_mapping() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mapping.conf");
    fs::write(&path, INITIAL).unwrap();
    let bridge = start_bridge(&path);
    let mapper = bridge.mapper();
    let stats = bridge.stats();

    replace_file(&path, "app.*.hits\nname=\"broken\"\nbad line\n");
    assert!(wait_until(|| stats.reloads(ReloadOutcome::Failure) >= 1));

    let id = mapper.resolve("app.login.hits");
    assert_eq!(id.name, "app_hits");
    assert_eq!(id.labels, labels(&[("route", "login")]));

    // Still watching after a failed reload.
    replace_file(&path, UPDATED);
    assert!(wait_until(|| mapper.resolve("app.login.hits").name == "app_requests"));
}
