use statsd_bridge::{BridgeOptions, Labels, StatsdBridge};
use std::net::UdpSocket;
use std::time::{Duration, Instant};

// ============================================================================
// Helper functions to reduce test code duplication
// ============================================================================

fn start_bridge(summary_flush_interval: Duration) -> StatsdBridge {
    let options = BridgeOptions {
        statsd_address: "127.0.0.1:0".parse().unwrap(),
        summary_flush_interval,
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

/// Polls `condition` until it holds or five seconds pass.
fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect()
}

// ============================================================================
// End-to-end behaviour
// ============================================================================

#[test]
fn test_counter_without_rules_uses_sanitized_bucket() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();

    send(&bridge, "foo.bar:5|c");

    assert!(wait_until(|| registry.counter_value("foo_bar", &Labels::new()) == Some(5.0)));
}

#[test]
fn test_sample_rate_and_unmatched_names() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();

    send(&bridge, "foo:1|c|@0.1\nweird$name:2|c");

    assert!(wait_until(|| registry.counter_value("foo", &Labels::new()) == Some(10.0)));
    assert!(wait_until(|| registry.counter_value("weird_name", &Labels::new()) == Some(2.0)));
}

#[test]
fn test_relative_gauges_apply_in_order() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();
    let stats = bridge.stats();

    send(&bridge, "foo:5|g\nfoo:+3|g\nfoo:-2|g");

    assert!(wait_until(|| stats.events() == 3));
    assert_eq!(registry.gauge_value("foo", &Labels::new()), Some(6.0));
}

#[test]
fn test_malformed_lines_are_isolated() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();
    let stats = bridge.stats();

    send(&bridge, "good:1|c\nbad:abc|c\nalso.bad:1|zz\nrate:1|c|@0\nlast:2|c");
    send(&bridge, "\u{0}\u{1}garbage");
    send(&bridge, "after:1|c");

    assert!(wait_until(|| registry.counter_value("after", &Labels::new()) == Some(1.0)));
    assert_eq!(registry.counter_value("good", &Labels::new()), Some(1.0));
    assert_eq!(registry.counter_value("last", &Labels::new()), Some(2.0));
    assert_eq!(stats.invalid_lines(), 4);
}

#[test]
fn test_negative_counter_rejected() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();
    let stats = bridge.stats();

    send(&bridge, "hits:4|c\nhits:-1|c\nhits:1|c");

    assert!(wait_until(|| stats.events() == 2));
    assert_eq!(registry.counter_value("hits", &Labels::new()), Some(5.0));
    assert_eq!(stats.negative_counters(), 1);
}

#[test]
fn test_tags_become_labels() {
    let bridge = start_bridge(Duration::from_secs(60));
    let registry = bridge.registry();

    send(&bridge, "requests:1|c|#env:prod,region:eu");

    let expected = labels(&[("env", "prod"), ("region", "eu")]);
    assert!(wait_until(|| registry.counter_value("requests", &expected) == Some(1.0)));
}

#[test]
fn test_render_exposition() {
    let bridge = start_bridge(Duration::from_secs(60));
    let stats = bridge.stats();

    send(&bridge, "svc.latency:20|ms\nsvc.up:1|g\nsvc.calls:3|c\nsvc.users:x|s");

    assert!(wait_until(|| stats.events() == 3 && stats.ignored_sets() == 1));
    let text = bridge.render();
    assert!(text.contains("# TYPE svc_calls counter\nsvc_calls 3\n"), "{text}");
    assert!(text.contains("# TYPE svc_up gauge\nsvc_up 1\n"), "{text}");
    assert!(text.contains("# TYPE svc_latency summary\n"), "{text}");
    assert!(text.contains("svc_latency{quantile=\"0.99\"} 20\n"), "{text}");
    assert!(text.contains("svc_latency_count 1\n"), "{text}");
    assert!(text.contains("statsd_bridge_udp_packets_total 1\n"), "{text}");
    assert!(!text.contains("svc_users"), "{text}");
}

#[test]
fn test_flush_separates_windows() {
    let bridge = start_bridge(Duration::from_millis(500));
    let registry = bridge.registry();
    let stats = bridge.stats();

    let slow: String = (0..50).map(|_| "lat:900|ms\n").collect();
    send(&bridge, &slow);
    assert!(wait_until(|| stats.events() == 50));

    // Right after a reset there is most of an interval left to fill and read the new window.
    let flushes = stats.summary_flushes();
    assert!(wait_until(|| stats.summary_flushes() > flushes));
    let fast: String = (0..10).map(|_| "lat:2|ms\n").collect();
    send(&bridge, &fast);

    assert!(wait_until(|| stats.events() == 60));
    let snapshot = registry
        .summary_snapshot("lat", &Labels::new())
        .expect("summary should exist");
    assert_eq!(snapshot.window_count, 10);
    assert_eq!(snapshot.count, 60);
    for (quantile, value) in snapshot.quantiles {
        assert!((value - 2.0).abs() < 0.01, "q{quantile} = {value}");
    }
}

#[test]
fn test_shutdown_joins_threads() {
    let bridge = start_bridge(Duration::from_secs(60));
    let stats = bridge.stats();
    send(&bridge, "x:1|c");
    assert!(wait_until(|| stats.events() == 1));

    let started = Instant::now();
    bridge.shutdown();
    assert!(started.elapsed() < Duration::from_secs(2));
}
