use crossbeam::channel::bounded;
use statsd_bridge::{
    Aggregator, BridgeOptions, BridgeStats, Event, Labels, MapperHandle, Registry, StatsdBridge,
};
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
fn test_full_queue_blocks_producer_without_dropping() {
    let (tx, rx) = bounded::<Event>(2);
    let done = Arc::new(AtomicBool::new(false));

    let producer = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for line in [&b"depth:5|g"[..], b"depth:+3|g", b"depth:-2|g"] {
                tx.send(Event::parse(line).unwrap()).unwrap();
            }
            done.store(true, Ordering::SeqCst);
        })
    };

    assert!(wait_until(|| rx.len() == 2));
    thread::sleep(Duration::from_millis(100));
    assert!(!done.load(Ordering::SeqCst), "producer must block on a full queue");

    let registry = Arc::new(Registry::default());
    let stats = Arc::new(BridgeStats::default());
    let aggregator = Aggregator::new(
        MapperHandle::default(),
        Arc::clone(&registry),
        Arc::clone(&stats),
    );
    // returns once the producer finishes and drops its sender
    aggregator.run(&rx);
    producer.join().unwrap();

    assert!(done.load(Ordering::SeqCst));
    assert_eq!(stats.events(), 3);
    assert_eq!(registry.gauge_value("depth", &Labels::new()), Some(6.0));
}

#[test]
fn test_tiny_queue_applies_every_line() {
    let options = BridgeOptions {
        statsd_address: "127.0.0.1:0".parse().unwrap(),
        queue_capacity: 1,
        summary_flush_interval: Duration::from_secs(60),
        ..BridgeOptions::default()
    };
    let bridge = StatsdBridge::start(options).expect("bridge should start");
    let registry = bridge.registry();
    let stats = bridge.stats();

    let batch: String = (0..200).map(|_| "burst:1|c\n").collect();
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.send_to(batch.as_bytes(), bridge.local_addr()).unwrap();

    assert!(wait_until(|| stats.events() == 200));
    assert_eq!(registry.counter_value("burst", &Labels::new()), Some(200.0));
}

#[test]
fn test_queued_events_applied_on_shutdown() {
    let (tx, rx) = bounded::<Event>(16);
    for _ in 0..10 {
        tx.send(Event::parse(b"drained:1|c").unwrap()).unwrap();
    }
    drop(tx);

    let registry = Arc::new(Registry::default());
    let stats = Arc::new(BridgeStats::default());
    Aggregator::new(MapperHandle::default(), Arc::clone(&registry), stats).run(&rx);

    assert_eq!(registry.counter_value("drained", &Labels::new()), Some(10.0));
}
