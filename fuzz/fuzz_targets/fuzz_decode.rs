#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_bridge::{Aggregator, BridgeStats, MapperHandle, Registry};
use std::sync::Arc;

// Arbitrary datagrams must never panic the decoder, the aggregator or the renderer.
fuzz_target!(|data: &[u8]| {
    let registry = Arc::new(Registry::default());
    let stats = Arc::new(BridgeStats::default());
    let aggregator = Aggregator::new(
        MapperHandle::default(),
        Arc::clone(&registry),
        Arc::clone(&stats),
    );

    for event in statsd_bridge::Event::parse_all(data).flatten() {
        let _ = aggregator.apply(event);
    }
    let _ = registry.flush_summaries();
    let _ = statsd_bridge::render_text(&registry, &stats);
});
