#![no_main]

use libfuzzer_sys::fuzz_target;
use statsd_bridge::MetricMapper;

// Any config text either compiles or reports a line; compiled rules resolve any bucket.
fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (config, bucket) = text.split_once('\0').unwrap_or((text, "a.b.c"));

    match MetricMapper::compile(config) {
        Ok(mapper) => {
            let id = mapper.resolve(bucket);
            assert!(!id.name.is_empty());
        }
        Err(err) => assert!(err.line >= 1),
    }
});
