use std::sync::Arc;
use std::time::Instant;
use tracing::error;

use microlog::init::init_logging_with_registry;
use microlog::noop_sink::NoopSink;
use microlog::registry::SinkRegistry;
use microlog::LogConfig;

fn main() {
    let mut registry = SinkRegistry::new();
    registry.register(Arc::new(NoopSink));
    let handle = init_logging_with_registry(&LogConfig::default(), registry)
        .expect("logging already configured");

    let n: u64 = 100_000;
    let start = Instant::now();

    for i in 0..n {
        error!(iteration = i, "default load test error");
    }

    let elapsed = start.elapsed();
    println!("unbounded queue: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    microlog::shutdown();
    println!("{:?}", handle.queue_stats());
}
