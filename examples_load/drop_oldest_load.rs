use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use microlog::init::init_logging_with_registry;
use microlog::registry::SinkRegistry;
use microlog::{LogConfig, LogRecord, LogSink};

/// Pretends every write takes a millisecond, so producers outrun it.
struct SlowSink;

#[async_trait]
impl LogSink for SlowSink {
    async fn send(&self, _record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(())
    }

    fn name(&self) -> &str {
        "slow"
    }
}

fn main() {
    let cfg = LogConfig {
        async_queue_size: 1_000,
        async_queue_drop_oldest: true,
        ..LogConfig::default()
    };
    let mut registry = SinkRegistry::new();
    registry.register(Arc::new(SlowSink));
    let handle = init_logging_with_registry(&cfg, registry).expect("logging already configured");

    let n: u64 = 50_000;
    let start = Instant::now();

    for i in 0..n {
        warn!(iteration = i, "drop-oldest load test");
    }

    let elapsed = start.elapsed();
    println!("drop-oldest queue: sent {} events in {:?} (~{:.0} ev/s)",
        n,
        elapsed,
        n as f64 / elapsed.as_secs_f64()
    );

    handle.shutdown();
    let stats = handle.queue_stats();
    println!("delivered {} dropped {} (high water {})", stats.dequeued, stats.dropped, stats.high_water);
}
