use std::sync::Arc;

use async_trait::async_trait;
use microlog::{
    init::init_logging_with_registry,
    record::{Level, LogRecord},
    registry::SinkRegistry,
    sink::LogSink,
    LogConfig,
};
use tracing::{error, info};

/// Example of integrating a completely custom backend by implementing
/// the `LogSink` trait directly. Imagine this talks to some
/// proprietary store for which this crate does not provide a built-in
/// sink.
struct MyCustomDbSink;

#[async_trait]
impl LogSink for MyCustomDbSink {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        // Call your own client library here.
        println!("[my-custom-db] {} {} {:?}", record.level, record.message, record.attributes);
        Ok(())
    }

    fn name(&self) -> &str {
        "my-custom-db"
    }
}

fn main() {
    let mut registry = SinkRegistry::new();
    registry.register_with_level(Arc::new(MyCustomDbSink), Level::Warn);

    let handle = init_logging_with_registry(&LogConfig::default(), registry)
        .expect("logging already configured");

    info!("below the sink threshold, never reaches the custom backend");
    error!(db = "my-custom-db", "simulated error sent via custom backend");

    let logger = handle.logger(Some("billing")).with_field("tenant", "acme");
    let _ = logger.error("invoice export failed", Default::default());

    microlog::shutdown();
}
