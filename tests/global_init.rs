//! Process-wide configuration. Kept to a single test: the global subscriber
//! can only be installed once per test binary.

use std::error::Error;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use microlog::init::{global, init_logging_with_registry, is_configured};
use microlog::pipeline::WorkerState;
use microlog::registry::SinkRegistry;
use microlog::{
    get_logger, init_logging, shutdown, ConfigurationError, Fields, LifecycleError, LogConfig,
    LogRecord, LogSink,
};

#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

#[async_trait]
impl LogSink for Collect {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.0.lock().unwrap().push(record.message.clone());
        Ok(())
    }
}

#[test]
fn configure_once_reject_reconfigure_and_shut_down_twice() {
    assert!(!is_configured());
    assert!(matches!(get_logger(None), Err(LifecycleError::NotStarted)));
    shutdown();

    let sink = Arc::new(Collect::default());
    let mut registry = SinkRegistry::new();
    registry.register(sink.clone());
    let cfg = LogConfig {
        service_name: "checkout".to_string(),
        ..LogConfig::default()
    };
    let handle = init_logging_with_registry(&cfg, registry).unwrap();
    assert_eq!(handle.state(), WorkerState::Running);

    tracing::info!("via tracing");

    let again = init_logging(LogConfig::default());
    assert!(matches!(again, Err(ConfigurationError::AlreadyConfigured)));

    let logger = get_logger(None).unwrap();
    assert_eq!(logger.name(), "checkout");
    logger.info("still running", Fields::new()).unwrap();

    shutdown();
    shutdown();
    assert_eq!(handle.state(), WorkerState::Stopped);
    assert_eq!(
        *sink.0.lock().unwrap(),
        vec!["via tracing".to_string(), "still running".to_string()]
    );

    assert_eq!(logger.info("too late", Fields::new()), Err(LifecycleError::Stopped));
    tracing::info!("also too late");
    assert_eq!(handle.queue_stats().rejected, 2);

    assert!(is_configured());
    assert!(global().is_some());
    assert!(matches!(
        init_logging(LogConfig::default()),
        Err(ConfigurationError::AlreadyConfigured)
    ));
}
