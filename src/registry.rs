use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;

use crate::error::SinkDeliveryError;
use crate::record::{Level, LogRecord};
use crate::sink::LogSink;

struct Entry {
    sink: Arc<dyn LogSink>,
    min_level: Option<Level>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Delivery counters for one registered sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkStats {
    pub name: String,
    pub delivered: u64,
    pub failed: u64,
}

/// Ordered set of sinks every record is delivered to.
///
/// Sinks are appended while the registry is still owned by the caller;
/// once it is handed to a pipeline it sits behind an `Arc` and can no longer
/// change.
#[derive(Default)]
pub struct SinkRegistry {
    entries: Vec<Entry>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sink that receives every record.
    pub fn register(&mut self, sink: Arc<dyn LogSink>) -> &mut Self {
        self.push(sink, None)
    }

    /// Append a sink that only receives records at `min_level` or above.
    pub fn register_with_level(&mut self, sink: Arc<dyn LogSink>, min_level: Level) -> &mut Self {
        self.push(sink, Some(min_level))
    }

    fn push(&mut self, sink: Arc<dyn LogSink>, min_level: Option<Level>) -> &mut Self {
        self.entries.push(Entry {
            sink,
            min_level,
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Hand `record` to every sink in registration order.
    ///
    /// A sink that errors or panics is reported on stderr and counted; the
    /// remaining sinks still run. Returns the failures for this record.
    pub async fn deliver(&self, record: &LogRecord) -> Vec<SinkDeliveryError> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            if entry.min_level.is_some_and(|min| record.level < min) {
                continue;
            }

            let outcome = AssertUnwindSafe(entry.sink.send(record)).catch_unwind().await;
            let message = match outcome {
                Ok(Ok(())) => {
                    entry.delivered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => format!("sink panicked: {}", panic_message(&*panic)),
            };

            entry.failed.fetch_add(1, Ordering::Relaxed);
            let error = SinkDeliveryError {
                sink: entry.sink.name().to_string(),
                message,
            };
            eprintln!("microlog: {}", error);
            failures.push(error);
        }
        failures
    }

    /// Flush every sink, reporting failures the same way as [`deliver`](Self::deliver).
    pub async fn flush(&self) -> Vec<SinkDeliveryError> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            let message = match AssertUnwindSafe(entry.sink.flush()).catch_unwind().await {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => format!("flush failed: {}", e),
                Err(panic) => format!("flush panicked: {}", panic_message(&*panic)),
            };
            let error = SinkDeliveryError {
                sink: entry.sink.name().to_string(),
                message,
            };
            eprintln!("microlog: {}", error);
            failures.push(error);
        }
        failures
    }

    pub fn stats(&self) -> Vec<SinkStats> {
        self.entries
            .iter()
            .map(|entry| SinkStats {
                name: entry.sink.name().to_string(),
                delivered: entry.delivered.load(Ordering::Relaxed),
                failed: entry.failed.load(Ordering::Relaxed),
            })
            .collect()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "<non-string panic>"
    }
}
