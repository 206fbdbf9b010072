use std::cell::Cell;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::queue::RecordQueue;
use crate::registry::SinkRegistry;

thread_local! {
    static DELIVERY_THREAD: Cell<bool> = const { Cell::new(false) };
}

/// Whether the current thread is delivering records. Events raised here
/// (by a sink or the HTTP stack under it) must not be fed back into the
/// pipeline.
pub fn on_delivery_thread() -> bool {
    DELIVERY_THREAD.try_with(Cell::get).unwrap_or(false)
}

pub(crate) fn mark_delivery_thread() {
    DELIVERY_THREAD.with(|flag| flag.set(true));
}

/// Marks the current thread as delivering until dropped.
pub(crate) struct DeliveryScope {
    previous: bool,
}

impl DeliveryScope {
    pub(crate) fn enter() -> Self {
        let previous = DELIVERY_THREAD.with(|flag| flag.replace(true));
        Self { previous }
    }
}

impl Drop for DeliveryScope {
    fn drop(&mut self) {
        let previous = self.previous;
        let _ = DELIVERY_THREAD.try_with(|flag| flag.set(previous));
    }
}

/// Totals collected by the worker over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Records taken off the queue and offered to every sink.
    pub delivered: u64,
    /// Individual sink failures, including flush failures at shutdown.
    pub sink_failures: u64,
}

/// Single background consumer of the record queue.
///
/// Runs on its own OS thread with a single-threaded tokio runtime so async
/// sinks have a reactor, independent of whatever runtime the application
/// uses. The thread exits only once the queue is closed *and* drained.
pub struct DeliveryWorker {
    handle: JoinHandle<WorkerReport>,
}

impl DeliveryWorker {
    pub fn spawn(queue: Arc<RecordQueue>, registry: Arc<SinkRegistry>) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        let handle = thread::Builder::new()
            .name("microlog-delivery".to_string())
            .spawn(move || {
                mark_delivery_thread();
                runtime.block_on(run(queue, registry))
            })?;

        Ok(Self { handle })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker to finish. The queue must already be closed or
    /// this blocks forever.
    pub fn join(self) -> WorkerReport {
        match self.handle.join() {
            Ok(report) => report,
            Err(_) => {
                eprintln!("microlog: delivery worker panicked");
                WorkerReport::default()
            }
        }
    }
}

async fn run(queue: Arc<RecordQueue>, registry: Arc<SinkRegistry>) -> WorkerReport {
    let mut report = WorkerReport::default();

    while let Some(record) = queue.recv().await {
        let failures = registry.deliver(&record).await;
        report.delivered += 1;
        report.sink_failures += failures.len() as u64;
    }

    report.sink_failures += registry.flush().await.len() as u64;
    report
}
