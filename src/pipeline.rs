//! Lifecycle of the delivery pipeline.
//!
//! ```text
//! NotStarted --start--> Running --close--> Draining --worker joined--> Stopped
//! ```
//!
//! `start` succeeds once; every later call fails with
//! [`ConfigurationError::AlreadyConfigured`] and leaves the running pipeline
//! alone. `close` is idempotent. Submitting before `start` fails with
//! [`LifecycleError::NotStarted`], after `close` with
//! [`LifecycleError::Stopped`].

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Runtime;

use crate::error::{ConfigurationError, LifecycleError};
use crate::queue::{QueueMode, QueueStats, RecordQueue};
use crate::record::LogRecord;
use crate::registry::{SinkRegistry, SinkStats};
use crate::worker::{
    mark_delivery_thread, on_delivery_thread, DeliveryScope, DeliveryWorker, WorkerReport,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// How records travel from producers to sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Through a [`RecordQueue`] drained by a background [`DeliveryWorker`].
    Queued(QueueMode),
    /// On the emitting thread, one record at a time.
    Inline,
}

impl DeliveryMode {
    /// Resolve the `async_mode` / `async_queue_size` /
    /// `async_queue_drop_oldest` settings.
    pub fn from_settings(async_mode: bool, queue_size: usize, drop_oldest: bool) -> Self {
        if async_mode {
            DeliveryMode::Queued(QueueMode::from_settings(queue_size, drop_oldest))
        } else {
            DeliveryMode::Inline
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the queue, the worker and the sink registry.
pub struct Pipeline {
    mode: DeliveryMode,
    state: Mutex<WorkerState>,
    // Held for the whole of `close` so concurrent callers serialize.
    closing: Mutex<()>,
    registry: Arc<SinkRegistry>,
    queue: Arc<RecordQueue>,
    worker: Mutex<Option<DeliveryWorker>>,
    // Inline mode: gives async sinks a reactor and serializes delivery.
    inline: Mutex<Option<Runtime>>,
    report: Mutex<WorkerReport>,
}

impl Pipeline {
    pub fn new(registry: SinkRegistry, mode: DeliveryMode) -> Self {
        let queue_mode = match mode {
            DeliveryMode::Queued(queue_mode) => queue_mode,
            DeliveryMode::Inline => QueueMode::Unbounded,
        };
        Self {
            mode,
            state: Mutex::new(WorkerState::NotStarted),
            closing: Mutex::new(()),
            registry: Arc::new(registry),
            queue: Arc::new(RecordQueue::new(queue_mode)),
            worker: Mutex::new(None),
            inline: Mutex::new(None),
            report: Mutex::new(WorkerReport::default()),
        }
    }

    pub fn mode(&self) -> DeliveryMode {
        self.mode
    }

    pub fn state(&self) -> WorkerState {
        *lock(&self.state)
    }

    /// Move from `NotStarted` to `Running`, spawning the worker.
    pub fn start(&self) -> Result<(), ConfigurationError> {
        let mut state = lock(&self.state);
        if *state != WorkerState::NotStarted {
            return Err(ConfigurationError::AlreadyConfigured);
        }

        match self.mode {
            DeliveryMode::Queued(_) => {
                let worker = DeliveryWorker::spawn(Arc::clone(&self.queue), Arc::clone(&self.registry))
                    .map_err(ConfigurationError::WorkerSpawn)?;
                *lock(&self.worker) = Some(worker);
            }
            DeliveryMode::Inline => {
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("microlog-inline")
                    .on_thread_start(mark_delivery_thread)
                    .enable_all()
                    .build()
                    .map_err(ConfigurationError::WorkerSpawn)?;
                *lock(&self.inline) = Some(runtime);
            }
        }

        *state = WorkerState::Running;
        Ok(())
    }

    /// Hand a record to the pipeline.
    ///
    /// In queued mode this applies the queue's overflow policy and may park
    /// the caller under [`OverflowPolicy::Block`](crate::queue::OverflowPolicy::Block).
    /// Sink failures never surface here.
    ///
    /// Records submitted from inside a sink (the delivery thread, or an
    /// inline delivery in progress) are discarded and counted as rejected.
    pub fn submit(&self, record: LogRecord) -> Result<(), LifecycleError> {
        if on_delivery_thread() {
            self.queue.note_rejected();
            return Ok(());
        }

        let refused = match self.state() {
            WorkerState::NotStarted => Some(LifecycleError::NotStarted),
            WorkerState::Draining | WorkerState::Stopped => Some(LifecycleError::Stopped),
            WorkerState::Running => None,
        };
        if let Some(err) = refused {
            self.queue.note_rejected();
            return Err(err);
        }

        match self.mode {
            DeliveryMode::Queued(_) => self
                .queue
                .enqueue(record)
                .map_err(|_| LifecycleError::Stopped),
            DeliveryMode::Inline => {
                let inline = lock(&self.inline);
                let Some(runtime) = inline.as_ref() else {
                    self.queue.note_rejected();
                    return Err(LifecycleError::Stopped);
                };
                let _enter = runtime.enter();
                let _delivering = DeliveryScope::enter();
                let failures = futures::executor::block_on(self.registry.deliver(&record));
                let mut report = lock(&self.report);
                report.delivered += 1;
                report.sink_failures += failures.len() as u64;
                Ok(())
            }
        }
    }

    /// Stop accepting records, deliver everything already queued, join the
    /// worker. Calling it again, or before `start`, just leaves the
    /// pipeline `Stopped`.
    pub fn close(&self) {
        let _closing = lock(&self.closing);

        {
            let mut state = lock(&self.state);
            match *state {
                WorkerState::Stopped => return,
                WorkerState::NotStarted => {
                    *state = WorkerState::Stopped;
                    self.queue.close();
                    return;
                }
                WorkerState::Running | WorkerState::Draining => *state = WorkerState::Draining,
            }
        }

        self.queue.close();

        if let Some(worker) = lock(&self.worker).take() {
            *lock(&self.report) = worker.join();
        }

        if let Some(runtime) = lock(&self.inline).take() {
            {
                let _enter = runtime.enter();
                let _delivering = DeliveryScope::enter();
                let failures = futures::executor::block_on(self.registry.flush());
                lock(&self.report).sink_failures += failures.len() as u64;
            }
            runtime.shutdown_background();
        }

        *lock(&self.state) = WorkerState::Stopped;
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.queue.stats()
    }

    pub fn sink_stats(&self) -> Vec<SinkStats> {
        self.registry.stats()
    }

    /// Worker totals; final once the pipeline is `Stopped`.
    pub fn report(&self) -> WorkerReport {
        *lock(&self.report)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.close();
    }
}
