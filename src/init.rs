use crate::backend::make_registry_from_config;
use crate::config::LogConfig;
use crate::error::{ConfigurationError, LifecycleError};
use crate::layer::PipelineLayer;
use crate::logger::{Enricher, Logger};
use crate::pipeline::{Pipeline, WorkerState};
use crate::queue::QueueStats;
use crate::registry::{SinkRegistry, SinkStats};
use crate::worker::WorkerReport;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::Registry;

static GLOBAL: Mutex<Option<LoggingHandle>> = Mutex::new(None);

fn global_slot() -> MutexGuard<'static, Option<LoggingHandle>> {
    GLOBAL.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A started pipeline plus what producers need to feed it.
///
/// Cheap to clone. [`init_logging`] installs one process-wide; tests and
/// embedders can build their own with [`LoggingHandle::build`] and attach
/// [`layer`](Self::layer) to a local subscriber.
#[derive(Clone)]
pub struct LoggingHandle {
    pipeline: Arc<Pipeline>,
    enricher: Arc<Enricher>,
    service_name: String,
}

impl LoggingHandle {
    /// Start a pipeline over `registry` with the delivery and enrichment
    /// settings of `cfg`. Sink settings in `cfg` are ignored.
    pub fn build(cfg: &LogConfig, registry: SinkRegistry) -> Result<Self, ConfigurationError> {
        if registry.is_empty() {
            return Err(ConfigurationError::NoSinks);
        }
        let enricher = Arc::new(Enricher::from_config(cfg)?);
        let pipeline = Arc::new(Pipeline::new(registry, cfg.delivery_mode()));
        pipeline.start()?;
        Ok(Self {
            pipeline,
            enricher,
            service_name: cfg.service_name.clone(),
        })
    }

    /// A `tracing` layer feeding this pipeline.
    pub fn layer(&self) -> PipelineLayer {
        PipelineLayer::new(Arc::clone(&self.pipeline), Arc::clone(&self.enricher))
    }

    /// A named logger; `None` uses the service name.
    pub fn logger(&self, name: Option<&str>) -> Logger {
        Logger::new(
            name.unwrap_or(&self.service_name),
            Arc::clone(&self.enricher),
            Arc::clone(&self.pipeline),
        )
    }

    /// Drain and stop. Safe to call more than once.
    pub fn shutdown(&self) {
        self.pipeline.close();
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn state(&self) -> WorkerState {
        self.pipeline.state()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.pipeline.queue_stats()
    }

    pub fn sink_stats(&self) -> Vec<SinkStats> {
        self.pipeline.sink_stats()
    }

    pub fn report(&self) -> WorkerReport {
        self.pipeline.report()
    }
}

/// Whether [`init_logging`] has succeeded in this process, even if the
/// pipeline has since been shut down.
pub fn is_configured() -> bool {
    global_slot().is_some()
}

/// Configure process-wide logging from `cfg`.
///
/// **Effects**
///
/// Builds the sinks `cfg` enables, starts the delivery pipeline and
/// installs a [`Registry`] with [`PipelineLayer`] as the global default
/// `tracing` subscriber.
///
/// **Errors**
///
/// [`ConfigurationError::AlreadyConfigured`] on every call after the first
/// successful one (the running pipeline is left untouched), or whatever
/// building the sinks reports.
pub fn init_logging(cfg: LogConfig) -> Result<LoggingHandle, ConfigurationError> {
    if is_configured() {
        return Err(ConfigurationError::AlreadyConfigured);
    }
    let registry = make_registry_from_config(&cfg)?;
    init_logging_with_registry(&cfg, registry)
}

/// Like [`init_logging`], but delivering to a caller-built registry.
pub fn init_logging_with_registry(
    cfg: &LogConfig,
    registry: SinkRegistry,
) -> Result<LoggingHandle, ConfigurationError> {
    let mut slot = global_slot();
    if slot.is_some() {
        return Err(ConfigurationError::AlreadyConfigured);
    }

    let handle = LoggingHandle::build(cfg, registry)?;
    let subscriber = Registry::default().with(handle.layer());
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // Someone else owns the global subscriber.
        handle.shutdown();
        return Err(ConfigurationError::AlreadyConfigured);
    }

    *slot = Some(handle.clone());
    Ok(handle)
}

/// The process-wide handle, if logging has been configured.
pub fn global() -> Option<LoggingHandle> {
    global_slot().clone()
}

/// A named logger on the process-wide pipeline.
pub fn get_logger(name: Option<&str>) -> Result<Logger, LifecycleError> {
    global()
        .map(|handle| handle.logger(name))
        .ok_or(LifecycleError::NotStarted)
}

/// Drain and stop the process-wide pipeline. Call from process exit paths.
///
/// A no-op when logging was never configured or is already stopped.
pub fn shutdown() {
    if let Some(handle) = global() {
        handle.shutdown();
    }
}
