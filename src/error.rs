use std::path::PathBuf;

/// Raised synchronously while configuring the pipeline.
#[derive(thiserror::Error, Debug)]
pub enum ConfigurationError {
    #[error("logging is already configured for this process")]
    AlreadyConfigured,

    #[error("unknown log level: {0}")]
    InvalidLevel(String),

    #[error("at least one of stdout, file, or otlp logging must be configured")]
    NoSinks,

    #[error("unsupported OTLP protocol '{0}', expected 'http/protobuf' or 'grpc'")]
    UnsupportedProtocol(String),

    #[error("OTLP protocol '{0}' is not available in this build")]
    ProtocolUnavailable(String),

    #[error("unsupported OTLP compression '{0}', expected 'gzip'")]
    UnsupportedCompression(String),

    #[error("otlp feature is not enabled")]
    OtlpFeatureDisabled,

    #[error("unable to open log file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to build OTLP client: {0}")]
    Client(String),

    #[error("failed to spawn delivery worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),
}

/// Raised when an operation is attempted in the wrong lifecycle state.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("logging pipeline has not been started")]
    NotStarted,

    #[error("logging pipeline has been shut down")]
    Stopped,
}

/// A single sink failed to accept a record. Never fatal; the worker reports
/// it and moves on to the next sink.
#[derive(thiserror::Error, Debug)]
#[error("sink '{sink}' failed: {message}")]
pub struct SinkDeliveryError {
    pub sink: String,
    pub message: String,
}
