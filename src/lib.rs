pub mod context;
pub mod error;
pub mod queue;
pub mod record;
pub mod registry;
pub mod sink;
pub mod worker;
pub mod pipeline;

pub mod config;
pub mod env;
pub mod format;
pub mod backend;
pub mod layer;
pub mod logger;

pub mod file_sink;
pub mod noop_sink;
pub mod stream_sink;

#[cfg(feature = "otlp")]
pub mod otlp;

pub mod init;

pub use config::{FileConfig, LogConfig, OtlpConfig, StdoutConfig, StreamTarget};
pub use context::FutureExt;
pub use error::{ConfigurationError, LifecycleError};
pub use init::{get_logger, init_logging, shutdown, LoggingHandle};
pub use record::{Fields, Level, LogRecord};
pub use sink::LogSink;
