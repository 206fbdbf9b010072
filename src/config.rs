use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::ConfigurationError;
use crate::pipeline::DeliveryMode;
use crate::record::{Fields, Level};

/// Which standard stream a [`StdoutConfig`] writes to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTarget {
    #[default]
    Stdout,
    Stderr,
}

/// Console sink settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StdoutConfig {
    pub target: StreamTarget,
    /// Minimum level for this sink only (e.g. `"DEBUG"`).
    pub level: Option<String>,
}

/// Rotating JSON-lines file sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub path: PathBuf,
    /// Roll over before the first write after the file passes this many bytes.
    /// `None` never rotates.
    #[serde(default)]
    pub rotate_bytes: Option<u64>,
    /// Rotated files kept next to the active one.
    #[serde(default = "default_rotate_backups")]
    pub rotate_backups: usize,
    #[serde(default)]
    pub level: Option<String>,
}

fn default_rotate_backups() -> usize {
    5
}

impl FileConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rotate_bytes: None,
            rotate_backups: default_rotate_backups(),
            level: None,
        }
    }
}

/// OTLP exporter settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtlpConfig {
    /// Transport: `"http/protobuf"` (alias `http`) or `"grpc"`.
    pub protocol: String,
    /// Collector endpoint. Falls back to `OTEL_EXPORTER_OTLP_LOGS_ENDPOINT`
    /// and then `OTEL_EXPORTER_OTLP_ENDPOINT` when omitted.
    pub endpoint: Option<String>,
    /// http: skip TLS certificate verification. grpc: plaintext channel.
    pub insecure: bool,
    /// Static headers (grpc metadata) attached to every export request.
    pub headers: BTreeMap<String, String>,
    /// `"gzip"`, or `None` for uncompressed payloads.
    pub compression: Option<String>,
    /// Export timeout in seconds. Defaults to 10.
    pub timeout_secs: Option<f64>,
    pub level: Option<String>,
    /// Extra resource attributes next to `service.name` and friends.
    pub resource_attributes: Fields,
}

impl Default for OtlpConfig {
    fn default() -> Self {
        Self {
            protocol: "http/protobuf".to_string(),
            endpoint: None,
            insecure: true,
            headers: BTreeMap::new(),
            compression: None,
            timeout_secs: None,
            level: None,
            resource_attributes: Fields::new(),
        }
    }
}

/// Complete logging configuration.
///
/// Deserializes from any serde format; every field has a default, so `{}`
/// is a valid config that logs JSON at `INFO` to stdout through an
/// unbounded async queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: Option<String>,

    pub stdout: Option<StdoutConfig>,
    pub file: Option<FileConfig>,
    pub otlp: Option<OtlpConfig>,

    /// Global minimum level.
    pub level: String,
    pub utc: bool,
    /// Deliver through a background worker instead of on the caller.
    pub async_mode: bool,
    /// `0` is unbounded.
    pub async_queue_size: usize,
    /// When the bounded queue is full, evict the oldest record instead of
    /// blocking the producer. Ignored when `async_queue_size` is `0`.
    pub async_queue_drop_oldest: bool,
    pub json_indent: Option<usize>,
    pub dev_color: bool,

    pub include_logger_name: bool,
    pub include_thread: bool,
    pub include_pid: bool,
    pub include_host: bool,
    pub include_code: bool,

    /// Metadata added to every record.
    pub static_fields: Fields,

    pub redact_keys: BTreeSet<String>,
    pub redact_value_patterns: Vec<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "app".to_string(),
            service_version: None,
            environment: None,
            stdout: Some(StdoutConfig::default()),
            file: None,
            otlp: None,
            level: "INFO".to_string(),
            utc: true,
            async_mode: true,
            async_queue_size: 0,
            async_queue_drop_oldest: false,
            json_indent: None,
            dev_color: false,
            include_logger_name: true,
            include_thread: false,
            include_pid: true,
            include_host: true,
            include_code: true,
            static_fields: Fields::new(),
            redact_keys: [
                "password",
                "passwd",
                "secret",
                "token",
                "api_key",
                "apikey",
                "authorization",
                "auth",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
            redact_value_patterns: Vec::new(),
        }
    }
}

impl LogConfig {
    pub fn min_level(&self) -> Result<Level, ConfigurationError> {
        self.level.parse()
    }

    pub fn delivery_mode(&self) -> DeliveryMode {
        DeliveryMode::from_settings(
            self.async_mode,
            self.async_queue_size,
            self.async_queue_drop_oldest,
        )
    }

    /// Check everything that can be checked without touching the outside
    /// world.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.min_level()?;
        if self.stdout.is_none() && self.file.is_none() && self.otlp.is_none() {
            return Err(ConfigurationError::NoSinks);
        }
        if let Some(stdout) = &self.stdout {
            resolve_level(stdout.level.as_deref())?;
        }
        if let Some(file) = &self.file {
            resolve_level(file.level.as_deref())?;
        }
        if let Some(otlp) = &self.otlp {
            resolve_level(otlp.level.as_deref())?;
        }
        Ok(())
    }
}

/// Parse an optional per-sink level override.
pub fn resolve_level(level: Option<&str>) -> Result<Option<Level>, ConfigurationError> {
    level.map(str::parse).transpose()
}
