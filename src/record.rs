use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Attribute map attached to a record. Keys are unique and iterate in order.
pub type Fields = BTreeMap<String, serde_json::Value>;

/// Severity of a [`LogRecord`].
///
/// Ordered from least to most severe, so `level >= Level::Warn` reads the
/// way it sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => "INFO",
            Level::Warn => "WARN",
            Level::Error => "ERROR",
            Level::Fatal => "FATAL",
        }
    }

    /// Position on the 0..=50 numeric scale.
    pub fn levelno(&self) -> i32 {
        match self {
            Level::Trace => 5,
            Level::Debug => 10,
            Level::Info => 20,
            Level::Warn => 30,
            Level::Error => 40,
            Level::Fatal => 50,
        }
    }

    /// OpenTelemetry `SeverityNumber` for this level. Trace shares the
    /// debug bucket.
    pub fn severity_number(&self) -> u8 {
        severity_number(self.levelno())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TRACE" => Ok(Level::Trace),
            "DEBUG" => Ok(Level::Debug),
            "INFO" => Ok(Level::Info),
            "WARN" | "WARNING" => Ok(Level::Warn),
            "ERROR" => Ok(Level::Error),
            "FATAL" | "CRITICAL" => Ok(Level::Fatal),
            _ => Err(ConfigurationError::InvalidLevel(s.to_string())),
        }
    }
}

impl From<&tracing::Level> for Level {
    fn from(level: &tracing::Level) -> Self {
        match *level {
            tracing::Level::TRACE => Level::Trace,
            tracing::Level::DEBUG => Level::Debug,
            tracing::Level::INFO => Level::Info,
            tracing::Level::WARN => Level::Warn,
            tracing::Level::ERROR => Level::Error,
        }
    }
}

/// Map a numeric level on the 0..=50 scale (10 = debug, 20 = info,
/// 30 = warn, 40 = error, 50 = fatal) onto an OpenTelemetry severity number.
///
/// Non-positive values map to `0` (unspecified); everything above 50 is
/// still fatal.
pub fn severity_number(levelno: i32) -> u8 {
    match levelno {
        i32::MIN..=0 => 0,
        1..=19 => 5,
        20..=29 => 9,
        30..=39 => 13,
        40..=49 => 17,
        _ => 21,
    }
}

pub const EXCEPTION_TYPE: &str = "exception.type";
pub const EXCEPTION_MESSAGE: &str = "exception.message";
pub const EXCEPTION_STACKTRACE: &str = "exception.stacktrace";

/// `exception.message` and `exception.stacktrace` for `err`.
///
/// The stack trace is the `source()` chain, outermost first, one
/// `caused by:` line per cause.
pub fn exception_fields(err: &(dyn std::error::Error + 'static)) -> Fields {
    let mut trace = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }

    let mut fields = Fields::new();
    fields.insert(EXCEPTION_MESSAGE.into(), err.to_string().into());
    fields.insert(EXCEPTION_STACKTRACE.into(), trace.into());
    fields
}

/// Source code location of the call site that produced a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodeLocation {
    pub module_path: Option<String>,
    pub file: Option<String>,
    pub line: Option<u32>,
}

impl From<&'static std::panic::Location<'static>> for CodeLocation {
    fn from(location: &'static std::panic::Location<'static>) -> Self {
        Self {
            module_path: None,
            file: Some(location.file().to_string()),
            line: Some(location.line()),
        }
    }
}

/// Immutable snapshot of one log event.
///
/// Built once at emission time (ambient context already merged into
/// `attributes`) and never mutated afterwards; sinks only ever see it by
/// shared reference.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,
    pub level: Level,
    /// Logger name (the `tracing` target for events coming from macros).
    pub logger: String,
    pub message: String,
    pub attributes: Fields,
    pub payload: Option<serde_json::Value>,
    pub code: CodeLocation,
    pub thread_name: Option<String>,
}

impl LogRecord {
    pub fn new(level: Level, logger: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            logger: logger.into(),
            message: message.into(),
            attributes: Fields::new(),
            payload: None,
            code: CodeLocation::default(),
            thread_name: std::thread::current().name().map(str::to_string),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_attributes(mut self, fields: Fields) -> Self {
        self.attributes.extend(fields);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_code(mut self, code: CodeLocation) -> Self {
        self.code = code;
        self
    }
}
