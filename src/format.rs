//! Rendering of [`LogRecord`]s into lines, plus attribute redaction.

use std::collections::HashSet;

use chrono::{Local, SecondsFormat};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::LogConfig;
use crate::record::{Fields, Level, LogRecord};

const REDACTED: &str = "***";

/// Replaces sensitive attribute values before a record leaves the producer.
///
/// Keys match case-insensitively. Patterns are applied to every string
/// value; ones that fail to compile are skipped.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    keys: HashSet<String>,
    patterns: Vec<Regex>,
}

impl Redactor {
    pub fn new<K, P>(keys: K, patterns: P) -> Self
    where
        K: IntoIterator,
        K::Item: AsRef<str>,
        P: IntoIterator,
        P::Item: AsRef<str>,
    {
        Self {
            keys: keys.into_iter().map(|k| k.as_ref().to_lowercase()).collect(),
            patterns: patterns
                .into_iter()
                .filter_map(|p| Regex::new(p.as_ref()).ok())
                .collect(),
        }
    }

    pub fn from_config(cfg: &LogConfig) -> Self {
        Self::new(&cfg.redact_keys, &cfg.redact_value_patterns)
    }

    pub fn redact(&self, fields: &mut Fields) {
        for (key, value) in fields.iter_mut() {
            if self.keys.contains(&key.to_lowercase()) {
                *value = Value::String(REDACTED.to_string());
            } else if let Value::String(text) = value {
                for pattern in &self.patterns {
                    if pattern.is_match(text) {
                        *text = pattern.replace_all(text, REDACTED).into_owned();
                    }
                }
            }
        }
    }
}

/// Resource and field toggles shared by every formatter.
#[derive(Debug, Clone)]
pub struct FormatOptions {
    pub service_name: String,
    pub service_version: Option<String>,
    pub environment: Option<String>,
    pub host_name: Option<String>,
    pub pid: Option<u32>,
    pub include_logger_name: bool,
    pub include_thread: bool,
    pub include_code: bool,
    pub utc: bool,
    pub json_indent: Option<usize>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self::from_config(&LogConfig::default())
    }
}

impl FormatOptions {
    pub fn from_config(cfg: &LogConfig) -> Self {
        Self {
            service_name: cfg.service_name.clone(),
            service_version: cfg.service_version.clone(),
            environment: cfg.environment.clone(),
            host_name: cfg.include_host.then(crate::env::hostname).flatten(),
            pid: cfg.include_pid.then(std::process::id),
            include_logger_name: cfg.include_logger_name,
            include_thread: cfg.include_thread,
            include_code: cfg.include_code,
            utc: cfg.utc,
            json_indent: cfg.json_indent,
        }
    }

    pub fn timestamp(&self, record: &LogRecord) -> String {
        if self.utc {
            record.timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
        } else {
            record
                .timestamp
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Micros, false)
        }
    }
}

/// How a stream or file sink renders records.
#[derive(Debug, Clone)]
pub enum RecordFormatter {
    Json(JsonFormatter),
    DevColor(DevColorFormatter),
}

impl RecordFormatter {
    pub fn format(&self, record: &LogRecord) -> Result<String, serde_json::Error> {
        match self {
            RecordFormatter::Json(f) => f.format(record),
            RecordFormatter::DevColor(f) => Ok(f.format(record)),
        }
    }
}

/// One JSON object per record, keyed the way OpenTelemetry names things.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    opts: FormatOptions,
}

impl JsonFormatter {
    pub fn new(opts: FormatOptions) -> Self {
        Self { opts }
    }

    /// Build the JSON object without serializing it.
    pub fn to_value(&self, record: &LogRecord) -> Map<String, Value> {
        let opts = &self.opts;
        let mut out = Map::new();
        out.insert("time".into(), opts.timestamp(record).into());
        out.insert("severity_text".into(), record.level.as_str().into());
        out.insert("severity_number".into(), record.level.severity_number().into());
        out.insert("body".into(), record.message.clone().into());
        out.insert("service.name".into(), opts.service_name.clone().into());

        let optional = [
            ("service.version", opts.service_version.clone().map(Value::from)),
            ("deployment.environment", opts.environment.clone().map(Value::from)),
            ("host.name", opts.host_name.clone().map(Value::from)),
            ("process.pid", opts.pid.map(Value::from)),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                out.insert(key.into(), value);
            }
        }

        if opts.include_logger_name {
            out.insert("logger.name".into(), record.logger.clone().into());
        }
        if opts.include_thread {
            if let Some(thread) = &record.thread_name {
                out.insert("thread.name".into(), thread.clone().into());
            }
        }
        if opts.include_code {
            if let Some(file) = &record.code.file {
                out.insert("code.file.path".into(), file.clone().into());
            }
            if let Some(line) = record.code.line {
                out.insert("code.line.number".into(), line.into());
            }
            if let Some(module) = &record.code.module_path {
                out.insert("code.function.name".into(), module.clone().into());
            }
        }

        for (key, value) in &record.attributes {
            if !value.is_null() {
                out.insert(key.clone(), value.clone());
            }
        }
        if let Some(payload) = &record.payload {
            out.insert("payload".into(), payload.clone());
        }
        out
    }

    pub fn format(&self, record: &LogRecord) -> Result<String, serde_json::Error> {
        let value = Value::Object(self.to_value(record));
        match self.opts.json_indent {
            None => serde_json::to_string(&value),
            Some(width) => {
                let indent = vec![b' '; width];
                let mut buf = Vec::new();
                let formatter = serde_json::ser::PrettyFormatter::with_indent(&indent);
                let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
                value.serialize(&mut ser)?;
                Ok(String::from_utf8_lossy(&buf).into_owned())
            }
        }
    }
}

/// Single coloured line for humans at a terminal.
#[derive(Debug, Clone, Default)]
pub struct DevColorFormatter {
    opts: FormatOptions,
}

impl DevColorFormatter {
    pub fn new(opts: FormatOptions) -> Self {
        Self { opts }
    }

    fn color(level: Level) -> u8 {
        match level {
            Level::Trace | Level::Debug => 36,
            Level::Info => 32,
            Level::Warn => 33,
            Level::Error => 31,
            Level::Fatal => 35,
        }
    }

    pub fn format(&self, record: &LogRecord) -> String {
        let mut line = format!(
            "{} \x1b[{}m{}\x1b[0m {} - {}",
            self.opts.timestamp(record),
            Self::color(record.level),
            record.level,
            record.logger,
            record.message,
        );
        if let (Some(file), Some(lineno)) = (&record.code.file, record.code.line) {
            let base = file.rsplit(['/', '\\']).next().unwrap_or(file);
            line.push_str(&format!(" [{}:{}]", base, lineno));
        }
        if let Some(trace_id) = record.attributes.get("trace_id").and_then(Value::as_str) {
            let span_id = record
                .attributes
                .get("span_id")
                .and_then(Value::as_str)
                .unwrap_or("-");
            line.push_str(&format!(" (trace_id={} span_id={})", trace_id, span_id));
        }
        line
    }
}
