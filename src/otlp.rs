//! OTLP log export through the OpenTelemetry SDK.
//!
//! Records are converted to SDK log records and handed to a batch
//! processor, which owns encoding and transport (`http/protobuf` over a
//! blocking `reqwest` client, or `grpc` over tonic).

use crate::config::OtlpConfig;
use crate::env;
use crate::error::ConfigurationError;
use crate::record::{Fields, Level, LogRecord};
use crate::sink::LogSink;
use crate::worker::mark_delivery_thread;
use async_trait::async_trait;
use opentelemetry::logs::{AnyValue, LogRecord as _, Logger as _, LoggerProvider as _, Severity};
use opentelemetry::trace::{SpanId, TraceFlags, TraceId};
use opentelemetry::{Key, KeyValue, Value as OtelValue};
use opentelemetry_otlp::tonic_types::metadata::MetadataMap;
use opentelemetry_otlp::{
    Compression, LogExporter, Protocol, WithExportConfig, WithHttpConfig, WithTonicConfig,
};
use opentelemetry_sdk::logs::{SdkLogger, SdkLoggerProvider};
use opentelemetry_sdk::Resource;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::runtime::Runtime;

/// Export timeout when the config leaves it unset.
pub const DEFAULT_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire protocol for [`OtlpSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtlpProtocol {
    HttpProtobuf,
    Grpc,
}

impl OtlpProtocol {
    /// Normalize a user-supplied protocol name.
    pub fn parse(protocol: &str) -> Result<Self, ConfigurationError> {
        let value = protocol.trim().to_ascii_lowercase();
        match value.as_str() {
            "" | "http" | "http/protobuf" | "http_protobuf" | "http-protobuf" => {
                Ok(OtlpProtocol::HttpProtobuf)
            }
            "grpc" | "grpc/protobuf" | "grpc_proto" | "grpc-protobuf" => Ok(OtlpProtocol::Grpc),
            _ => Err(ConfigurationError::UnsupportedProtocol(protocol.to_string())),
        }
    }
}

fn parse_compression(compression: Option<&str>) -> Result<Option<Compression>, ConfigurationError> {
    let Some(raw) = compression else {
        return Ok(None);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" => Ok(None),
        "gzip" => Ok(Some(Compression::Gzip)),
        _ => Err(ConfigurationError::UnsupportedCompression(raw.to_string())),
    }
}

fn header_map(headers: &std::collections::BTreeMap<String, String>) -> Result<HeaderMap, ConfigurationError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let key = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ConfigurationError::Client(format!("header '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ConfigurationError::Client(format!("header '{}': {}", name, e)))?;
        map.insert(key, value);
    }
    Ok(map)
}

/// Only plaintext gRPC channels are available; an endpoint without a scheme
/// gets `http://` when the config allows it.
fn grpc_endpoint(config: &OtlpConfig) -> Result<String, ConfigurationError> {
    let endpoint = env::otlp_grpc_endpoint(config.endpoint.as_deref());
    if endpoint.starts_with("http://") {
        Ok(endpoint)
    } else if !endpoint.starts_with("https://") && config.insecure {
        Ok(format!("http://{}", endpoint))
    } else {
        Err(ConfigurationError::ProtocolUnavailable(format!(
            "grpc with TLS ({})",
            endpoint
        )))
    }
}

fn http_exporter(
    config: &OtlpConfig,
    endpoint: &str,
    timeout: Duration,
    compression: Option<Compression>,
) -> Result<LogExporter, ConfigurationError> {
    let insecure = config.insecure;
    // The blocking client owns a runtime; build it off any caller runtime.
    let client = std::thread::spawn(move || {
        reqwest::blocking::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()
    })
    .join()
    .map_err(|_| ConfigurationError::Client("HTTP client construction panicked".to_string()))?
    .map_err(|e| ConfigurationError::Client(e.to_string()))?;

    let mut builder = LogExporter::builder()
        .with_http()
        .with_http_client(client)
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .with_headers(config.headers.clone().into_iter().collect());
    if let Some(compression) = compression {
        builder = builder.with_compression(compression);
    }
    builder
        .build()
        .map_err(|e| ConfigurationError::Client(e.to_string()))
}

/// Must run inside a tokio runtime context: the tonic channel spawns its
/// connection task on it.
fn grpc_exporter(
    endpoint: &str,
    headers: HeaderMap,
    timeout: Duration,
    compression: Option<Compression>,
) -> Result<LogExporter, ConfigurationError> {
    let mut builder = LogExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(timeout)
        .with_metadata(MetadataMap::from_headers(headers));
    if let Some(compression) = compression {
        builder = builder.with_compression(compression);
    }
    builder
        .build()
        .map_err(|e| ConfigurationError::Client(e.to_string()))
}

fn otel_value(value: &Value) -> Option<OtelValue> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => OtelValue::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => OtelValue::from(i),
            None => OtelValue::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => OtelValue::from(s.clone()),
        other => OtelValue::from(other.to_string()),
    })
}

fn otel_resource(fields: &Fields) -> Resource {
    Resource::builder()
        .with_attributes(
            fields
                .iter()
                .filter_map(|(key, value)| otel_value(value).map(|v| KeyValue::new(key.clone(), v))),
        )
        .build()
}

/// JSON attribute to OTel `AnyValue`. Nulls are dropped, also inside
/// arrays and objects.
fn any_value(value: &Value) -> Option<AnyValue> {
    Some(match value {
        Value::Null => return None,
        Value::Bool(b) => AnyValue::Boolean(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AnyValue::Int(i),
            None => AnyValue::Double(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => AnyValue::String(s.clone().into()),
        Value::Array(items) => AnyValue::ListAny(Box::new(items.iter().filter_map(any_value).collect())),
        Value::Object(map) => AnyValue::Map(Box::new(
            map.iter()
                .filter_map(|(k, v)| any_value(v).map(|v| (Key::from(k.clone()), v)))
                .collect(),
        )),
    })
}

fn severity(level: Level) -> Severity {
    match level.severity_number() {
        0..=4 => Severity::Trace,
        5..=8 => Severity::Debug,
        9..=12 => Severity::Info,
        13..=16 => Severity::Warn,
        17..=20 => Severity::Error,
        _ => Severity::Fatal,
    }
}

/// Lift `trace_id` / `span_id` (and `trace_sampled`) out of the attributes
/// when both ids are valid hex.
fn take_trace_context(attributes: &mut Fields) -> Option<(TraceId, SpanId, Option<TraceFlags>)> {
    let trace_id = TraceId::from_hex(attributes.get("trace_id")?.as_str()?).ok()?;
    let span_id = SpanId::from_hex(attributes.get("span_id")?.as_str()?).ok()?;
    attributes.remove("trace_id");
    attributes.remove("span_id");
    let flags = match attributes.remove("trace_sampled") {
        Some(Value::Bool(true)) => Some(TraceFlags::SAMPLED),
        Some(Value::Bool(false)) => Some(TraceFlags::default()),
        _ => None,
    };
    Some((trace_id, span_id, flags))
}

/// Ships records to an OpenTelemetry collector.
///
/// `send` only queues the record in the SDK's batch processor; export
/// failures are reported by the SDK, not returned here. `flush` waits for
/// the batch to go out.
pub struct OtlpSink {
    provider: SdkLoggerProvider,
    // One instrumentation scope per logger name.
    loggers: Mutex<HashMap<String, SdkLogger>>,
    protocol: OtlpProtocol,
    endpoint: String,
    // gRPC only. Shut down after the provider.
    runtime: Option<Runtime>,
}

impl OtlpSink {
    /// Build the exporter and batch processor. `resource` is attached to
    /// every export and normally carries `service.name` and friends.
    pub fn new(config: &OtlpConfig, resource: Fields) -> Result<Self, ConfigurationError> {
        let protocol = OtlpProtocol::parse(&config.protocol)?;
        let compression = parse_compression(config.compression.as_deref())?;
        let headers = header_map(&config.headers)?;
        let timeout = config
            .timeout_secs
            .filter(|s| s.is_finite() && *s > 0.0)
            .map(Duration::from_secs_f64)
            .unwrap_or(DEFAULT_EXPORT_TIMEOUT);

        let (exporter, endpoint, runtime) = match protocol {
            OtlpProtocol::HttpProtobuf => {
                let endpoint = env::otlp_logs_endpoint(config.endpoint.as_deref());
                let exporter = http_exporter(config, &endpoint, timeout, compression)?;
                (exporter, endpoint, None)
            }
            OtlpProtocol::Grpc => {
                let endpoint = grpc_endpoint(config)?;
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name("microlog-otlp")
                    .on_thread_start(mark_delivery_thread)
                    .enable_all()
                    .build()
                    .map_err(ConfigurationError::WorkerSpawn)?;
                let built = {
                    let _enter = runtime.enter();
                    grpc_exporter(&endpoint, headers, timeout, compression)
                };
                match built {
                    Ok(exporter) => (exporter, endpoint, Some(runtime)),
                    Err(err) => {
                        runtime.shutdown_background();
                        return Err(err);
                    }
                }
            }
        };

        let mut resource = resource;
        resource.extend(config.resource_attributes.clone());

        let provider = SdkLoggerProvider::builder()
            .with_resource(otel_resource(&resource))
            .with_batch_exporter(exporter)
            .build();

        Ok(Self {
            provider,
            loggers: Mutex::new(HashMap::new()),
            protocol,
            endpoint,
            runtime,
        })
    }

    pub fn protocol(&self) -> OtlpProtocol {
        self.protocol
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl LogSink for OtlpSink {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut attributes = record.attributes.clone();
        let trace = take_trace_context(&mut attributes);
        if let Some(payload) = &record.payload {
            attributes.insert("payload".into(), payload.clone());
        }
        if let Some(file) = &record.code.file {
            attributes.insert("code.file.path".into(), file.clone().into());
        }
        if let Some(line) = record.code.line {
            attributes.insert("code.line.number".into(), line.into());
        }
        if let Some(module) = &record.code.module_path {
            attributes.insert("code.function.name".into(), module.clone().into());
        }
        if let Some(thread) = &record.thread_name {
            attributes.insert("thread.name".into(), thread.clone().into());
        }

        let mut loggers = self.loggers.lock().unwrap_or_else(PoisonError::into_inner);
        let logger = loggers
            .entry(record.logger.clone())
            .or_insert_with(|| self.provider.logger(record.logger.clone()));

        let mut otel = logger.create_log_record();
        otel.set_timestamp(SystemTime::from(record.timestamp));
        otel.set_observed_timestamp(SystemTime::now());
        otel.set_severity_number(severity(record.level));
        otel.set_severity_text(record.level.as_str());
        otel.set_body(AnyValue::String(record.message.clone().into()));
        if let Some((trace_id, span_id, flags)) = trace {
            otel.set_trace_context(trace_id, span_id, flags);
        }
        for (key, value) in &attributes {
            if let Some(value) = any_value(value) {
                otel.add_attribute(key.clone(), value);
            }
        }
        logger.emit(otel);
        Ok(())
    }

    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        self.provider
            .force_flush()
            .map_err(|e| format!("OTLP flush failed: {}", e))?;
        Ok(())
    }

    fn name(&self) -> &str {
        "otlp"
    }
}

impl Drop for OtlpSink {
    fn drop(&mut self) {
        let _ = self.provider.shutdown();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
