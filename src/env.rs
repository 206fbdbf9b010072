//! Environment variable names read while building sinks.
//!
//! These are helpers only; the sink types themselves never touch the
//! environment.

/// Logs-specific OTLP endpoint, used verbatim.
pub const OTEL_EXPORTER_OTLP_LOGS_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_LOGS_ENDPOINT";

/// Base OTLP endpoint; `/v1/logs` is appended.
pub const OTEL_EXPORTER_OTLP_ENDPOINT_ENV: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

/// Host name as most shells export it.
pub const HOSTNAME_ENV: &str = "HOSTNAME";

/// http/protobuf endpoint used when neither the config nor the environment
/// names one.
pub const DEFAULT_OTLP_HTTP_ENDPOINT: &str = "http://localhost:4318/v1/logs";

/// grpc counterpart of [`DEFAULT_OTLP_HTTP_ENDPOINT`].
pub const DEFAULT_OTLP_GRPC_ENDPOINT: &str = "localhost:4317";

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Resolve the OTLP/HTTP logs URL: explicit value, then the logs-specific
/// variable, then the generic one, then the local collector default.
pub fn otlp_logs_endpoint(explicit: Option<&str>) -> String {
    if let Some(endpoint) = explicit.filter(|e| !e.trim().is_empty()) {
        return endpoint.to_string();
    }
    if let Some(endpoint) = non_empty_env(OTEL_EXPORTER_OTLP_LOGS_ENDPOINT_ENV) {
        return endpoint;
    }
    if let Some(base) = non_empty_env(OTEL_EXPORTER_OTLP_ENDPOINT_ENV) {
        return format!("{}/v1/logs", base.trim_end_matches('/'));
    }
    DEFAULT_OTLP_HTTP_ENDPOINT.to_string()
}

/// Resolve the OTLP/gRPC endpoint. Same order as [`otlp_logs_endpoint`],
/// but the generic variable is used as-is: gRPC has no per-signal path.
pub fn otlp_grpc_endpoint(explicit: Option<&str>) -> String {
    if let Some(endpoint) = explicit.filter(|e| !e.trim().is_empty()) {
        return endpoint.to_string();
    }
    non_empty_env(OTEL_EXPORTER_OTLP_LOGS_ENDPOINT_ENV)
        .or_else(|| non_empty_env(OTEL_EXPORTER_OTLP_ENDPOINT_ENV))
        .unwrap_or_else(|| DEFAULT_OTLP_GRPC_ENDPOINT.to_string())
}

/// Host name for the `host.name` field: `$HOSTNAME` when exported, else
/// the system host name.
pub fn hostname() -> Option<String> {
    non_empty_env(HOSTNAME_ENV).or_else(|| {
        gethostname::gethostname()
            .into_string()
            .ok()
            .filter(|s| !s.is_empty())
    })
}
