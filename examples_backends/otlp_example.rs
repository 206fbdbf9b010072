use tracing::{error, info, Instrument};

use microlog::{init_logging, Fields, FutureExt, LogConfig, OtlpConfig};

/// Ships records to a local OpenTelemetry collector over OTLP/HTTP protobuf.
///
/// Set `OTEL_EXPORTER_OTLP_ENDPOINT` to point somewhere other than
/// `http://localhost:4318`. Events inside the `request` span carry its trace
/// ids, which the collector sees as the log record's trace context.
#[tokio::main]
async fn main() {
    let cfg = LogConfig {
        service_name: "otlp-example".to_string(),
        otlp: Some(OtlpConfig {
            compression: Some("gzip".to_string()),
            ..OtlpConfig::default()
        }),
        ..LogConfig::default()
    };
    let handle = init_logging(cfg).expect("failed to configure logging");

    let mut request = Fields::new();
    request.insert("request_id".into(), "req-42".into());

    let span = tracing::info_span!(
        "request",
        trace_id = "4bf92f3577b34da6a3ce929d0e0e4736",
        span_id = "00f067aa0ba902b7",
        trace_sampled = true
    );
    async {
        info!(user = "alice", "otlp example started");
        tokio::task::yield_now().await;
        error!(db = "orders", "simulated error shipped to the collector");
    }
    .in_log_context(request)
    .instrument(span)
    .await;

    handle.shutdown();
    for sink in handle.sink_stats() {
        println!("{}: delivered {} failed {}", sink.name, sink.delivered, sink.failed);
    }
}
