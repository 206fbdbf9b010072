use crate::logger::Enricher;
use crate::pipeline::Pipeline;
use crate::record::{exception_fields, CodeLocation, Fields, Level};
use crate::worker::on_delivery_thread;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::subscriber::Interest;
use tracing::{Event, Metadata, Subscriber};
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;

/// Field name whose value becomes the record's structured payload.
pub const PAYLOAD_FIELD: &str = "payload";

/// Span fields copied onto every event recorded inside the span.
pub const TRACE_FIELDS: [&str; 3] = ["trace_id", "span_id", "trace_sampled"];

// Crates the exporters are built on; their own events would loop back.
const EXPORTER_TARGETS: [&str; 8] = [
    "opentelemetry", "hyper", "hyper_util", "reqwest", "h2", "tonic", "tower", "rustls",
];

fn is_exporter_target(target: &str) -> bool {
    let root = target.split("::").next().unwrap_or(target);
    EXPORTER_TARGETS.contains(&root) || root.starts_with("opentelemetry")
}

/// Trace correlation ids recorded on a span.
#[derive(Debug, Default, Clone)]
struct TraceFields(Fields);

impl Visit for TraceFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if TRACE_FIELDS.contains(&field.name()) {
            self.0.insert(field.name().to_string(), value.into());
        }
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        if TRACE_FIELDS.contains(&field.name()) {
            self.0.insert(field.name().to_string(), value.into());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if TRACE_FIELDS.contains(&field.name()) {
            self.0.insert(field.name().to_string(), format!("{:?}", value).into());
        }
    }
}

/// `tracing_subscriber` layer that turns events into [`LogRecord`](crate::record::LogRecord)s
/// and submits them to a [`Pipeline`].
///
/// The application thread only builds the record and enqueues it; all
/// formatting and I/O happens on the delivery worker. Once the pipeline is
/// stopped, events are discarded and counted as rejected in
/// [`QueueStats`](crate::queue::QueueStats).
pub struct PipelineLayer {
    pipeline: Arc<Pipeline>,
    enricher: Arc<Enricher>,
}

impl PipelineLayer {
    pub fn new(pipeline: Arc<Pipeline>, enricher: Arc<Enricher>) -> Self {
        Self { pipeline, enricher }
    }

    fn wants(&self, metadata: &Metadata<'_>) -> bool {
        self.enricher.enabled(Level::from(metadata.level()))
            && !is_exporter_target(metadata.target())
            && !on_delivery_thread()
    }
}

impl<S> Layer<S> for PipelineLayer
where
    S: Subscriber + for<'span> LookupSpan<'span>,
{
    fn register_callsite(&self, metadata: &'static Metadata<'static>) -> Interest {
        // Not `always`: whether an event is wanted also depends on the
        // emitting thread.
        if metadata.is_event()
            && (!self.enricher.enabled(Level::from(metadata.level()))
                || is_exporter_target(metadata.target()))
        {
            Interest::never()
        } else {
            Interest::sometimes()
        }
    }

    fn enabled(&self, metadata: &Metadata<'_>, _ctx: Context<'_, S>) -> bool {
        !metadata.is_event() || self.wants(metadata)
    }

    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut trace = TraceFields::default();
        attrs.record(&mut trace);
        if trace.0.is_empty() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(trace);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<TraceFields>() {
            Some(trace) => values.record(trace),
            None => {
                let mut trace = TraceFields::default();
                values.record(&mut trace);
                if !trace.0.is_empty() {
                    extensions.insert(trace);
                }
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let meta = event.metadata();
        if !self.wants(meta) {
            return;
        }

        let mut fields = Fields::new();
        let mut message: Option<String> = None;
        let mut payload: Option<serde_json::Value> = None;
        let mut visitor = FieldVisitor {
            fields: &mut fields,
            message: &mut message,
            payload: &mut payload,
        };
        event.record(&mut visitor);

        // Innermost span wins; the event's own fields win over all spans.
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(trace) = span.extensions().get::<TraceFields>() {
                    for (key, value) in &trace.0 {
                        fields.entry(key.clone()).or_insert_with(|| value.clone());
                    }
                }
            }
        }

        let record = self.enricher.build(
            Level::from(meta.level()),
            meta.target(),
            message.unwrap_or_default(),
            fields,
            payload,
            CodeLocation {
                module_path: meta.module_path().map(|s| s.to_string()),
                file: meta.file().map(|s| s.to_string()),
                line: meta.line(),
            },
        );

        // Rejection after shutdown is already counted by the pipeline.
        let _ = self.pipeline.submit(record);
    }
}

/// Collects event fields into a [`Fields`] map, pulling out `message` and
/// [`PAYLOAD_FIELD`].
pub struct FieldVisitor<'a> {
    pub fields: &'a mut Fields,
    pub message: &'a mut Option<String>,
    pub payload: &'a mut Option<serde_json::Value>,
}

impl<'a> FieldVisitor<'a> {
    fn insert(&mut self, field: &Field, value: serde_json::Value) {
        match field.name() {
            "message" => {
                let text = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                *self.message = Some(text);
            }
            PAYLOAD_FIELD => *self.payload = Some(value),
            name => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }
}

impl<'a> Visit for FieldVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == PAYLOAD_FIELD {
            // JSON text becomes structure; anything else stays a string.
            let parsed = serde_json::from_str(value)
                .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
            *self.payload = Some(parsed);
            return;
        }
        self.insert(field, serde_json::Value::String(value.to_string()));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, serde_json::Value::from(value));
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, serde_json::Value::String(value.to_string()));
        self.fields.extend(exception_fields(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.insert(field, serde_json::Value::String(format!("{:?}", value)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;
    use crate::format::Redactor;
    use crate::pipeline::DeliveryMode;
    use crate::record::LogRecord;
    use crate::registry::SinkRegistry;
    use crate::sink::LogSink;
    use async_trait::async_trait;
    use serde_json::json;
    use std::error::Error;
    use std::sync::Mutex;
    use tracing_subscriber::layer::SubscriberExt;

    #[derive(Default)]
    struct Collect(Mutex<Vec<LogRecord>>);

    #[async_trait]
    impl LogSink for Collect {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    #[test]
    fn events_become_records_with_context_and_payload() {
        let sink = Arc::new(Collect::default());
        let mut registry = SinkRegistry::new();
        registry.register(sink.clone());
        let pipeline = Arc::new(Pipeline::new(registry, DeliveryMode::Inline));
        pipeline.start().unwrap();

        let enricher = Arc::new(Enricher::new(
            Fields::new(),
            Redactor::new(["token"], Vec::<String>::new()),
            Level::Info,
        ));
        let subscriber = tracing_subscriber::registry()
            .with(PipelineLayer::new(Arc::clone(&pipeline), enricher));

        tracing::subscriber::with_default(subscriber, || {
            let mut ctx = Fields::new();
            ctx.insert("request_id".into(), json!("ctx-1"));
            let _scope = context::push(ctx);

            tracing::debug!("filtered out");
            tracing::info!(token = "abc123", attempts = 2u64, "ping {}", 1);
            tracing::warn!(payload = r#"{"items":[1,2]}"#, "with payload");
        });
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 2);

        let first = &seen[0];
        assert_eq!(first.message, "ping 1");
        assert_eq!(first.level, Level::Info);
        assert_eq!(first.attributes["request_id"], "ctx-1");
        assert_eq!(first.attributes["token"], "***");
        assert_eq!(first.attributes["attempts"], 2);
        assert!(first.code.line.is_some());
        assert_eq!(first.logger, module_path!());

        let second = &seen[1];
        assert_eq!(second.payload, Some(json!({"items": [1, 2]})));
        assert!(!second.attributes.contains_key("payload"));
    }

    fn inline_subscriber() -> (impl Subscriber + Send + Sync, Arc<Pipeline>, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let mut registry = SinkRegistry::new();
        registry.register(sink.clone());
        let pipeline = Arc::new(Pipeline::new(registry, DeliveryMode::Inline));
        pipeline.start().unwrap();
        let enricher = Arc::new(Enricher::new(Fields::new(), Redactor::default(), Level::Info));
        let subscriber = tracing_subscriber::registry()
            .with(PipelineLayer::new(Arc::clone(&pipeline), enricher));
        (subscriber, pipeline, sink)
    }

    #[derive(Debug, thiserror::Error)]
    #[error("timed out")]
    struct TimedOut;

    #[derive(Debug, thiserror::Error)]
    #[error("upstream unavailable")]
    struct Upstream(#[source] TimedOut);

    #[test]
    fn recorded_errors_become_exception_attributes() {
        let (subscriber, pipeline, sink) = inline_subscriber();
        tracing::subscriber::with_default(subscriber, || {
            let err = Upstream(TimedOut);
            tracing::error!(error = &err as &(dyn Error + 'static), "call failed");
        });
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        let attributes = &seen[0].attributes;
        assert_eq!(attributes["error"], "upstream unavailable");
        assert_eq!(attributes["exception.message"], "upstream unavailable");
        assert_eq!(
            attributes["exception.stacktrace"],
            "upstream unavailable\ncaused by: timed out"
        );
    }

    #[test]
    fn span_trace_ids_reach_events_inside_the_span() {
        let (subscriber, pipeline, sink) = inline_subscriber();
        tracing::subscriber::with_default(subscriber, || {
            let outer = tracing::info_span!(
                "request",
                trace_id = "0af7651916cd43dd8448eb211c80319c",
                span_id = tracing::field::Empty,
                trace_sampled = true
            );
            let _outer = outer.enter();
            outer.record("span_id", "b7ad6b7169203331");

            let inner = tracing::info_span!("db", span_id = "00f067aa0ba902b7");
            let _inner = inner.enter();
            tracing::info!("query");
        });
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        let attributes = &seen[0].attributes;
        assert_eq!(attributes["trace_id"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(attributes["span_id"], "00f067aa0ba902b7");
        assert_eq!(attributes["trace_sampled"], true);
    }

    #[test]
    fn exporter_internal_events_are_ignored() {
        let (subscriber, pipeline, sink) = inline_subscriber();
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "hyper_util::client", "connection pooled");
            tracing::info!(target: "opentelemetry_sdk", "batch exported");
            tracing::info!(target: "orders", "kept");
        });
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].message, "kept");
    }
}
