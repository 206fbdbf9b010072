use std::error::Error;
use std::panic::Location;
use std::sync::Arc;

use serde_json::Value;

use crate::config::LogConfig;
use crate::context;
use crate::error::{ConfigurationError, LifecycleError};
use crate::format::Redactor;
use crate::pipeline::Pipeline;
use crate::record::{exception_fields, CodeLocation, Fields, Level, LogRecord, EXCEPTION_TYPE};

/// Turns an application call into a finished [`LogRecord`].
///
/// Attributes layer as static fields, then call-site fields, then the
/// ambient [`context`], later layers winning; the result is redacted once.
#[derive(Debug, Clone)]
pub struct Enricher {
    static_fields: Fields,
    redactor: Redactor,
    min_level: Level,
}

impl Enricher {
    pub fn new(static_fields: Fields, redactor: Redactor, min_level: Level) -> Self {
        Self {
            static_fields,
            redactor,
            min_level,
        }
    }

    pub fn from_config(cfg: &LogConfig) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            cfg.static_fields.clone(),
            Redactor::from_config(cfg),
            cfg.min_level()?,
        ))
    }

    pub fn min_level(&self) -> Level {
        self.min_level
    }

    pub fn enabled(&self, level: Level) -> bool {
        level >= self.min_level
    }

    pub fn build(
        &self,
        level: Level,
        logger: &str,
        message: String,
        call_site: Fields,
        payload: Option<Value>,
        code: CodeLocation,
    ) -> LogRecord {
        let mut attributes = self.static_fields.clone();
        attributes.extend(call_site);
        attributes.extend(context::current());
        self.redactor.redact(&mut attributes);

        let mut record = LogRecord::new(level, logger, message)
            .with_attributes(attributes)
            .with_code(code);
        record.payload = payload;
        record
    }
}

/// Named logger that submits straight to a pipeline, without going through
/// `tracing` macros.
///
/// Records carry the file and line of the caller.
#[derive(Clone)]
pub struct Logger {
    name: String,
    extra: Fields,
    enricher: Arc<Enricher>,
    pipeline: Arc<Pipeline>,
}

impl Logger {
    pub fn new(name: impl Into<String>, enricher: Arc<Enricher>, pipeline: Arc<Pipeline>) -> Self {
        Self {
            name: name.into(),
            extra: Fields::new(),
            enricher,
            pipeline,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of this logger that adds `key` to every record it emits.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Emit one record. Records below the configured level are discarded
    /// and reported as success.
    #[track_caller]
    pub fn log(&self, level: Level, message: impl Into<String>, fields: Fields) -> Result<(), LifecycleError> {
        self.emit(level, message.into(), fields, None, Location::caller())
    }

    /// Emit one record carrying a structured payload.
    #[track_caller]
    pub fn log_payload(
        &self,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
        payload: Value,
    ) -> Result<(), LifecycleError> {
        self.emit(level, message.into(), fields, Some(payload), Location::caller())
    }

    /// Emit an `ERROR` record describing `err`: its type name, message and
    /// `source()` chain land in the `exception.*` attributes.
    #[track_caller]
    pub fn exception<E>(&self, message: impl Into<String>, err: &E, fields: Fields) -> Result<(), LifecycleError>
    where
        E: Error + 'static,
    {
        let mut fields = fields;
        fields.extend(exception_fields(err));
        fields.insert(EXCEPTION_TYPE.into(), std::any::type_name::<E>().into());
        self.emit(Level::Error, message.into(), fields, None, Location::caller())
    }

    fn emit(
        &self,
        level: Level,
        message: String,
        fields: Fields,
        payload: Option<Value>,
        location: &'static Location<'static>,
    ) -> Result<(), LifecycleError> {
        if !self.enricher.enabled(level) {
            return Ok(());
        }
        let mut call_site = self.extra.clone();
        call_site.extend(fields);
        let record = self.enricher.build(
            level,
            &self.name,
            message,
            call_site,
            payload,
            CodeLocation::from(location),
        );
        self.pipeline.submit(record)
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, fields: Fields) -> Result<(), LifecycleError> {
        self.log(Level::Debug, message, fields)
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, fields: Fields) -> Result<(), LifecycleError> {
        self.log(Level::Info, message, fields)
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, fields: Fields) -> Result<(), LifecycleError> {
        self.log(Level::Warn, message, fields)
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, fields: Fields) -> Result<(), LifecycleError> {
        self.log(Level::Error, message, fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn context_overrides_call_site_and_redaction_applies() {
        let mut static_fields = Fields::new();
        static_fields.insert("team".into(), json!("core"));
        static_fields.insert("request_id".into(), json!("static"));
        let enricher = Enricher::new(static_fields, Redactor::new(["password"], Vec::<String>::new()), Level::Info);

        let mut ctx = Fields::new();
        ctx.insert("request_id".into(), json!("req-1"));
        let _scope = context::push(ctx);

        let mut call_site = Fields::new();
        call_site.insert("request_id".into(), json!("call"));
        call_site.insert("password".into(), json!("secret"));
        call_site.insert("cart_id".into(), json!("cart-9"));

        let record = enricher.build(
            Level::Info,
            "orders",
            "checkout".into(),
            call_site,
            None,
            CodeLocation::default(),
        );

        assert_eq!(record.attributes["team"], "core");
        assert_eq!(record.attributes["request_id"], "req-1");
        assert_eq!(record.attributes["password"], "***");
        assert_eq!(record.attributes["cart_id"], "cart-9");
        assert_eq!(record.logger, "orders");
    }

    #[derive(Default)]
    struct Collect(std::sync::Mutex<Vec<LogRecord>>);

    #[async_trait::async_trait]
    impl crate::sink::LogSink for Collect {
        async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.0.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn inline_logger(name: &str) -> (Logger, Arc<Pipeline>, Arc<Collect>) {
        let sink = Arc::new(Collect::default());
        let mut registry = crate::registry::SinkRegistry::new();
        registry.register(sink.clone());
        let pipeline = Arc::new(Pipeline::new(registry, crate::pipeline::DeliveryMode::Inline));
        pipeline.start().unwrap();
        let enricher = Arc::new(Enricher::new(Fields::new(), Redactor::default(), Level::Info));
        (Logger::new(name, enricher, Arc::clone(&pipeline)), pipeline, sink)
    }

    #[test]
    fn records_carry_the_caller_location() {
        let (logger, pipeline, sink) = inline_logger("orders");

        let expected_line = line!() + 1;
        logger.info("located", Fields::new()).unwrap();
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        assert_eq!(seen[0].code.file.as_deref(), Some(file!()));
        assert_eq!(seen[0].code.line, Some(expected_line));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("card declined")]
    struct Declined;

    #[derive(Debug, thiserror::Error)]
    #[error("checkout failed")]
    struct CheckoutFailed(#[source] Declined);

    #[test]
    fn exception_records_type_message_and_chain() {
        let (logger, pipeline, sink) = inline_logger("orders");
        let mut fields = Fields::new();
        fields.insert("cart_id".into(), json!("cart-9"));

        logger
            .exception("checkout aborted", &CheckoutFailed(Declined), fields)
            .unwrap();
        pipeline.close();

        let seen = sink.0.lock().unwrap();
        let record = &seen[0];
        assert_eq!(record.level, Level::Error);
        assert_eq!(record.message, "checkout aborted");
        assert!(record.attributes["exception.type"]
            .as_str()
            .unwrap()
            .ends_with("CheckoutFailed"));
        assert_eq!(record.attributes["exception.message"], "checkout failed");
        assert_eq!(
            record.attributes["exception.stacktrace"],
            "checkout failed\ncaused by: card declined"
        );
        assert_eq!(record.attributes["cart_id"], "cart-9");
    }

    #[test]
    fn level_threshold() {
        let enricher = Enricher::new(Fields::new(), Redactor::default(), Level::Warn);
        assert!(!enricher.enabled(Level::Info));
        assert!(enricher.enabled(Level::Error));
    }
}
