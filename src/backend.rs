use std::io::IsTerminal;
use std::sync::Arc;

use crate::config::{resolve_level, LogConfig, StreamTarget};
use crate::error::ConfigurationError;
use crate::file_sink::RotatingFileSink;
use crate::format::{DevColorFormatter, FormatOptions, JsonFormatter, RecordFormatter};
use crate::registry::SinkRegistry;
use crate::sink::LogSink;
use crate::stream_sink::StreamSink;

/// Formatter for a stream: coloured lines only when asked for and the
/// stream is a terminal; JSON otherwise.
fn stream_formatter(cfg: &LogConfig, target: StreamTarget, opts: &FormatOptions) -> RecordFormatter {
    let is_tty = match target {
        StreamTarget::Stdout => std::io::stdout().is_terminal(),
        StreamTarget::Stderr => std::io::stderr().is_terminal(),
    };
    if cfg.dev_color && is_tty {
        RecordFormatter::DevColor(DevColorFormatter::new(opts.clone()))
    } else {
        RecordFormatter::Json(JsonFormatter::new(opts.clone()))
    }
}

/// Build the ordered sink registry described by `cfg`: stream, then file,
/// then OTLP.
///
/// Validates the config first. Opening the file sink touches the
/// filesystem; building the OTLP sink only prepares its HTTP client.
pub fn make_registry_from_config(cfg: &LogConfig) -> Result<SinkRegistry, ConfigurationError> {
    cfg.validate()?;
    let opts = FormatOptions::from_config(cfg);
    let mut registry = SinkRegistry::new();

    if let Some(stdout) = &cfg.stdout {
        let sink = StreamSink::new(stdout.target, stream_formatter(cfg, stdout.target, &opts));
        add(&mut registry, Arc::new(sink), stdout.level.as_deref())?;
    }

    if let Some(file) = &cfg.file {
        let sink = RotatingFileSink::open(file, RecordFormatter::Json(JsonFormatter::new(opts.clone())))?;
        add(&mut registry, Arc::new(sink), file.level.as_deref())?;
    }

    if let Some(otlp) = &cfg.otlp {
        #[cfg(feature = "otlp")]
        {
            use crate::otlp::OtlpSink;

            let mut resource = crate::record::Fields::new();
            resource.insert("service.name".into(), cfg.service_name.clone().into());
            if let Some(version) = &cfg.service_version {
                resource.insert("service.version".into(), version.clone().into());
            }
            if let Some(env) = &cfg.environment {
                resource.insert("deployment.environment".into(), env.clone().into());
            }
            let sink = OtlpSink::new(otlp, resource)?;
            add(&mut registry, Arc::new(sink), otlp.level.as_deref())?;
        }

        #[cfg(not(feature = "otlp"))]
        {
            let _ = otlp; // silence unused warning when feature is disabled
            return Err(ConfigurationError::OtlpFeatureDisabled);
        }
    }

    Ok(registry)
}

fn add(
    registry: &mut SinkRegistry,
    sink: Arc<dyn LogSink>,
    level: Option<&str>,
) -> Result<(), ConfigurationError> {
    match resolve_level(level)? {
        Some(level) => registry.register_with_level(sink, level),
        None => registry.register(sink),
    };
    Ok(())
}
