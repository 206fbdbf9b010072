use crate::config::StreamTarget;
use crate::format::RecordFormatter;
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::error::Error;
use std::io::{self, Write};
use std::sync::Mutex;

/// Writes one formatted line per record to stdout, stderr or any writer.
pub struct StreamSink {
    formatter: RecordFormatter,
    writer: Mutex<Box<dyn Write + Send>>,
    name: &'static str,
}

impl StreamSink {
    pub fn new(target: StreamTarget, formatter: RecordFormatter) -> Self {
        let (writer, name): (Box<dyn Write + Send>, _) = match target {
            StreamTarget::Stdout => (Box::new(io::stdout()), "stdout"),
            StreamTarget::Stderr => (Box::new(io::stderr()), "stderr"),
        };
        Self {
            formatter,
            writer: Mutex::new(writer),
            name,
        }
    }

    /// Write to an arbitrary destination, e.g. an in-memory buffer.
    pub fn with_writer(writer: Box<dyn Write + Send>, formatter: RecordFormatter) -> Self {
        Self {
            formatter,
            writer: Mutex::new(writer),
            name: "stream",
        }
    }
}

#[async_trait]
impl LogSink for StreamSink {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut line = self.formatter.format(record)?;
        line.push('\n');
        let mut writer = self.writer.lock().map_err(|_| "stream writer poisoned")?;
        writer.write_all(line.as_bytes())?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut writer = self.writer.lock().map_err(|_| "stream writer poisoned")?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{FormatOptions, JsonFormatter};
    use crate::record::Level;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_one_json_line_per_record() {
        let buf = Shared::default();
        let sink = StreamSink::with_writer(
            Box::new(buf.clone()),
            RecordFormatter::Json(JsonFormatter::new(FormatOptions::default())),
        );

        sink.send(&LogRecord::new(Level::Info, "svc", "ping")).await.unwrap();
        sink.send(&LogRecord::new(Level::Warn, "svc", "pong")).await.unwrap();
        sink.flush().await.unwrap();

        let out = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["body"], "ping");
        assert_eq!(lines[1]["severity_text"], "WARN");
    }
}
