use crate::record::LogRecord;
use async_trait::async_trait;
use std::error::Error;

/// Asynchronous destination for [`LogRecord`]s.
///
/// Implementations transport records to a concrete backend (stdout, a
/// rotating file, an OTLP collector). In async mode `send` is only ever
/// called from the single delivery worker, one record at a time, so an
/// implementation does not need to guard against concurrent calls to itself.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Deliver a single log record.
    ///
    /// **Returns**
    /// - `Ok(())` if the backend accepted the record.
    /// - `Err(..)` if it failed (I/O error, HTTP status, serialization). The
    ///   failure is reported and counted; the record is not retried and
    ///   other sinks still receive it.
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>>;

    /// Flush any buffered records. Called once after the queue has drained.
    ///
    /// Default implementation is a no-op.
    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        Ok(())
    }

    /// Short name used in diagnostics.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}
