use crate::config::FileConfig;
use crate::error::ConfigurationError;
use crate::format::RecordFormatter;
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use file_rotate::compression::Compression;
use file_rotate::suffix::AppendCount;
use file_rotate::{ContentLimit, FileRotate};
use std::error::Error;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Appends one line per record to a file, rolling it over by size.
///
/// Rotation keeps `app.log.1` (newest) through `app.log.N` (oldest) and
/// only happens when both `rotate_bytes` and `rotate_backups` are non-zero.
/// The file is rolled before the first write after it has grown past the
/// limit, so lines are never split and a file may overshoot by one record.
pub struct RotatingFileSink {
    path: PathBuf,
    formatter: RecordFormatter,
    writer: Mutex<FileRotate<AppendCount>>,
}

impl RotatingFileSink {
    /// Open (creating parent directories and the file if needed) in append
    /// mode.
    pub fn open(config: &FileConfig, formatter: RecordFormatter) -> Result<Self, ConfigurationError> {
        let path = config.path.clone();
        let to_config_err = |source: io::Error| ConfigurationError::File {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(to_config_err)?;
        }
        // Surface permission problems now rather than on the first write.
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(to_config_err)?;

        let limit = match config.rotate_bytes {
            Some(bytes) if bytes > 0 && config.rotate_backups > 0 => {
                ContentLimit::BytesSurpassed(usize::try_from(bytes).unwrap_or(usize::MAX))
            }
            _ => ContentLimit::None,
        };
        let writer = FileRotate::new(
            &path,
            AppendCount::new(config.rotate_backups.max(1)),
            limit,
            Compression::None,
            #[cfg(unix)]
            None,
        );

        Ok(Self {
            path,
            formatter,
            writer: Mutex::new(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl LogSink for RotatingFileSink {
    async fn send(&self, record: &LogRecord) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut line = self.formatter.format(record)?;
        line.push('\n');

        let mut writer = self.writer.lock().map_err(|_| "log file poisoned")?;
        writer.write_all(line.as_bytes())?;
        writer.flush()?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let mut writer = self.writer.lock().map_err(|_| "log file poisoned")?;
        writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "file"
    }
}
