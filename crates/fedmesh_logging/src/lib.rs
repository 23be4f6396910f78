//! Shared logging utilities for fedmesh binaries.

use anyhow::{Context, Result};
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

const DEFAULT_LOG_FILTER: &str = "fedmesh_worker=info,fedmesh_proto=info";

/// Status entries kept in memory before the oldest are dropped.
pub const STATUS_LOG_CAPACITY: usize = 1000;

/// Logging configuration shared by fedmesh binaries.
pub struct LogConfig<'a> {
    pub app_name: &'a str,
    pub verbose: bool,
    /// Mirror all log output to this file when set.
    pub logfile: Option<&'a Path>,
}

/// Initialize tracing with stderr output and an optional file mirror.
pub fn init_logging(config: LogConfig<'_>) -> Result<()> {
    let console_filter = if config.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    let registry = tracing_subscriber::registry().with(
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .with_filter(console_filter),
    );

    match config.logfile {
        Some(path) => {
            let file_writer = SharedFileWriter::open(path).with_context(|| {
                format!("Failed to open log file for {}: {}", config.app_name, path.display())
            })?;
            let file_filter = EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(file_writer)
                        .with_ansi(false)
                        .with_filter(file_filter),
                )
                .init();
        }
        None => registry.init(),
    }

    Ok(())
}

/// Append-only file writer shared across tracing workers.
#[derive(Clone)]
pub struct SharedFileWriter {
    inner: Arc<Mutex<File>>,
    path: PathBuf,
}

impl SharedFileWriter {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        Ok(Self {
            inner: Arc::new(Mutex::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct SharedFileWriterGuard {
    inner: Arc<Mutex<File>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SharedFileWriter {
    type Writer = SharedFileWriterGuard;

    fn make_writer(&'a self) -> Self::Writer {
        SharedFileWriterGuard {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for SharedFileWriterGuard {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log writer lock poisoned"))?;
        guard.flush()
    }
}

/// Bounded in-memory buffer of formatted status entries.
///
/// Holds the most recent [`STATUS_LOG_CAPACITY`] entries; older ones are
/// dropped. Cloning shares the buffer.
#[derive(Clone)]
pub struct StatusLog {
    entries: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl StatusLog {
    pub fn new() -> Self {
        Self::with_capacity(STATUS_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(64)))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, entry: String) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the buffered entries, oldest first.
    pub fn entries(&self) -> Vec<String> {
        match self.entries.lock() {
            Ok(guard) => guard.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_log_bounded() {
        let log = StatusLog::with_capacity(3);
        for i in 0..5 {
            log.push(format!("entry {i}"));
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.entries(), vec!["entry 2", "entry 3", "entry 4"]);
    }

    #[test]
    fn test_status_log_shared_between_clones() {
        let log = StatusLog::new();
        let other = log.clone();
        other.push("from clone".to_string());
        assert_eq!(log.entries(), vec!["from clone"]);
    }

    #[test]
    fn test_shared_file_writer_appends() {
        use tracing_subscriber::fmt::MakeWriter;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.log");

        let writer = SharedFileWriter::open(&path).unwrap();
        writer.make_writer().write_all(b"line one\n").unwrap();

        let reopened = SharedFileWriter::open(&path).unwrap();
        reopened.make_writer().write_all(b"line two\n").unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "line one\nline two\n");
    }
}
