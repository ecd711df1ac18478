use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::record::{CleanRecord, RejectedRecord};

pub mod memory;
pub mod postgres;

/// One worker's session with the clean and bad stores.
///
/// Each call is a single bulk append that either lands durably or fails. Failures are
/// not retried by the caller.
#[async_trait]
pub trait RecordSink: Send {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError>;

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError>;

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Opens sink sessions. Every worker opens its own, so writes from different workers
/// never queue behind a shared connection.
#[async_trait]
pub trait SinkFactory: Send + Sync {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError>;
}

/// Store a record was routed to, used to tag lines where both share an output.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Store {
    Clean,
    Bad,
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    store: Store,
    record: &'a T,
}

pub struct StdoutSinkFactory;

pub struct StdoutSink;

#[async_trait]
impl SinkFactory for StdoutSinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        Ok(Box::new(StdoutSink))
    }
}

impl StdoutSink {
    fn print<T: Serialize>(store: Store, records: &[T]) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, &Tagged { store, record })?;
            buf.push(b'\n');
        }
        // Lock once so lines from concurrent workers don't interleave mid-call
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&buf)
            .and_then(|_| stdout.flush())
            .map_err(|error| SinkError::Io {
                path: "stdout".to_string(),
                error,
            })
    }
}

#[async_trait]
impl RecordSink for StdoutSink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        Self::print(Store::Clean, records)
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        Self::print(Store::Bad, records)
    }
}

/// Appends JSON lines to a clean file and a bad file.
///
/// Sessions opened from the same factory share one lock per file, held for the whole
/// of each append. `tokio::fs::File` hands large buffers to the OS in several writes,
/// so without it lines from concurrent sessions could interleave.
#[derive(Debug, Clone)]
pub struct FileSinkFactory {
    pub clean_path: PathBuf,
    pub bad_path: PathBuf,
    clean_lock: Arc<Mutex<()>>,
    bad_lock: Arc<Mutex<()>>,
}

pub struct FileSink {
    clean: JsonLinesFile,
    bad: JsonLinesFile,
}

struct JsonLinesFile {
    path: PathBuf,
    file: tokio::fs::File,
    lock: Arc<Mutex<()>>,
}

impl FileSinkFactory {
    pub fn new(clean_path: impl Into<PathBuf>, bad_path: impl Into<PathBuf>) -> Self {
        Self {
            clean_path: clean_path.into(),
            bad_path: bad_path.into(),
            clean_lock: Arc::new(Mutex::new(())),
            bad_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create both files, truncating anything left over from a previous run.
    pub async fn prepare(&self) -> Result<(), SinkError> {
        for path in [&self.clean_path, &self.bad_path] {
            info!("Truncating {}", path.display());
            tokio::fs::File::create(path)
                .await
                .map_err(|error| io_error(path, error))?;
        }
        Ok(())
    }
}

#[async_trait]
impl SinkFactory for FileSinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        Ok(Box::new(FileSink {
            clean: JsonLinesFile::open(&self.clean_path, self.clean_lock.clone()).await?,
            bad: JsonLinesFile::open(&self.bad_path, self.bad_lock.clone()).await?,
        }))
    }
}

impl JsonLinesFile {
    async fn open(path: &Path, lock: Arc<Mutex<()>>) -> Result<Self, SinkError> {
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .map_err(|error| io_error(path, error))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            lock,
        })
    }

    async fn append<T: Serialize>(&mut self, records: &[T]) -> Result<(), SinkError> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record)?;
            buf.push(b'\n');
        }
        debug!("Writing {} records to {}", records.len(), self.path.display());
        let _append = self.lock.lock().await;
        self.file
            .write_all(&buf)
            .await
            .map_err(|error| io_error(&self.path, error))?;
        self.file
            .flush()
            .await
            .map_err(|error| io_error(&self.path, error))
    }
}

#[async_trait]
impl RecordSink for FileSink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        self.clean.append(records).await
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        self.bad.append(records).await
    }

    async fn close(self: Box<Self>) -> Result<(), SinkError> {
        let FileSink { clean, bad } = *self;
        for target in [clean, bad] {
            target
                .file
                .sync_all()
                .await
                .map_err(|error| io_error(&target.path, error))?;
        }
        Ok(())
    }
}

fn io_error(path: &Path, error: std::io::Error) -> SinkError {
    SinkError::Io {
        path: path.display().to_string(),
        error,
    }
}
