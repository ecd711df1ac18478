use thiserror::Error;

use crate::pipeline::Totals;

/// Failures reading the input. Always fatal to the run.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("failed to open input {path}: {error}")]
    Open {
        path: String,
        error: std::io::Error,
    },
    #[error("failed to read input record: {0}")]
    Read(#[from] csv::Error),
}

/// Failures talking to a sink. Fatal to the batch that hit them; never retried.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("connection failed with: {0}")]
    Connection(sqlx::Error),
    #[error("{command} query failed with: {error}")]
    Query { command: String, error: sqlx::Error },
    #[error("i/o failed on {path}: {error}")]
    Io {
        path: String,
        error: std::io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("sink rejected the write: {0}")]
    Rejected(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("pool size must be greater than zero")]
    ZeroPoolSize,
    #[error("{0} is not a valid sink, expected one of: postgres, file, stdout")]
    UnknownSink(String),
}

/// Errors that terminate a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to read batches: {0}")]
    Source(#[from] SourceError),
    #[error("worker {worker} could not open its sink session: {error}")]
    SinkOpen { worker: usize, error: SinkError },
    #[error("writing batch {batch} failed: {error}")]
    Sink { batch: usize, error: SinkError },
    #[error("worker {worker} could not close its sink session: {error}")]
    SinkClose { worker: usize, error: SinkError },
    #[error("a worker task panicked: {0}")]
    WorkerPanicked(String),
}

/// A failed run: the first fatal error, plus what the batches that finished before it
/// managed to write.
#[derive(Error, Debug)]
#[error("{error} (before failing: {partial})")]
pub struct PipelineFailure {
    pub error: PipelineError,
    pub partial: Totals,
}
