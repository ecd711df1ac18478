use std::fmt;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{ConfigError, PipelineError, PipelineFailure};
use crate::record::Batch;
use crate::registry::DedupRegistry;
use crate::sink::SinkFactory;
use crate::source::BatchSource;
use crate::worker::{BatchCounts, BatchWorker};

pub const DEFAULT_BATCH_SIZE: NonZeroUsize = match NonZeroUsize::new(200) {
    Some(size) => size,
    None => unreachable!(),
};
pub const DEFAULT_POOL_SIZE: NonZeroUsize = match NonZeroUsize::new(4) {
    Some(size) => size,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Maximum number of records per batch.
    pub batch_size: NonZeroUsize,
    /// Maximum number of batches processed at once, one worker each.
    pub pool_size: NonZeroUsize,
}

impl PipelineConfig {
    pub fn new(batch_size: usize, pool_size: usize) -> Result<Self, ConfigError> {
        Ok(Self {
            batch_size: NonZeroUsize::new(batch_size).ok_or(ConfigError::ZeroBatchSize)?,
            pool_size: NonZeroUsize::new(pool_size).ok_or(ConfigError::ZeroPoolSize)?,
        })
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// Running sum of batch counts. Addition is commutative, so the totals don't depend on
/// the order batches finish in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Totals {
    pub accepted: usize,
    pub rejected: usize,
    pub batches: usize,
}

impl Totals {
    pub fn aggregate(counts: impl IntoIterator<Item = BatchCounts>) -> Self {
        counts.into_iter().fold(Self::default(), |mut totals, c| {
            totals.add(c);
            totals
        })
    }

    pub fn add(&mut self, counts: BatchCounts) {
        self.accepted += counts.accepted;
        self.rejected += counts.rejected;
        self.batches += 1;
    }

    pub fn total(&self) -> usize {
        self.accepted + self.rejected
    }
}

impl fmt::Display for Totals {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accepted, {} rejected across {} batches",
            self.accepted, self.rejected, self.batches
        )
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub totals: Totals,
    /// Distinct ids claimed during the run, including those of records later rejected
    /// for a negative value.
    pub claimed_ids: usize,
    pub elapsed: Duration,
}

/// Counts of every batch completed so far, added as each batch finishes so that a
/// worker that later panics still has its finished batches counted.
#[derive(Default)]
struct SharedTotals(Mutex<Totals>);

impl SharedTotals {
    fn add(&self, counts: BatchCounts) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).add(counts);
    }

    fn get(&self) -> Totals {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps the first fatal error of a run. Later errors are only logged.
#[derive(Default)]
struct FirstFailure(Mutex<Option<PipelineError>>);

impl FirstFailure {
    fn record(&self, failure: PipelineError) {
        let mut slot = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            error!("Pipeline failed: {}", failure);
            *slot = Some(failure);
        } else {
            warn!("Further failure after the pipeline already failed: {}", failure);
        }
    }

    fn take(&self) -> Option<PipelineError> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}

/// Runs batches through a fixed pool of workers.
///
/// At most `pool_size` batches are in flight. Batches go to whichever worker is free,
/// so when the same id appears in two batches, which one is accepted depends on which
/// worker claims it first. Within a batch the earlier record always wins.
///
/// The first fatal error (source, sink or a panicking worker) stops the run gracefully:
/// no further batches are read or taken, batches already being processed finish and
/// count towards the partial totals, and batches read but not yet taken are dropped.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub async fn run<S: BatchSource>(
        &self,
        source: S,
        sinks: Arc<dyn SinkFactory>,
    ) -> Result<RunSummary, PipelineFailure> {
        let start = Instant::now();
        let pool_size = self.config.pool_size.get();
        let registry = Arc::new(DedupRegistry::new());
        let cancel = CancellationToken::new();
        let failures = Arc::new(FirstFailure::default());
        let totals = Arc::new(SharedTotals::default());

        info!(
            batch_size = self.config.batch_size.get(),
            pool_size, "Starting pipeline"
        );

        let (tx, rx) = mpsc::channel::<Batch>(pool_size);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for id in 0..pool_size {
            workers.spawn(run_worker(
                id,
                registry.clone(),
                sinks.clone(),
                rx.clone(),
                cancel.clone(),
                failures.clone(),
                totals.clone(),
            ));
        }
        // Workers own the receiver from here on; once they all exit the feeder's sends fail
        drop(rx);

        let feeder = tokio::task::spawn_blocking({
            let cancel = cancel.clone();
            let failures = failures.clone();
            move || feed(source, tx, cancel, failures)
        });

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                failures.record(PipelineError::WorkerPanicked(e.to_string()));
                cancel.cancel();
            }
        }

        if let Err(e) = feeder.await {
            failures.record(PipelineError::WorkerPanicked(e.to_string()));
        }

        let totals = totals.get();
        if let Some(error) = failures.take() {
            error!(%totals, "Pipeline stopped after a failure");
            return Err(PipelineFailure {
                error,
                partial: totals,
            });
        }

        let summary = RunSummary {
            totals,
            claimed_ids: registry.len(),
            elapsed: start.elapsed(),
        };
        info!(
            accepted = totals.accepted,
            rejected = totals.rejected,
            batches = totals.batches,
            claimed_ids = summary.claimed_ids,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Pipeline finished"
        );
        Ok(summary)
    }
}

/// Read batches from the source and hand them to the workers. Runs on a blocking
/// thread, since reading the source may block.
fn feed<S: BatchSource>(
    mut source: S,
    tx: mpsc::Sender<Batch>,
    cancel: CancellationToken,
    failures: Arc<FirstFailure>,
) {
    let mut dispatched = 0usize;
    loop {
        if cancel.is_cancelled() {
            info!(dispatched, "Stopping dispatch after failure");
            return;
        }

        match source.next() {
            None => break,
            Some(Ok(batch)) => {
                if tx.blocking_send(batch).is_err() {
                    // Every worker has exited
                    return;
                }
                dispatched += 1;
            }
            Some(Err(e)) => {
                failures.record(PipelineError::Source(e));
                cancel.cancel();
                return;
            }
        }
    }
    info!(dispatched, "All batches dispatched");
}

async fn run_worker(
    id: usize,
    registry: Arc<DedupRegistry>,
    sinks: Arc<dyn SinkFactory>,
    batches: Arc<tokio::sync::Mutex<mpsc::Receiver<Batch>>>,
    cancel: CancellationToken,
    failures: Arc<FirstFailure>,
    totals: Arc<SharedTotals>,
) {
    let sink = match sinks.open().await {
        Ok(sink) => sink,
        Err(error) => {
            failures.record(PipelineError::SinkOpen { worker: id, error });
            cancel.cancel();
            return;
        }
    };
    let mut completed = Totals::default();
    let mut worker = BatchWorker::new(id, registry, sink);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            batch = async { batches.lock().await.recv().await } => batch,
        };
        let Some(batch) = next else {
            break;
        };

        match worker.process_batch(batch).await {
            Ok(counts) => {
                totals.add(counts);
                completed.add(counts);
            }
            Err(e) => {
                failures.record(e);
                cancel.cancel();
                break;
            }
        }
    }

    if let Err(e) = worker.close().await {
        failures.record(e);
        cancel.cancel();
    }

    info!(worker = id, %completed, "Worker finished");
}
