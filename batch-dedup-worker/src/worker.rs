use std::sync::Arc;

use tracing::{debug, error};

use crate::error::{PipelineError, SinkError};
use crate::record::{Batch, RejectedRecord};
use crate::registry::DedupRegistry;
use crate::sink::RecordSink;
use crate::validate::validate;

/// Accepted and rejected record counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub accepted: usize,
    pub rejected: usize,
}

/// Validates batches against the shared registry and routes each record to the clean
/// or bad store through the worker's own sink session.
pub struct BatchWorker {
    id: usize,
    registry: Arc<DedupRegistry>,
    sink: Box<dyn RecordSink>,
}

impl BatchWorker {
    pub fn new(id: usize, registry: Arc<DedupRegistry>, sink: Box<dyn RecordSink>) -> Self {
        Self { id, registry, sink }
    }

    /// Route every record of `batch`, then write the clean list and the rejected list with
    /// one call each. Records are validated in batch order, so the first occurrence of an
    /// id inside a batch is the one that gets claimed.
    ///
    /// A sink failure fails the whole batch. Whatever the first call already appended
    /// stays appended.
    pub async fn process_batch(&mut self, batch: Batch) -> Result<BatchCounts, PipelineError> {
        let index = batch.index;
        let mut clean = Vec::with_capacity(batch.len());
        let mut rejected = Vec::new();

        for raw in batch.records {
            match validate(&raw, &self.registry) {
                Ok(record) => clean.push(record),
                Err(reason) => rejected.push(RejectedRecord::new(raw, reason)),
            }
        }

        if !clean.is_empty() {
            self.sink
                .write_clean(&clean)
                .await
                .map_err(|error| self.write_failed(index, error))?;
        }

        if !rejected.is_empty() {
            self.sink
                .write_bad(&rejected)
                .await
                .map_err(|error| self.write_failed(index, error))?;
        }

        let counts = BatchCounts {
            accepted: clean.len(),
            rejected: rejected.len(),
        };

        metrics::counter!("dedup_records_accepted_total").increment(counts.accepted as u64);
        metrics::counter!("dedup_records_rejected_total").increment(counts.rejected as u64);
        metrics::counter!("dedup_batches_completed_total").increment(1);

        debug!(
            worker = self.id,
            batch = index,
            accepted = counts.accepted,
            rejected = counts.rejected,
            "Processed batch"
        );

        Ok(counts)
    }

    fn write_failed(&self, batch: usize, error: SinkError) -> PipelineError {
        metrics::counter!("dedup_batches_failed_total").increment(1);
        error!(worker = self.id, batch, "Failed to write batch: {}", error);
        PipelineError::Sink { batch, error }
    }

    /// Release the sink session.
    pub async fn close(self) -> Result<(), PipelineError> {
        let worker = self.id;
        self.sink
            .close()
            .await
            .map_err(|error| PipelineError::SinkClose { worker, error })
    }
}
