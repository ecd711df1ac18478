use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{RecordSink, SinkFactory};
use crate::error::SinkError;
use crate::record::{CleanRecord, RejectedRecord};

#[derive(Debug, Default)]
struct Stores {
    clean: Vec<CleanRecord>,
    bad: Vec<RejectedRecord>,
    clean_writes: usize,
    bad_writes: usize,
}

/// Keeps both stores in process memory. Clones share the same stores, so a caller can
/// hand one to the pipeline and inspect the results through another.
#[derive(Debug, Clone, Default)]
pub struct MemorySinkFactory {
    stores: Arc<Mutex<Stores>>,
    sessions: Arc<AtomicUsize>,
}

pub struct MemorySink {
    stores: Arc<Mutex<Stores>>,
}

impl MemorySinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    fn stores(&self) -> MutexGuard<'_, Stores> {
        self.stores.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clean(&self) -> Vec<CleanRecord> {
        self.stores().clean.clone()
    }

    pub fn bad(&self) -> Vec<RejectedRecord> {
        self.stores().bad.clone()
    }

    /// Number of `(write_clean, write_bad)` calls received across all sessions.
    pub fn write_calls(&self) -> (usize, usize) {
        let stores = self.stores();
        (stores.clean_writes, stores.bad_writes)
    }

    pub fn sessions_opened(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SinkFactory for MemorySinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySink {
            stores: self.stores.clone(),
        }))
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores.clean.extend_from_slice(records);
        stores.clean_writes += 1;
        Ok(())
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores.bad.extend_from_slice(records);
        stores.bad_writes += 1;
        Ok(())
    }
}
