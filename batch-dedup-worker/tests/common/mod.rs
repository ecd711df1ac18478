//! Shared helpers for pipeline integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use batch_dedup_worker::error::SinkError;
use batch_dedup_worker::record::{CleanRecord, RawRecord, RejectedRecord};
use batch_dedup_worker::sink::memory::MemorySinkFactory;
use batch_dedup_worker::sink::{RecordSink, SinkFactory};

pub fn valid(id: i64, value: f64) -> RawRecord {
    RawRecord::new(&id.to_string(), &value.to_string(), "2024-05-01 08:00:00")
}

/// Ten records: two share an id (the first of them negative), one has a non-numeric
/// value and one an unparsable timestamp.
pub fn mixed_records() -> Vec<RawRecord> {
    vec![
        RawRecord::new("1", "10.5", "2024-05-01 08:00:00"),
        RawRecord::new("2", "-5", "2024-05-01 08:01:00"),
        RawRecord::new("3", "0", "2024-05-01T08:02:00Z"),
        RawRecord::new("2", "7", "2024-05-01 08:03:00"),
        RawRecord::new("4", "abc", "2024-05-01 08:04:00"),
        RawRecord::new("5", "1.25", "not a timestamp"),
        RawRecord::new("6", "3", "2024-05-01"),
        RawRecord::new("7", "4e2", "2024-05-01 08:07:00"),
        RawRecord::new("8", "12", "2024/05/01 08:08:00"),
        RawRecord::new("9", "99.9", "2024-05-01 08:09:00.250"),
    ]
}

/// Fails the nth `write_clean` call (counting from 1, across all sessions), panics on
/// it when `panic_on_fail` is set, or fails every `open` when `fail_open` is set.
/// Everything else goes to the wrapped memory sink.
#[derive(Clone)]
pub struct FailingSinkFactory {
    pub inner: MemorySinkFactory,
    fail_clean_call: usize,
    panic_on_fail: bool,
    fail_open: bool,
    clean_calls: Arc<AtomicUsize>,
}

impl FailingSinkFactory {
    pub fn failing_clean_write(n: usize) -> Self {
        Self {
            inner: MemorySinkFactory::new(),
            fail_clean_call: n,
            panic_on_fail: false,
            fail_open: false,
            clean_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn panicking_clean_write(n: usize) -> Self {
        Self {
            panic_on_fail: true,
            ..Self::failing_clean_write(n)
        }
    }

    pub fn failing_open() -> Self {
        Self {
            inner: MemorySinkFactory::new(),
            fail_clean_call: usize::MAX,
            panic_on_fail: false,
            fail_open: true,
            clean_calls: Arc::new(AtomicUsize::new(0)),
        }
    }
}

struct FailingSink {
    inner: Box<dyn RecordSink>,
    fail_clean_call: usize,
    panic_on_fail: bool,
    clean_calls: Arc<AtomicUsize>,
}

#[async_trait]
impl SinkFactory for FailingSinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        if self.fail_open {
            return Err(SinkError::Rejected("store unavailable".to_string()));
        }
        Ok(Box::new(FailingSink {
            inner: self.inner.open().await?,
            fail_clean_call: self.fail_clean_call,
            panic_on_fail: self.panic_on_fail,
            clean_calls: self.clean_calls.clone(),
        }))
    }
}

#[async_trait]
impl RecordSink for FailingSink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        let call = self.clean_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call == self.fail_clean_call {
            if self.panic_on_fail {
                panic!("clean write {call} blew up");
            }
            return Err(SinkError::Rejected(format!("clean write {call} refused")));
        }
        self.inner.write_clean(records).await
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        self.inner.write_bad(records).await
    }
}

/// Memory sink that records the peak number of `write_clean` calls running at once.
/// Each write sleeps briefly so that concurrent batches overlap.
#[derive(Clone, Default)]
pub struct TrackingSinkFactory {
    pub inner: MemorySinkFactory,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl TrackingSinkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct TrackingSink {
    inner: Box<dyn RecordSink>,
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl SinkFactory for TrackingSinkFactory {
    async fn open(&self) -> Result<Box<dyn RecordSink>, SinkError> {
        Ok(Box::new(TrackingSink {
            inner: self.inner.open().await?,
            in_flight: self.in_flight.clone(),
            peak: self.peak.clone(),
        }))
    }
}

#[async_trait]
impl RecordSink for TrackingSink {
    async fn write_clean(&mut self, records: &[CleanRecord]) -> Result<(), SinkError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let result = self.inner.write_clean(records).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn write_bad(&mut self, records: &[RejectedRecord]) -> Result<(), SinkError> {
        self.inner.write_bad(records).await
    }
}
