use std::num::NonZeroUsize;

use crate::error::SourceError;
use crate::record::{Batch, RawRecord};

pub mod csv_file;

/// A lazy, finite, non-restartable sequence of batches.
///
/// Anything that iterates `Result<Batch, SourceError>` and can be moved onto a blocking
/// thread is a source. An `Err` ends the run.
pub trait BatchSource: Iterator<Item = Result<Batch, SourceError>> + Send + 'static {}

impl<T> BatchSource for T where T: Iterator<Item = Result<Batch, SourceError>> + Send + 'static {}

/// Slices a record stream into batches of at most `batch_size` records, numbering them
/// in input order. The last batch may be short; an empty input yields no batches.
pub struct Batcher<I> {
    records: I,
    batch_size: usize,
    next_index: usize,
    done: bool,
}

impl<I> Batcher<I>
where
    I: Iterator<Item = Result<RawRecord, SourceError>>,
{
    pub fn new(records: I, batch_size: NonZeroUsize) -> Self {
        Self {
            records,
            batch_size: batch_size.get(),
            next_index: 0,
            done: false,
        }
    }
}

/// Batch an infallible record stream, e.g. records already held in memory.
pub fn batch_records<T>(
    records: T,
    batch_size: NonZeroUsize,
) -> Batcher<impl Iterator<Item = Result<RawRecord, SourceError>>>
where
    T: IntoIterator<Item = RawRecord>,
{
    Batcher::new(records.into_iter().map(Ok), batch_size)
}

impl<I> Iterator for Batcher<I>
where
    I: Iterator<Item = Result<RawRecord, SourceError>>,
{
    type Item = Result<Batch, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut records = Vec::with_capacity(self.batch_size);
        while records.len() < self.batch_size {
            match self.records.next() {
                Some(Ok(record)) => records.push(record),
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if records.is_empty() {
            return None;
        }

        let batch = Batch {
            index: self.next_index,
            records,
        };
        self.next_index += 1;
        Some(Ok(batch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    fn records(n: usize) -> Vec<RawRecord> {
        (0..n)
            .map(|i| RawRecord::new(&i.to_string(), "1", "2024-01-01"))
            .collect()
    }

    #[test]
    fn test_batches_are_bounded_and_ordered() {
        let batches: Vec<Batch> = batch_records(records(7), size(3))
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            batches.iter().map(Batch::len).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        assert_eq!(
            batches.iter().map(|b| b.index).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(batches[2].records[0].id.as_deref(), Some("6"));
    }

    #[test]
    fn test_exact_multiple_has_no_trailing_batch() {
        let batches: Vec<_> = batch_records(records(6), size(3)).collect();
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn test_empty_input_yields_nothing() {
        let mut batcher = batch_records(Vec::new(), size(10));
        assert!(batcher.next().is_none());
    }

    #[test]
    fn test_error_ends_the_stream() {
        let failing = vec![
            Ok(RawRecord::default()),
            Err(SourceError::Open {
                path: "input.csv".to_string(),
                error: std::io::Error::other("boom"),
            }),
            Ok(RawRecord::default()),
        ];
        let mut batcher = Batcher::new(failing.into_iter(), size(10));

        assert!(matches!(batcher.next(), Some(Err(SourceError::Open { .. }))));
        assert!(batcher.next().is_none());
    }
}
