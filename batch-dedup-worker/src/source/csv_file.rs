use std::fs::File;
use std::io::Read;
use std::num::NonZeroUsize;
use std::path::Path;

use tracing::info;

use super::Batcher;
use crate::error::SourceError;
use crate::record::RawRecord;

/// Reads `RawRecord`s from a headered CSV stream.
///
/// Columns are matched by header name (`id`, `value`, `timestamp`), in any order. Extra
/// columns are ignored, and missing columns, empty cells and short rows all read as
/// absent fields, leaving it to validation to reject them.
pub struct CsvRecords<R> {
    records: csv::DeserializeRecordsIntoIter<R, RawRecord>,
}

impl CsvRecords<File> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|error| SourceError::Open {
            path: path.display().to_string(),
            error,
        })?;
        info!("Reading records from {}", path.display());
        Ok(Self::from_reader(file))
    }
}

impl<R: Read> CsvRecords<R> {
    pub fn from_reader(reader: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        Self {
            records: reader.into_deserialize(),
        }
    }
}

impl<R: Read> Iterator for CsvRecords<R> {
    type Item = Result<RawRecord, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.records
            .next()
            .map(|record| record.map_err(SourceError::from))
    }
}

/// Open a CSV file as a batch source.
pub fn csv_batches(
    path: impl AsRef<Path>,
    batch_size: NonZeroUsize,
) -> Result<Batcher<CsvRecords<File>>, SourceError> {
    Ok(Batcher::new(CsvRecords::open(path)?, batch_size))
}
