use crate::db::{MetricsSink, StorageError};
use crate::record::MetricRecord;

/// Default number of records per insert statement.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Groups records into fixed-size batches and hands each full batch to the
/// sink synchronously.
///
/// Batches are flushed in the order records were pushed. A failed flush is
/// returned to the caller as-is; nothing is retried or merged.
pub struct Batcher<'a> {
    sink: &'a dyn MetricsSink,
    batch_size: usize,
    pending: Vec<MetricRecord>,
    flushed: usize,
    batches: usize,
}

impl<'a> Batcher<'a> {
    /// `batch_size` is clamped to at least 1.
    pub fn new(sink: &'a dyn MetricsSink, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            sink,
            batch_size,
            pending: Vec::with_capacity(batch_size),
            flushed: 0,
            batches: 0,
        }
    }

    pub fn push(&mut self, record: MetricRecord) -> Result<(), StorageError> {
        self.pending.push(record);
        if self.pending.len() >= self.batch_size {
            self.flush()?;
        }
        Ok(())
    }

    /// Flush the remainder and return the total number of records written.
    pub fn finish(&mut self) -> Result<usize, StorageError> {
        if !self.pending.is_empty() {
            self.flush()?;
        }
        Ok(self.flushed)
    }

    /// Records written so far; survives a failed flush for reporting.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    fn flush(&mut self) -> Result<(), StorageError> {
        let batch = std::mem::replace(&mut self.pending, Vec::with_capacity(self.batch_size));
        self.sink.insert_batch(&batch)?;
        self.flushed += batch.len();
        self.batches += 1;
        tracing::debug!(
            rows = batch.len(),
            batch = self.batches,
            total = self.flushed,
            "inserted batch"
        );
        Ok(())
    }
}
