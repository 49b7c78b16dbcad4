/// One unit of work: parse a stats log, insert its records in batches, and
/// optionally remove the file once everything is stored.
use crate::batch::Batcher;
use crate::db::{MetricsSink, StorageError};
use crate::parser::{self, ParseError};
use crate::record::MetricRecord;
use std::path::Path;
use std::time::Instant;

/// Per-file settings shared by every unit of a run.
#[derive(Debug, Clone, Copy)]
pub struct UnitOptions {
    pub batch_size: usize,
    pub delete_processed: bool,
}

/// Outcome of a successfully ingested file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub rows: usize,
    pub deleted: bool,
}

/// Ingest a single log file into the sink.
///
/// Records stream straight from the parser into the batcher, so at most one
/// batch is held in memory. On failure, batches flushed before the error
/// stay in the store; the file is never deleted.
pub fn process_file(
    path: &Path,
    sink: &dyn MetricsSink,
    options: &UnitOptions,
) -> Result<FileOutcome, IngestError> {
    let start = Instant::now();
    tracing::info!(file = %path.display(), "started processing");

    let records = parser::open(path)?;
    let mut batcher = Batcher::new(sink, options.batch_size);

    let rows = match drain(records, &mut batcher) {
        Ok(rows) => rows,
        Err(e) => {
            if batcher.flushed() > 0 {
                tracing::warn!(
                    file = %path.display(),
                    committed_rows = batcher.flushed(),
                    "rows from earlier batches stay stored"
                );
            }
            return Err(e);
        }
    };

    tracing::info!(
        file = %path.display(),
        rows,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "finished processing"
    );

    let deleted = options.delete_processed && remove_processed(path);
    Ok(FileOutcome { rows, deleted })
}

fn drain<I>(records: I, batcher: &mut Batcher<'_>) -> Result<usize, IngestError>
where
    I: Iterator<Item = Result<MetricRecord, ParseError>>,
{
    for record in records {
        batcher.push(record?)?;
    }
    Ok(batcher.finish()?)
}

/// Remove an ingested file. Failures are logged and reported as `false`.
fn remove_processed(path: &Path) -> bool {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::info!(file = %path.display(), "deleted processed file");
            true
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                file = %path.display(),
                "failed to delete processed file"
            );
            false
        }
    }
}

#[derive(Debug)]
pub enum IngestError {
    Parse(ParseError),
    Storage(StorageError),
}

impl From<ParseError> for IngestError {
    fn from(e: ParseError) -> Self {
        IngestError::Parse(e)
    }
}

impl From<StorageError> for IngestError {
    fn from(e: StorageError) -> Self {
        IngestError::Storage(e)
    }
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Parse(e) => write!(f, "parse error: {e}"),
            IngestError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for IngestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IngestError::Parse(e) => Some(e),
            IngestError::Storage(e) => Some(e),
        }
    }
}
