/// Directory-level driver: discover log files and run one bounded unit of
/// work per file.
///
/// Admission goes through a counting semaphore. A permit is acquired before
/// a unit is spawned and released when the unit (including the optional
/// delete) is done, so no more than `max_parallel_files` units ever run at
/// once. Units are blocking code and run on tokio's blocking pool.
use crate::db::MetricsSink;
use crate::ingest::{self, FileOutcome, IngestError, UnitOptions};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// Default cap on concurrently processed files, in line with typical
/// database connection pool sizes.
pub const DEFAULT_MAX_PARALLEL_FILES: usize = 10;

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input_dir: PathBuf,
    pub max_parallel_files: usize,
    pub unit: UnitOptions,
}

/// Live counters shared with the units, readable while a run is in flight.
#[derive(Debug, Default)]
pub struct Progress {
    files_succeeded: AtomicUsize,
    files_failed: AtomicUsize,
    rows_inserted: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub rows_inserted: usize,
    pub active: usize,
    pub peak_active: usize,
}

impl Progress {
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            files_succeeded: self.files_succeeded.load(Ordering::SeqCst),
            files_failed: self.files_failed.load(Ordering::SeqCst),
            rows_inserted: self.rows_inserted.load(Ordering::SeqCst),
            active: self.active.load(Ordering::SeqCst),
            peak_active: self.peak_active.load(Ordering::SeqCst),
        }
    }

    fn enter(&self) -> ActiveUnit<'_> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
        ActiveUnit(self)
    }

    fn record(&self, result: &Result<FileOutcome, IngestError>) {
        match result {
            Ok(outcome) => {
                self.files_succeeded.fetch_add(1, Ordering::SeqCst);
                self.rows_inserted.fetch_add(outcome.rows, Ordering::SeqCst);
            }
            Err(_) => {
                self.files_failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Marks a unit as running until dropped.
struct ActiveUnit<'a>(&'a Progress);

impl Drop for ActiveUnit<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Result of a complete run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub discovered: usize,
    /// Rows inserted per successfully processed file.
    pub results: BTreeMap<PathBuf, usize>,
    pub failures: Vec<(PathBuf, IngestError)>,
    pub deleted: Vec<PathBuf>,
    /// Units that panicked instead of returning.
    pub crashed: usize,
    pub peak_active: usize,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_rows(&self) -> usize {
        self.results.values().sum()
    }

    pub fn log(&self) {
        tracing::info!(
            files = self.discovered,
            succeeded = self.results.len(),
            failed = self.failures.len() + self.crashed,
            deleted = self.deleted.len(),
            rows = self.total_rows(),
            peak_parallel = self.peak_active,
            elapsed_ms = self.elapsed.as_millis() as u64,
            "ingestion complete"
        );
    }
}

pub struct Orchestrator {
    sink: Arc<dyn MetricsSink>,
    options: RunOptions,
    progress: Arc<Progress>,
}

impl Orchestrator {
    pub fn new(sink: Arc<dyn MetricsSink>, options: RunOptions) -> Self {
        Self {
            sink,
            options,
            progress: Arc::new(Progress::default()),
        }
    }

    /// Counters for reporting on an interrupted run.
    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    /// Process every file under the input directory and wait for all units.
    pub async fn run(&self) -> RunSummary {
        let start = Instant::now();
        let root = self.options.input_dir.clone();
        let files = match tokio::task::spawn_blocking(move || discover_files(&root)).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "file discovery crashed");
                Vec::new()
            }
        };
        let limit = self.options.max_parallel_files.max(1);
        tracing::info!(
            dir = %self.options.input_dir.display(),
            files = files.len(),
            max_parallel = limit,
            batch_size = self.options.unit.batch_size,
            "discovered log files"
        );

        let mut summary = RunSummary {
            discovered: files.len(),
            ..Default::default()
        };

        let gate = Arc::new(Semaphore::new(limit));
        let mut units = JoinSet::new();

        for path in files {
            // Waits here while `limit` units are running.
            let Ok(permit) = Arc::clone(&gate).acquire_owned().await else {
                break;
            };
            let sink = Arc::clone(&self.sink);
            let progress = Arc::clone(&self.progress);
            let unit = self.options.unit;

            units.spawn_blocking(move || {
                let _permit = permit;
                let _active = progress.enter();
                let result = ingest::process_file(&path, sink.as_ref(), &unit);
                progress.record(&result);
                (path, result)
            });
        }

        while let Some(joined) = units.join_next().await {
            match joined {
                Ok((path, Ok(outcome))) => {
                    if outcome.deleted {
                        summary.deleted.push(path.clone());
                    }
                    summary.results.insert(path, outcome.rows);
                }
                Ok((path, Err(error))) => {
                    tracing::error!(file = %path.display(), error = %error, "failed to process file");
                    summary.failures.push((path, error));
                }
                Err(e) => {
                    tracing::error!(error = %e, "file worker crashed");
                    summary.crashed += 1;
                }
            }
        }

        summary.peak_active = self.progress.snapshot().peak_active;
        summary.elapsed = start.elapsed();
        summary
    }
}

/// Recursively list every regular file under `root`, sorted per directory.
///
/// Unreadable directories are logged and skipped. Symlinks to files are
/// included; symlinked directories are not followed.
pub fn discover_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    match std::fs::metadata(root) {
        Ok(meta) if meta.is_file() => files.push(root.to_path_buf()),
        Ok(_) => walk(root, &mut files),
        Err(e) => {
            tracing::warn!(error = %e, dir = %root.display(), "input path not readable");
        }
    }
    files
}

fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            tracing::warn!(error = %e, dir = %dir.display(), "failed to read directory");
            return;
        }
    };

    let mut children = Vec::new();
    for entry in entries {
        match entry.and_then(|e| Ok((e.path(), e.file_type()?))) {
            Ok(child) => children.push(child),
            Err(e) => {
                tracing::warn!(error = %e, dir = %dir.display(), "failed to read directory entry");
            }
        }
    }
    children.sort_by(|a, b| a.0.cmp(&b.0));

    for (path, file_type) in children {
        if file_type.is_dir() {
            walk(&path, files);
        } else if file_type.is_file() || (file_type.is_symlink() && path.is_file()) {
            files.push(path);
        }
    }
}
