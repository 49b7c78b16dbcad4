mod batch;
mod config;
mod db;
mod ingest;
mod orchestrator;
mod parser;
mod record;
mod signals;
mod units;

use clap::Parser;
use config::{ignored_connection_vars, IngestConfig, Overrides};
use db::SqliteSink;
use orchestrator::Orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

/// Load `docker stats` logs into SQLite: parse every file under the input
/// directory, normalize memory to MiB, and insert rows in batches with a
/// bounded number of files in flight.
#[derive(Parser, Debug)]
#[command(name = "docker-metrics-ingest", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "ingest.toml")]
    config: PathBuf,

    /// Directory of log files (overrides config)
    #[arg(long, env = "INPUT_PATH")]
    input_path: Option<PathBuf>,

    /// Records per insert statement (overrides config)
    #[arg(long, env = "BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Max files processed at once (overrides config)
    #[arg(long, env = "MAX_PARALLEL_FILES")]
    max_parallel_files: Option<usize>,

    /// Delete each file after all its rows are stored
    #[arg(long, env = "DELETE_PROCESSED")]
    delete_processed: bool,

    /// SQLite database file (overrides config)
    #[arg(long, env = "DB_DATABASE")]
    database: Option<PathBuf>,

    /// Seconds an insert may wait on a locked database (overrides config)
    #[arg(long, env = "DB_BUSY_TIMEOUT")]
    busy_timeout: Option<u64>,

    /// Validate config and print resolved settings, don't ingest
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-batch inserts)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings, errors and the final summary
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            input_path: self.input_path.clone(),
            batch_size: self.batch_size,
            max_parallel_files: self.max_parallel_files,
            delete_processed: self.delete_processed,
            database: self.database.clone(),
            busy_timeout_secs: self.busy_timeout,
        }
    }
}

#[tokio::main]
async fn main() {
    // Values from .env feed the env-backed flags, so load it before parsing.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match dotenv {
        Ok(path) => tracing::debug!(path = %path.display(), "loaded .env"),
        Err(e) if e.not_found() => {}
        Err(e) => tracing::warn!(error = %e, "failed to load .env"),
    }
    tracing::debug!(?cli, "parsed CLI arguments");

    if let Err(e) = run(&cli).await {
        tracing::error!(error = %e, "ingestion aborted");
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let start = Instant::now();

    let mut config = IngestConfig::load(&cli.config)?;
    config.apply(cli.overrides());
    config.validate()?;
    for var in ignored_connection_vars(|k| std::env::var(k).ok()) {
        tracing::warn!(var, "ignored, the store is a SQLite file (set DB_DATABASE instead)");
    }

    if cli.dry_run {
        println!("Dry run mode, config validated, not ingesting.");
        println!("{config:#?}");
        return Ok(());
    }

    let sink = Arc::new(SqliteSink::open(
        &config.storage.database,
        config.busy_timeout(),
    )?);
    tracing::info!(
        database = %config.storage.database.display(),
        input = %config.input.path.display(),
        batch_size = config.input.batch_size,
        max_parallel = config.input.max_parallel_files,
        delete_processed = config.input.delete_processed,
        "starting ingestion"
    );

    let orchestrator = Orchestrator::new(sink.clone(), config.run_options());
    let progress = orchestrator.progress();

    tokio::select! {
        summary = orchestrator.run() => {
            summary.log();
            if let Ok(stored) = sink.row_count() {
                tracing::debug!(rows = stored, "services table size");
            }
            println!(
                "Inserted {} rows from {} of {} files ({} failed, {} deleted) in {:.2?}",
                summary.total_rows(),
                summary.results.len(),
                summary.discovered,
                summary.failures.len() + summary.crashed,
                summary.deleted.len(),
                start.elapsed(),
            );
            Ok(())
        }
        signal = signals::shutdown_signal() => {
            let p = progress.snapshot();
            tracing::warn!(
                %signal,
                succeeded = p.files_succeeded,
                failed = p.files_failed,
                in_flight = p.active,
                rows = p.rows_inserted,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "interrupted, exiting without draining in-flight files"
            );
            std::process::exit(signals::INTERRUPTED_EXIT_CODE)
        }
    }
}
