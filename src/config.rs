use crate::batch::DEFAULT_BATCH_SIZE;
use crate::db::{MAX_BOUND_PARAMS, PARAMS_PER_ROW};
use crate::ingest::UnitOptions;
use crate::orchestrator::{RunOptions, DEFAULT_MAX_PARALLEL_FILES};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest batch that still fits in one statement's bound parameters.
pub const MAX_BATCH_SIZE: usize = MAX_BOUND_PARAMS / PARAMS_PER_ROW;

/// Upper bound on concurrently processed files.
pub const MAX_PARALLEL_FILES: usize = 1024;

/// Top-level configuration loaded from ingest.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct IngestConfig {
    pub input: InputConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Directory walked recursively for log files.
    pub path: PathBuf,
    pub batch_size: usize,
    pub max_parallel_files: usize,
    /// Remove each file once all of its rows are stored.
    pub delete_processed: bool,
}

/// Where rows are stored.
///
/// The store is a local SQLite file, so the only connection setting is its
/// path. Host, port, username and password have nothing to connect to; if
/// `DB_HOST`, `DB_PORT`, `DB_USERNAME` or `DB_PASSWORD` are set they are
/// reported by [`ignored_connection_vars`] and otherwise left alone.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file; created if missing.
    pub database: PathBuf,
    pub busy_timeout_secs: u64,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("input/"),
            batch_size: DEFAULT_BATCH_SIZE,
            max_parallel_files: DEFAULT_MAX_PARALLEL_FILES,
            delete_processed: false,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("metrics.db"),
            busy_timeout_secs: 30,
        }
    }
}

/// Values from flags or environment that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub input_path: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub max_parallel_files: Option<usize>,
    /// Only ever switches deletion on.
    pub delete_processed: bool,
    pub database: Option<PathBuf>,
    pub busy_timeout_secs: Option<u64>,
}

#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    Invalid {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid { field, reason } => write!(f, "invalid {field}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl IngestConfig {
    /// Load the config file, falling back to defaults when it doesn't exist.
    ///
    /// A file that exists but can't be read or parsed is an error rather
    /// than a silent fallback.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(path, &contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn apply(&mut self, o: Overrides) {
        if let Some(path) = o.input_path {
            self.input.path = path;
        }
        if let Some(n) = o.batch_size {
            self.input.batch_size = n;
        }
        if let Some(n) = o.max_parallel_files {
            self.input.max_parallel_files = n;
        }
        if o.delete_processed {
            self.input.delete_processed = true;
        }
        if let Some(db) = o.database {
            self.storage.database = db;
        }
        if let Some(secs) = o.busy_timeout_secs {
            self.storage.busy_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input.path.as_os_str().is_empty() {
            return Err(invalid("input.path", "must not be empty"));
        }
        if !(1..=MAX_BATCH_SIZE).contains(&self.input.batch_size) {
            return Err(invalid(
                "input.batch_size",
                format!(
                    "{} is outside 1..={MAX_BATCH_SIZE}",
                    self.input.batch_size
                ),
            ));
        }
        if !(1..=MAX_PARALLEL_FILES).contains(&self.input.max_parallel_files) {
            return Err(invalid(
                "input.max_parallel_files",
                format!(
                    "{} is outside 1..={MAX_PARALLEL_FILES}",
                    self.input.max_parallel_files
                ),
            ));
        }
        if self.storage.database.as_os_str().is_empty() {
            return Err(invalid("storage.database", "must not be empty"));
        }
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.storage.busy_timeout_secs)
    }

    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            input_dir: self.input.path.clone(),
            max_parallel_files: self.input.max_parallel_files,
            unit: UnitOptions {
                batch_size: self.input.batch_size,
                delete_processed: self.input.delete_processed,
            },
        }
    }
}

/// Server connection variables with no SQLite counterpart.
pub const SERVER_CONNECTION_VARS: [&str; 4] = ["DB_HOST", "DB_PORT", "DB_USERNAME", "DB_PASSWORD"];

/// Names of the server connection variables that are set, so the caller can
/// say they have no effect.
pub fn ignored_connection_vars(lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
    SERVER_CONNECTION_VARS
        .into_iter()
        .filter(|var| lookup(*var).is_some())
        .collect()
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
