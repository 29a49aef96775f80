use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "fieldsim.log";

static INSTALLED: Mutex<bool> = Mutex::new(false);

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to install log subscriber: {0}")]
    Install(String),
}

pub fn log_path(root: &Path) -> PathBuf {
    root.join("log").join(LOG_FILE)
}

/// Routes `tracing` output to `<root>/log/fieldsim.log`. `RUST_LOG` takes
/// precedence over `level`. Later calls are no-ops.
pub fn init(root: &Path, level: &str) -> Result<(), LoggingError> {
    let mut installed = INSTALLED.lock().unwrap_or_else(PoisonError::into_inner);
    if *installed {
        return Ok(());
    }

    let path = log_path(root);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(|source| LoggingError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::Open {
            path: path.clone(),
            source,
        })?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .compact()
        .try_init()
        .map_err(|err| LoggingError::Install(err.to_string()))?;
    *installed = true;
    Ok(())
}
