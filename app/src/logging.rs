use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use sqlform_core::settings::{config_dir, ConfigError};
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "SQLFORM_LOG";
const LOG_FILE: &str = "sqlform.log";

/// `<config>/sqlform/sqlform.log`, next to the settings file.
pub fn log_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join(LOG_FILE))
}

/// Truncates the log on each start so it never grows without bound.
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    File::create(path)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Routes `tracing` output to `path`. The terminal belongs to the UI, so
/// nothing is written to stderr once this succeeds.
pub fn init_file_logging(path: &Path) -> io::Result<()> {
    let file = open_log_file(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::{open_log_file, LOG_FILE};

    #[test]
    fn log_file_is_created_with_missing_parents_and_truncated() {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let path = temp_dir.path().join("nested").join(LOG_FILE);

        open_log_file(&path).expect("log file should open");
        assert!(path.exists());

        fs::write(&path, "old run").expect("seed log");
        open_log_file(&path).expect("log file should reopen");
        assert_eq!(fs::read_to_string(&path).expect("read log"), "");
    }
}
