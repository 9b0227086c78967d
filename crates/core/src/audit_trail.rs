use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::query_spec::Operation;
use crate::settings::{config_dir, ConfigError};

const AUDIT_FILE: &str = "audit.ndjson";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Aborted,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

/// One reviewed request. Bound values are recorded only as a count.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditRecord {
    pub timestamp_unix_ms: u128,
    pub connection: Option<String>,
    pub operation: Operation,
    pub outcome: AuditOutcome,
    pub sql: String,
    pub bound_params: usize,
    pub rows: Option<u64>,
    pub elapsed_ms: Option<u128>,
    pub error: Option<String>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(operation: Operation, sql: impl Into<String>, outcome: AuditOutcome) -> Self {
        Self {
            timestamp_unix_ms: unix_timestamp_millis(),
            connection: None,
            operation,
            outcome,
            sql: sql.into(),
            bound_params: 0,
            rows: None,
            elapsed_ms: None,
            error: None,
        }
    }
}

#[must_use]
pub fn unix_timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

#[derive(Debug, Error)]
pub enum AuditTrailError {
    #[error("failed to resolve default config path: {0}")]
    Config(#[from] ConfigError),
    #[error("invalid audit trail path `{0}`")]
    InvalidPath(PathBuf),
    #[error("failed to create audit trail directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize audit record: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to append audit record at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FileAuditTrail {
    path: PathBuf,
}

impl FileAuditTrail {
    pub fn load_default() -> Result<Self, AuditTrailError> {
        Ok(Self {
            path: config_dir()?.join(AUDIT_FILE),
        })
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, record: &AuditRecord) -> Result<(), AuditTrailError> {
        let parent_dir = self
            .path
            .parent()
            .ok_or_else(|| AuditTrailError::InvalidPath(self.path.clone()))?;
        fs::create_dir_all(parent_dir).map_err(|source| AuditTrailError::CreateDir {
            path: parent_dir.to_path_buf(),
            source,
        })?;

        let rendered = serde_json::to_string(record)
            .map_err(|source| AuditTrailError::Serialize { source })?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| AuditTrailError::Write {
                path: self.path.clone(),
                source,
            })?;
        writeln!(file, "{rendered}").map_err(|source| AuditTrailError::Write {
            path: self.path.clone(),
            source,
        })
    }
}
