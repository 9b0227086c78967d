use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::connection::ConnectionParams;
use crate::settings::{config_dir, write_config_file, ConfigError};

pub const DEFAULT_CONNECTION_FILE: &str = "default_connection.toml";
pub const LEGACY_CONNECTION_FILE: &str = "default_connection.txt";
pub const PASSWORD_ENV: &str = "SQLFORM_DB_PASSWORD";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    #[default]
    Mysql,
    Sqlite,
}

impl DriverKind {
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Mysql => "MySQL",
            Self::Sqlite => "SQLite",
        }
    }

    #[must_use]
    pub fn toggled(self) -> Self {
        match self {
            Self::Mysql => Self::Sqlite,
            Self::Sqlite => Self::Mysql,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PasswordSource {
    #[default]
    Keyring,
    EnvVar,
}

/// Saved connection profile. Never holds the password itself.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultConnection {
    #[serde(default)]
    pub driver: DriverKind,
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub password_source: PasswordSource,
    #[serde(default)]
    pub keyring_service: Option<String>,
    #[serde(default)]
    pub keyring_account: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

impl DefaultConnection {
    #[must_use]
    pub fn mysql(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            driver: DriverKind::Mysql,
            host: host.into(),
            port: DEFAULT_MYSQL_PORT,
            database: None,
            user: user.into(),
            path: None,
            password_source: PasswordSource::Keyring,
            keyring_service: None,
            keyring_account: None,
        }
    }

    #[must_use]
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            driver: DriverKind::Sqlite,
            path: Some(path.into()),
            ..Self::mysql("", "")
        }
    }

    /// Keyring entry name: `<user>@<host>:<port>` unless overridden.
    #[must_use]
    pub fn keyring_account(&self) -> String {
        self.keyring_account
            .clone()
            .unwrap_or_else(|| format!("{}@{}:{}", self.user.trim(), self.host.trim(), self.port))
    }

    #[must_use]
    pub fn keyring_service(&self) -> &str {
        self.keyring_service.as_deref().unwrap_or("sqlform")
    }

    pub fn to_params(&self, password: Option<String>) -> Result<ConnectionParams, ProfileError> {
        match self.driver {
            DriverKind::Mysql => {
                if self.host.trim().is_empty() {
                    return Err(ProfileError::MissingField("host"));
                }
                if self.user.trim().is_empty() {
                    return Err(ProfileError::MissingField("user"));
                }
                Ok(ConnectionParams::Network {
                    host: self.host.trim().to_string(),
                    port: self.port,
                    database: self
                        .database
                        .as_deref()
                        .map(str::trim)
                        .filter(|database| !database.is_empty())
                        .map(str::to_string),
                    user: self.user.trim().to_string(),
                    password,
                })
            }
            DriverKind::Sqlite => {
                let path = self
                    .path
                    .as_ref()
                    .filter(|path| !path.as_os_str().is_empty())
                    .ok_or(ProfileError::MissingField("path"))?;
                Ok(ConnectionParams::Embedded { path: path.clone() })
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("connection profile is missing `{0}`")]
    MissingField(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("legacy connection file at {path} is malformed: {reason}")]
    LegacyFormat { path: PathBuf, reason: &'static str },
}

#[derive(Debug, Clone)]
pub struct DefaultConnectionStore {
    path: PathBuf,
}

impl DefaultConnectionStore {
    pub fn load_default() -> Result<Self, ConfigError> {
        Ok(Self::from_path(config_dir()?.join(DEFAULT_CONNECTION_FILE)))
    }

    #[must_use]
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when nothing was saved yet.
    pub fn load(&self) -> Result<Option<DefaultConnection>, ConfigError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path).map_err(|source| ConfigError::Read {
            path: self.path.clone(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(None);
        }

        toml::from_str(&raw)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: self.path.clone(),
                source,
            })
    }

    pub fn save(&self, profile: &DefaultConnection) -> Result<(), ConfigError> {
        let rendered =
            toml::to_string_pretty(profile).map_err(|source| ConfigError::Serialize { source })?;
        write_config_file(&self.path, &rendered)
    }
}

/// Contents of the old four-line plaintext file: server, database, user,
/// password.
#[derive(Clone, PartialEq, Eq)]
pub struct LegacyConnection {
    pub profile: DefaultConnection,
    pub password: String,
}

impl std::fmt::Debug for LegacyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyConnection")
            .field("profile", &self.profile)
            .field("password", &"<redacted>")
            .finish()
    }
}

pub fn read_legacy_connection(path: &Path) -> Result<Option<LegacyConnection>, ProfileError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_legacy_connection(&raw)
        .map(Some)
        .map_err(|reason| ProfileError::LegacyFormat {
            path: path.to_path_buf(),
            reason,
        })
}

fn parse_legacy_connection(raw: &str) -> Result<LegacyConnection, &'static str> {
    let mut lines: Vec<&str> = raw
        .split('\n')
        .map(|line| line.trim_end_matches('\r'))
        .collect();
    if lines.len() == 5 && lines[4].is_empty() {
        lines.pop();
    }
    let [server, database, user, password] = lines.as_slice() else {
        return Err("expected exactly four lines");
    };

    let server = server.trim();
    if server.is_empty() {
        return Err("server line is empty");
    }
    let (host, port) = match server.rsplit_once([':', ',']) {
        Some((host, port)) => (
            host,
            port.trim().parse().map_err(|_| "server port is not a number")?,
        ),
        None => (server, DEFAULT_MYSQL_PORT),
    };

    let mut profile = DefaultConnection::mysql(host.trim(), user.trim());
    profile.port = port;
    let database = database.trim();
    if !database.is_empty() {
        profile.database = Some(database.to_string());
    }

    Ok(LegacyConnection {
        profile,
        password: (*password).to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::{
        parse_legacy_connection, read_legacy_connection, DefaultConnection,
        DefaultConnectionStore, DriverKind, PasswordSource, ProfileError,
    };
    use crate::connection::ConnectionParams;

    #[test]
    fn missing_file_loads_nothing() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));
        assert_eq!(store.load().expect("load"), None);
    }

    #[test]
    fn save_and_reload_without_password() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));
        let mut profile = DefaultConnection::mysql("db.local", "report");
        profile.database = Some("sales".to_string());
        profile.password_source = PasswordSource::EnvVar;

        store.save(&profile).expect("failed to save profile");
        assert_eq!(store.load().expect("reload"), Some(profile));

        let raw = std::fs::read_to_string(store.path()).expect("read saved file");
        assert!(!raw.contains("password ="));
    }

    #[test]
    fn mysql_profile_builds_network_params() {
        let mut profile = DefaultConnection::mysql(" db.local ", "report");
        profile.database = Some("  ".to_string());
        let params = profile
            .to_params(Some("secret".to_string()))
            .expect("params");
        assert_eq!(
            params,
            ConnectionParams::Network {
                host: "db.local".to_string(),
                port: 3306,
                database: None,
                user: "report".to_string(),
                password: Some("secret".to_string()),
            }
        );
        assert_eq!(profile.keyring_account(), "report@db.local:3306");
    }

    #[test]
    fn sqlite_profile_requires_a_path() {
        let profile = DefaultConnection::sqlite("/tmp/app.db");
        assert_eq!(
            profile.to_params(None).expect("params"),
            ConnectionParams::Embedded {
                path: PathBuf::from("/tmp/app.db")
            }
        );

        let mut missing = profile;
        missing.path = None;
        assert!(matches!(
            missing.to_params(None),
            Err(ProfileError::MissingField("path"))
        ));
    }

    #[test]
    fn legacy_file_is_parsed() {
        let legacy = parse_legacy_connection("db.local,3307\nsales\nreport\nhunter2\n")
            .expect("legacy file should parse");
        assert_eq!(legacy.profile.driver, DriverKind::Mysql);
        assert_eq!(legacy.profile.host, "db.local");
        assert_eq!(legacy.profile.port, 3307);
        assert_eq!(legacy.profile.database.as_deref(), Some("sales"));
        assert_eq!(legacy.profile.user, "report");
        assert_eq!(legacy.password, "hunter2");
        assert!(!format!("{legacy:?}").contains("hunter2"));
    }

    #[test]
    fn legacy_file_with_wrong_shape_is_rejected() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let path = temp_dir.path().join("default_connection.txt");
        std::fs::write(&path, "only-a-host\n").expect("write legacy file");

        let err = read_legacy_connection(&path).expect_err("should reject");
        assert!(matches!(err, ProfileError::LegacyFormat { .. }));
        assert!(read_legacy_connection(&temp_dir.path().join("absent.txt"))
            .expect("absent file is fine")
            .is_none());
    }
}
