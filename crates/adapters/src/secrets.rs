use std::fs;
use std::path::{Path, PathBuf};

use sqlform_core::connection_profile::{
    read_legacy_connection, DefaultConnection, DefaultConnectionStore, PasswordSource,
    ProfileError, PASSWORD_ENV,
};
use sqlform_core::settings::ConfigError;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("OS keyring is not available on this platform")]
    KeyringUnavailable,
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error(transparent)]
    Profile(#[from] ProfileError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to remove imported legacy file at {path}: {source}")]
    RemoveLegacy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Password for `profile`, from the keyring or `SQLFORM_DB_PASSWORD`.
///
/// With the keyring source, a password found only in the environment is
/// copied into the keyring for next time.
#[must_use]
pub fn resolve_password(profile: &DefaultConnection) -> Option<String> {
    let env_password = std::env::var(PASSWORD_ENV)
        .ok()
        .filter(|password| !password.is_empty());

    match profile.password_source {
        PasswordSource::EnvVar => env_password,
        PasswordSource::Keyring => {
            if let Some(password) = load_keyring_password(profile) {
                return Some(password);
            }

            if let Some(password) = env_password {
                if let Err(error) = store_password(profile, &password) {
                    warn!(%error, "could not copy password into the keyring");
                }
                return Some(password);
            }

            None
        }
    }
}

/// Moves a legacy plaintext `default_connection.txt` into the TOML profile
/// store and the keyring, then deletes the plaintext file.
///
/// A profile already saved in the store wins: the legacy file is deleted
/// without touching the store or the keyring, and `None` is returned.
pub fn import_legacy_connection(
    legacy_path: &Path,
    store: &DefaultConnectionStore,
) -> Result<Option<DefaultConnection>, SecretError> {
    let Some(legacy) = read_legacy_connection(legacy_path)? else {
        return Ok(None);
    };

    if store.load()?.is_some() {
        remove_legacy(legacy_path)?;
        warn!(
            path = %legacy_path.display(),
            kept = %store.path().display(),
            "discarded legacy default connection; a saved profile already exists"
        );
        return Ok(None);
    }

    if !legacy.password.is_empty() {
        store_password(&legacy.profile, &legacy.password)?;
    }
    store.save(&legacy.profile)?;
    remove_legacy(legacy_path)?;

    info!(
        from = %legacy_path.display(),
        to = %store.path().display(),
        "imported legacy default connection"
    );
    Ok(Some(legacy.profile))
}

fn remove_legacy(legacy_path: &Path) -> Result<(), SecretError> {
    fs::remove_file(legacy_path).map_err(|source| SecretError::RemoveLegacy {
        path: legacy_path.to_path_buf(),
        source,
    })
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
pub fn store_password(profile: &DefaultConnection, password: &str) -> Result<(), SecretError> {
    keyring_entry(profile)?
        .set_password(password)
        .map_err(|error| SecretError::Keyring(error.to_string()))
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
pub fn store_password(_profile: &DefaultConnection, _password: &str) -> Result<(), SecretError> {
    Err(SecretError::KeyringUnavailable)
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn load_keyring_password(profile: &DefaultConnection) -> Option<String> {
    let entry = keyring_entry(profile).ok()?;
    match entry.get_password() {
        Ok(password) => Some(password).filter(|password| !password.is_empty()),
        Err(keyring::Error::NoEntry) => None,
        Err(error) => {
            warn!(%error, "failed to read password from keyring");
            None
        }
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
fn load_keyring_password(_profile: &DefaultConnection) -> Option<String> {
    None
}

#[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
fn keyring_entry(profile: &DefaultConnection) -> Result<keyring::Entry, SecretError> {
    keyring::Entry::new(profile.keyring_service(), &profile.keyring_account())
        .map_err(|error| SecretError::Keyring(error.to_string()))
}

#[cfg(test)]
mod tests {
    use sqlform_core::connection_profile::{
        DefaultConnection, DefaultConnectionStore, PasswordSource,
    };
    use tempfile::TempDir;

    use super::{import_legacy_connection, resolve_password, SecretError};

    #[test]
    fn missing_legacy_file_imports_nothing() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));

        let imported = import_legacy_connection(&temp_dir.path().join("default_connection.txt"), &store)
            .expect("absent legacy file is not an error");
        assert!(imported.is_none());
        assert!(!store.path().exists());
    }

    #[test]
    fn legacy_file_without_password_is_imported_and_removed() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let legacy_path = temp_dir.path().join("default_connection.txt");
        std::fs::write(&legacy_path, "db.local\nsales\nreport\n\n").expect("write legacy file");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));

        let imported = import_legacy_connection(&legacy_path, &store)
            .expect("legacy import should succeed")
            .expect("legacy profile should be returned");

        assert_eq!(imported.host, "db.local");
        assert_eq!(imported.database.as_deref(), Some("sales"));
        assert_eq!(store.load().expect("reload"), Some(imported));
        assert!(!legacy_path.exists());
    }

    #[test]
    fn saved_profile_is_not_replaced_by_a_legacy_file() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let legacy_path = temp_dir.path().join("default_connection.txt");
        std::fs::write(&legacy_path, "old.host
legacy
root
hunter2
").expect("write legacy file");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));
        let mut saved = DefaultConnection::mysql("db.current", "report");
        saved.database = Some("sales".to_string());
        store.save(&saved).expect("save current profile");

        let imported = import_legacy_connection(&legacy_path, &store)
            .expect("stale legacy file should be discarded");

        assert!(imported.is_none());
        assert_eq!(store.load().expect("reload"), Some(saved));
        assert!(!legacy_path.exists());
    }

    #[test]
    fn malformed_legacy_file_is_left_in_place() {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let legacy_path = temp_dir.path().join("default_connection.txt");
        std::fs::write(&legacy_path, "db.local\nsales\n").expect("write legacy file");
        let store = DefaultConnectionStore::from_path(temp_dir.path().join("default_connection.toml"));

        let result = import_legacy_connection(&legacy_path, &store);
        assert!(matches!(result, Err(SecretError::Profile(_))));
        assert!(legacy_path.exists());
        assert!(!store.path().exists());
    }

    #[test]
    fn env_source_reads_only_the_environment() {
        let mut profile = DefaultConnection::mysql("db.local", "report");
        profile.password_source = PasswordSource::EnvVar;
        // The variable is unset in the test environment unless a developer exported it.
        let expected = std::env::var("SQLFORM_DB_PASSWORD")
            .ok()
            .filter(|password| !password.is_empty());
        assert_eq!(resolve_password(&profile), expected);
    }
}
