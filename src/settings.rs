// Uploader settings and saved credentials
// Persistent JSON storage under the user config directory

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::providers::DropboxConfig;
use crate::upload::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, SMALL_FILE_THRESHOLD};

const CONFIG_DIR_NAME: &str = "dropbox-uploader";
const SETTINGS_FILE: &str = "settings.json";
const CREDENTIALS_FILE: &str = "credentials.json";

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

/// Upload settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    /// Largest file accepted for upload, in MB
    pub max_file_size_mb: u64,
    /// Comma-separated extensions (".pdf, .png") or "*" for any
    pub allowed_extensions: String,
    /// Upload session chunk size in bytes
    pub chunk_size: u64,
    /// Files at or above this size use an upload session
    pub small_file_threshold: u64,
    pub create_folders_if_not_exist: bool,
    pub overwrite_existing: bool,
    /// Persist credentials after a successful connect
    pub save_credentials: bool,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_file_size_mb: 500,
            allowed_extensions: "*".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            small_file_threshold: SMALL_FILE_THRESHOLD,
            create_folders_if_not_exist: true,
            overwrite_existing: true,
            save_credentials: false,
        }
    }
}

/// Directory holding settings and credentials
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
        .join(CONFIG_DIR_NAME)
}

/// Get the path to the settings file
pub fn settings_path() -> PathBuf {
    config_dir().join(SETTINGS_FILE)
}

pub fn credentials_path() -> PathBuf {
    config_dir().join(CREDENTIALS_FILE)
}

/// Load settings from disk, falling back to defaults when the file is missing
/// or unreadable
pub fn load_settings() -> UploadSettings {
    let path = settings_path();
    if !path.exists() {
        return UploadSettings::default();
    }

    match load_settings_from(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!("Failed to load settings from {:?}: {}", path, e);
            UploadSettings::default()
        }
    }
}

pub fn load_settings_from(path: &Path) -> Result<UploadSettings, SettingsError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Save settings to disk
pub fn save_settings(settings: &UploadSettings) -> Result<(), SettingsError> {
    save_settings_to(settings, &settings_path())
}

pub fn save_settings_to(settings: &UploadSettings, path: &Path) -> Result<(), SettingsError> {
    validate_settings(settings)?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, serde_json::to_string_pretty(settings)?)?;

    tracing::info!("Settings saved to {:?}", path);
    Ok(())
}

/// Reject settings the uploader cannot work with
pub fn validate_settings(settings: &UploadSettings) -> Result<(), SettingsError> {
    if settings.chunk_size == 0 {
        return Err(SettingsError::Invalid("chunk_size must be greater than zero".to_string()));
    }
    if settings.chunk_size > MAX_CHUNK_SIZE {
        return Err(SettingsError::Invalid(format!(
            "chunk_size must not exceed {} bytes",
            MAX_CHUNK_SIZE
        )));
    }
    if settings.small_file_threshold == 0 {
        return Err(SettingsError::Invalid(
            "small_file_threshold must be greater than zero".to_string(),
        ));
    }
    if settings.max_file_size_mb == 0 {
        return Err(SettingsError::Invalid(
            "max_file_size_mb must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

/// Set owner-only permissions on a file holding secrets
pub fn ensure_secure_permissions(path: &Path) -> Result<(), SettingsError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = if path.is_dir() { 0o700 } else { 0o600 };
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// On-disk form of the credentials
#[derive(Serialize, Deserialize)]
struct StoredCredentials {
    app_key: String,
    app_secret: String,
    refresh_token: String,
}

/// Dropbox app credentials and refresh token
#[derive(Debug, Clone)]
pub struct DropboxCredentials {
    pub app_key: String,
    pub app_secret: SecretString,
    pub refresh_token: SecretString,
}

impl DropboxCredentials {
    pub fn new(app_key: &str, app_secret: &str, refresh_token: &str) -> Self {
        Self {
            app_key: app_key.trim().to_string(),
            app_secret: SecretString::from(app_secret.trim().to_string()),
            refresh_token: SecretString::from(refresh_token.trim().to_string()),
        }
    }

    /// All three values present
    pub fn is_complete(&self) -> bool {
        !self.app_key.is_empty()
            && !self.app_secret.expose_secret().is_empty()
            && !self.refresh_token.expose_secret().is_empty()
    }

    pub fn to_config(&self) -> DropboxConfig {
        DropboxConfig {
            app_key: self.app_key.clone(),
            app_secret: self.app_secret.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        let stored: StoredCredentials = serde_json::from_str(&fs::read_to_string(path)?)?;
        Ok(Self::new(&stored.app_key, &stored.app_secret, &stored.refresh_token))
    }

    /// Write credentials as JSON readable by the owner only
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
            ensure_secure_permissions(parent)?;
        }

        let stored = StoredCredentials {
            app_key: self.app_key.clone(),
            app_secret: self.app_secret.expose_secret().to_string(),
            refresh_token: self.refresh_token.expose_secret().to_string(),
        };
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;
        ensure_secure_permissions(path)?;

        tracing::info!("Credentials saved to {:?}", path);
        Ok(())
    }

    /// Remove saved credentials; a missing file is not an error
    pub fn delete_at(path: &Path) -> Result<(), SettingsError> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = UploadSettings::default();
        assert_eq!(settings.max_file_size_mb, 500);
        assert_eq!(settings.allowed_extensions, "*");
        assert_eq!(settings.chunk_size, 4 * 1024 * 1024);
        assert!(settings.create_folders_if_not_exist);
        assert!(settings.overwrite_existing);
        assert!(!settings.save_credentials);
        assert!(validate_settings(&settings).is_ok());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let settings: UploadSettings = serde_json::from_str(r#"{"overwrite_existing": false}"#).unwrap();
        assert!(!settings.overwrite_existing);
        assert_eq!(settings.max_file_size_mb, 500);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = UploadSettings {
            max_file_size_mb: 10,
            allowed_extensions: ".pdf, .png".to_string(),
            ..UploadSettings::default()
        };

        save_settings_to(&settings, &path).unwrap();
        assert_eq!(load_settings_from(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let zero_chunk = UploadSettings { chunk_size: 0, ..UploadSettings::default() };
        assert!(matches!(save_settings_to(&zero_chunk, &path), Err(SettingsError::Invalid(_))));
        assert!(!path.exists());

        let huge_chunk = UploadSettings { chunk_size: MAX_CHUNK_SIZE + 1, ..UploadSettings::default() };
        assert!(validate_settings(&huge_chunk).is_err());

        let zero_limit = UploadSettings { max_file_size_mb: 0, ..UploadSettings::default() };
        assert!(validate_settings(&zero_limit).is_err());
    }

    #[test]
    fn test_corrupt_settings_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings_from(&path), Err(SettingsError::Parse(_))));
    }

    #[test]
    fn test_credentials_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        let creds = DropboxCredentials::new(" key ", "secret", "refresh");
        assert!(creds.is_complete());

        creds.save_to(&path).unwrap();
        let loaded = DropboxCredentials::load_from(&path).unwrap();
        assert_eq!(loaded.app_key, "key");
        assert_eq!(loaded.refresh_token.expose_secret(), "refresh");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        DropboxCredentials::delete_at(&path).unwrap();
        assert!(!path.exists());
        DropboxCredentials::delete_at(&path).unwrap();
    }

    #[test]
    fn test_incomplete_credentials() {
        assert!(!DropboxCredentials::new("key", "", "refresh").is_complete());
        assert!(!DropboxCredentials::new("key", "secret", "  ").is_complete());
    }
}
