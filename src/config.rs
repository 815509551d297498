//! The credential and settings file (`~/.netatmo.toml` by default).

use crate::api::transport::DEFAULT_TIMEOUT;
use crate::types::credentials::Credentials;
use crate::types::token::TokenState;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

const CONFIG_FILE_NAME: &str = ".netatmo.toml";
#[cfg(unix)]
const PRIVATE_MODE: u32 = 0o600;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to determine home directory")]
    HomeDirResolution,

    #[error("Failed to read configuration file '{0}'")]
    Read(PathBuf, #[source] io::Error),

    #[error("Failed to write configuration file '{0}'")]
    Write(PathBuf, #[source] io::Error),

    #[error("Invalid configuration file '{0}'")]
    Parse(PathBuf, #[source] toml::de::Error),

    #[error("Failed to serialize configuration")]
    Serialize(#[from] toml::ser::Error),

    #[error("Missing '{0}' in the [netatmo] section, run `netatmo config` first")]
    MissingField(&'static str),
}

/// `[netatmo]`: application and account credentials.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// MAC address of the station used by default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_station: Option<String>,
}

/// `[export]`: where and from when measurements are exported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    /// First instant exported for modules without history in the sink.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub snapshots: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT.as_secs()
}

impl Default for ExportSection {
    fn default() -> Self {
        Self {
            directory: None,
            start: None,
            snapshots: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Contents of the configuration file.
///
/// The tool writes the `[tokens]` section back after each run so the next
/// run can skip the password grant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub netatmo: AccountSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenState>,
    #[serde(default)]
    pub export: ExportSection,
}

impl Config {
    /// `~/.netatmo.toml`.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(CONFIG_FILE_NAME))
            .ok_or(ConfigError::HomeDirResolution)
    }

    /// Reads `path`; a missing file gives an empty configuration.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No configuration file at {}", path.display());
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
        };
        toml::from_str(&content).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Writes the configuration. The file holds secrets, so on unix it is
    /// only readable by its owner.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        write_private(path, content.as_bytes())
            .map_err(|e| ConfigError::Write(path.to_path_buf(), e))?;
        debug!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// The credentials for a session; every field of `[netatmo]` except the
    /// default station is required.
    pub fn credentials(&self) -> Result<Credentials, ConfigError> {
        fn required<'a>(
            value: &'a Option<String>,
            name: &'static str,
        ) -> Result<&'a str, ConfigError> {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or(ConfigError::MissingField(name))
        }

        let account = &self.netatmo;
        let credentials = Credentials::new(
            required(&account.client_id, "client_id")?,
            required(&account.client_secret, "client_secret")?,
            required(&account.username, "username")?,
            required(&account.password, "password")?,
        );
        Ok(match &account.default_station {
            Some(station) if !station.is_empty() => credentials.with_default_device(station),
            _ => credentials,
        })
    }

    /// Replaces the account credentials. Stored tokens belong to the old
    /// account and are dropped.
    pub fn set_credentials(&mut self, credentials: &Credentials) {
        self.netatmo.client_id = Some(credentials.client_id.clone());
        self.netatmo.client_secret = Some(credentials.client_secret.clone());
        self.netatmo.username = Some(credentials.username.clone());
        self.netatmo.password = Some(credentials.password.clone());
        self.tokens = None;
    }

    /// Sets the default station; `None` or an empty string clears it.
    pub fn set_default_station(&mut self, station: Option<&str>) {
        self.netatmo.default_station = station.filter(|s| !s.is_empty()).map(str::to_string);
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.export.timeout_secs)
    }

    pub fn export_start(&self) -> Option<i64> {
        self.export.start.map(|start| start.timestamp())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(PRIVATE_MODE)
        .open(path)?;
    // `mode` only applies to new files
    file.set_permissions(fs::Permissions::from_mode(PRIVATE_MODE))?;
    file.write_all(content)?;
    file.flush()
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &[u8]) -> io::Result<()> {
    fs::write(path, content)
}

fn masked(value: &Option<String>) -> &'static str {
    match value {
        Some(v) if !v.is_empty() => "********",
        _ => "<not set>",
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let account = &self.netatmo;
        let or_unset = |v: &Option<String>| v.clone().unwrap_or_else(|| "<not set>".to_string());
        writeln!(f, "[netatmo]")?;
        writeln!(f, "client_id       = {}", or_unset(&account.client_id))?;
        writeln!(f, "client_secret   = {}", masked(&account.client_secret))?;
        writeln!(f, "username        = {}", or_unset(&account.username))?;
        writeln!(f, "password        = {}", masked(&account.password))?;
        writeln!(f, "default_station = {}", or_unset(&account.default_station))?;
        writeln!(f, "[tokens]")?;
        match &self.tokens {
            Some(tokens) => writeln!(f, "expires_at      = {}", tokens.expires_at.to_rfc3339())?,
            None => writeln!(f, "<none>")?,
        }
        writeln!(f, "[export]")?;
        writeln!(
            f,
            "directory       = {}",
            self.export
                .directory
                .as_ref()
                .map_or_else(|| ".".to_string(), |d| d.display().to_string())
        )?;
        writeln!(
            f,
            "start           = {}",
            self.export
                .start
                .map_or_else(|| "<all history>".to_string(), |s| s.to_rfc3339())
        )?;
        writeln!(f, "snapshots       = {}", self.export.snapshots)?;
        write!(f, "timeout_secs    = {}", self.export.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn configured() -> Config {
        let mut config = Config::default();
        config.set_credentials(&Credentials::new("id", "app-key", "me@example.com", "hunter2"));
        config
    }

    #[test]
    fn test_missing_file_is_empty_config() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let config = Config::load(&dir.path().join("absent.toml"))?;
        assert_eq!(config, Config::default());
        assert_eq!(config.timeout(), Duration::from_secs(30));
        Ok(())
    }

    #[test]
    fn test_save_then_load() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("netatmo.toml");
        let mut config = configured();
        config.tokens = Some(TokenState {
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc.with_ymd_and_hms(2026, 10, 18, 12, 0, 0).unwrap(),
        });
        config.export.snapshots = true;
        config.save(&path)?;

        let written = fs::read_to_string(&path)?;
        assert!(written.contains("[tokens]"));
        assert!(written.contains("expires_at = \"2026-10-18T12:00:00Z\""));
        assert_eq!(Config::load(&path)?, config);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_private() -> Result<(), Box<dyn std::error::Error>> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        let path = dir.path().join("netatmo.toml");
        configured().save(&path)?;
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644))?;
        configured().save(&path)?;
        assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        Ok(())
    }

    #[test]
    fn test_parses_hand_written_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("netatmo.toml");
        fs::write(
            &path,
            r#"
[netatmo]
client_id = "a"
client_secret = "b"
username = "u"
password = "p"
default_station = "70:ee:50:00:00:01"

[export]
directory = "/var/lib/netatmo"
start = "2024-01-01T00:00:00Z"
timeout_secs = 10
"#,
        )?;

        let config = Config::load(&path)?;
        let credentials = config.credentials()?;
        assert_eq!(
            credentials,
            Credentials::new("a", "b", "u", "p").with_default_device("70:ee:50:00:00:01")
        );
        assert_eq!(config.export_start(), Some(1_704_067_200));
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert!(!config.export.snapshots);
        Ok(())
    }

    #[test]
    fn test_invalid_file_is_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("netatmo.toml");
        fs::write(&path, "[netatmo\nclient_id = ")?;
        assert!(matches!(Config::load(&path), Err(ConfigError::Parse(..))));
        Ok(())
    }

    #[test]
    fn test_missing_credential_field() {
        let mut config = configured();
        config.netatmo.password = None;
        assert!(matches!(
            config.credentials(),
            Err(ConfigError::MissingField("password"))
        ));
    }

    #[test]
    fn test_new_credentials_drop_tokens() {
        let mut config = configured();
        config.tokens = Some(TokenState {
            access_token: "T1".to_string(),
            refresh_token: "R1".to_string(),
            expires_at: Utc::now(),
        });
        config.set_credentials(&Credentials::new("id2", "secret2", "other@example.com", "pw2"));
        assert_eq!(config.tokens, None);
        assert_eq!(config.netatmo.client_id.as_deref(), Some("id2"));
    }

    #[test]
    fn test_default_station_can_be_cleared() {
        let mut config = configured();
        config.set_default_station(Some("70:ee:50:00:00:01"));
        assert_eq!(
            config.credentials().unwrap().default_device.as_deref(),
            Some("70:ee:50:00:00:01")
        );
        config.set_default_station(Some(""));
        assert_eq!(config.netatmo.default_station, None);
    }

    #[test]
    fn test_display_masks_secrets() {
        let shown = configured().to_string();
        assert!(shown.contains("client_id       = id"));
        assert!(shown.contains("client_secret   = ********"));
        assert!(!shown.contains("app-key"));
        assert!(!shown.contains("hunter2"));
    }
}
