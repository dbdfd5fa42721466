use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use devfm_platform::command::ListingFormat;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Directory relative request paths resolve against
    #[serde(default = "default_managed_root")]
    pub managed_root: PathBuf,

    /// Allow the privileged fallback at all
    #[serde(default = "default_true")]
    pub elevation_enabled: bool,

    /// Directory holding the environment configuration
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Credentials file name inside `config_dir`
    #[serde(default = "default_credentials_file")]
    pub credentials_file: String,

    /// Account that owns everything created through elevation
    #[serde(default = "default_service_account")]
    pub service_user: String,

    #[serde(default = "default_service_account")]
    pub service_group: String,

    /// Non-interactive elevation helper (invoked as `<helper> -n -- ...`)
    #[serde(default = "default_elevation_helper")]
    pub elevation_helper: String,

    /// Upper bound for a single privileged command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Directories swept by `cleanup_tmp`
    #[serde(default = "default_temp_dirs")]
    pub temp_dirs: Vec<PathBuf>,

    #[serde(default = "default_temp_max_age")]
    pub temp_max_age_days: u32,

    /// Reject paths outside `managed_root`
    #[serde(default)]
    pub restrict_to_root: bool,

    #[serde(default)]
    pub elevated_listing: ListingFormat,

    /// Address the HTTP endpoint binds to
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Request body limit, uploads included
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

fn default_managed_root() -> PathBuf {
    PathBuf::from("/var/www/html")
}
fn default_true() -> bool {
    true
}
fn default_config_dir() -> PathBuf {
    PathBuf::from("/opt/claude-env")
}
fn default_credentials_file() -> String {
    "mysql_credentials.conf".to_string()
}
fn default_service_account() -> String {
    "www-data".to_string()
}
fn default_elevation_helper() -> String {
    "sudo".to_string()
}
/// Recursive commands on large trees need this long.
pub const MIN_COMMAND_TIMEOUT_SECS: u64 = 120;

fn default_command_timeout() -> u64 {
    MIN_COMMAND_TIMEOUT_SECS
}
fn default_temp_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("/tmp"), PathBuf::from("/var/tmp")]
}
fn default_temp_max_age() -> u32 {
    7
}
fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_upload_bytes() -> usize {
    64 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            managed_root: default_managed_root(),
            elevation_enabled: default_true(),
            config_dir: default_config_dir(),
            credentials_file: default_credentials_file(),
            service_user: default_service_account(),
            service_group: default_service_account(),
            elevation_helper: default_elevation_helper(),
            command_timeout_secs: default_command_timeout(),
            temp_dirs: default_temp_dirs(),
            temp_max_age_days: default_temp_max_age(),
            restrict_to_root: false,
            elevated_listing: ListingFormat::default(),
            listen_addr: default_listen_addr(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl GatewayConfig {
    /// Default config file path for this platform
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("org", "devfm", "devfm") {
            dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("devfm-config.json")
        }
    }

    /// Load config from a file path
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;
        let config: Self =
            serde_json::from_str(&data).with_context(|| "failed to parse config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to a file path
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create config dir {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)
            .with_context(|| format!("failed to write config to {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.managed_root.is_absolute() {
            bail!(
                "managed_root must be an absolute path, got {}",
                self.managed_root.display()
            );
        }
        if self.command_timeout_secs < MIN_COMMAND_TIMEOUT_SECS {
            bail!(
                "command_timeout_secs must be at least {}, got {}",
                MIN_COMMAND_TIMEOUT_SECS,
                self.command_timeout_secs
            );
        }
        if self.elevation_helper.trim().is_empty() {
            bail!("elevation_helper must not be empty");
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Full path of the credentials file
    pub fn credentials_path(&self) -> PathBuf {
        self.config_dir.join(&self.credentials_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.managed_root, PathBuf::from("/var/www/html"));
        assert!(config.elevation_enabled);
        assert_eq!(config.elevated_listing, ListingFormat::NullDelimited);
        assert_eq!(
            config.credentials_path(),
            PathBuf::from("/opt/claude-env/mysql_credentials.conf")
        );
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = GatewayConfig {
            managed_root: PathBuf::from("/srv/site"),
            elevation_enabled: false,
            elevated_listing: ListingFormat::LongListing,
            ..Default::default()
        };
        config.save(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"long-listing\""));
        assert_eq!(GatewayConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_relative_root_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"managed_root": "www"}"#).unwrap();
        let err = GatewayConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("absolute"));
    }

    #[test]
    fn test_short_timeout_is_rejected() {
        for secs in [0, 30, 119] {
            let config = GatewayConfig {
                command_timeout_secs: secs,
                ..Default::default()
            };
            assert!(config.validate().is_err(), "{}", secs);
        }
        let config = GatewayConfig {
            command_timeout_secs: 600,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
