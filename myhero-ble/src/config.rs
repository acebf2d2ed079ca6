//! Engine configuration, read from `$MYHERO_HOME/config.json`

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("no home directory, set MYHERO_HOME")]
    NoHome,
}

/// Get MYHERO_HOME directory (default: ~/.myhero)
#[cfg(feature = "host")]
pub fn myhero_home() -> Result<PathBuf, ConfigError> {
    let home = match std::env::var("MYHERO_HOME") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => dirs::home_dir().ok_or(ConfigError::NoHome)?.join(".myhero"),
    };

    if !home.exists() {
        fs::create_dir_all(&home).map_err(|source| ConfigError::Read {
            path: home.clone(),
            source,
        })?;
    }

    Ok(home)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory that backs the device's storage mount
    pub storage_root: PathBuf,
    /// Absolute prefix peers may put in front of storage paths
    pub mount_prefix: String,
    /// Upper bound for one transfer chunk
    pub chunk_size: usize,
    /// Delay before a deferred notification is sent
    pub notify_delay_us: u64,
    pub device_name: String,
    /// Where the host key store keeps the shared secret
    pub key_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("storage"),
            mount_prefix: "/Storage".to_string(),
            chunk_size: myhero_proto::DEFAULT_CHUNK_SIZE,
            notify_delay_us: 100,
            device_name: myhero_proto::ble::DEFAULT_DEVICE_NAME.to_string(),
            key_file: PathBuf::from("auth.key"),
        }
    }
}

impl Config {
    /// Load `config.json` from `home`; a missing file means defaults.
    /// Relative paths are taken relative to `home`.
    pub fn load(home: &Path) -> Result<Self, ConfigError> {
        let path = home.join(CONFIG_FILE);
        let config = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|source| ConfigError::Parse { path: path.clone(), source })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Config::default(),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        Ok(config.rooted_at(home))
    }

    pub fn rooted_at(mut self, home: &Path) -> Self {
        if self.storage_root.is_relative() {
            self.storage_root = home.join(&self.storage_root);
        }
        if self.key_file.is_relative() {
            self.key_file = home.join(&self.key_file);
        }
        self
    }

    pub fn notify_delay(&self) -> Duration {
        Duration::from_micros(self.notify_delay_us)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults_rooted_at_home() {
        let home = tempfile::tempdir().unwrap();
        let config = Config::load(home.path()).unwrap();
        assert_eq!(config.chunk_size, 490);
        assert_eq!(config.mount_prefix, "/Storage");
        assert_eq!(config.storage_root, home.path().join("storage"));
        assert_eq!(config.key_file, home.path().join("auth.key"));
        assert_eq!(config.notify_delay(), Duration::from_micros(100));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let home = tempfile::tempdir().unwrap();
        fs::write(
            home.path().join(CONFIG_FILE),
            r#"{"chunk_size": 128, "storage_root": "/data/rec"}"#,
        )
        .unwrap();

        let config = Config::load(home.path()).unwrap();
        assert_eq!(config.chunk_size, 128);
        assert_eq!(config.storage_root, PathBuf::from("/data/rec"));
        assert_eq!(config.device_name, "MyHero");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let home = tempfile::tempdir().unwrap();
        fs::write(home.path().join(CONFIG_FILE), "{ chunk_size: ").unwrap();
        assert!(matches!(Config::load(home.path()), Err(ConfigError::Parse { .. })));
    }
}
