use log::*;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use wrt_kit::{get_wrt_default_config_path, get_wrt_default_storage_path};

use crate::{WrtApiError, WrtResult};

pub const DEFAULT_ENDPOINT: &str = "http://192.168.1.1/ubus";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    pub endpoint: String,
    pub poll_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub long_call_timeout_secs: u64,
    pub flash_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub reboot_logout_delay_ms: u64,
    pub firmware_chunk_size: usize,
    pub storage_path: Option<PathBuf>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        PanelConfig {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval_secs: 3,
            request_timeout_secs: 15,
            long_call_timeout_secs: 30,
            flash_timeout_secs: 120,
            settle_delay_ms: 2000,
            reboot_logout_delay_ms: 2000,
            firmware_chunk_size: 64 * 1024,
            storage_path: None,
        }
    }
}

impl PanelConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn long_call_timeout(&self) -> Duration {
        Duration::from_secs(self.long_call_timeout_secs)
    }

    pub fn flash_timeout(&self) -> Duration {
        Duration::from_secs(self.flash_timeout_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn reboot_logout_delay(&self) -> Duration {
        Duration::from_millis(self.reboot_logout_delay_ms)
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage_path
            .clone()
            .unwrap_or_else(get_wrt_default_storage_path)
    }
}

/// Explicit path must exist; the default path is optional. `WRT_ENDPOINT` wins over the file.
pub fn load_panel_config(path: Option<&Path>) -> WrtResult<PanelConfig> {
    let mut config = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = get_wrt_default_config_path();
            if default_path.exists() {
                read_config_file(&default_path)?
            } else {
                PanelConfig::default()
            }
        }
    };

    if let Ok(endpoint) = std::env::var("WRT_ENDPOINT") {
        if !endpoint.is_empty() {
            config.endpoint = endpoint;
        }
    }
    Ok(config)
}

fn read_config_file(path: &Path) -> WrtResult<PanelConfig> {
    let contents = std::fs::read_to_string(path).map_err(|err| {
        error!("read config {} failed: {}", path.display(), err);
        WrtApiError::Config(format!("read {} failed: {}", path.display(), err))
    })?;
    let config: PanelConfig = toml::from_str(&contents).map_err(|err| {
        error!("parse config {} failed: {}", path.display(), err);
        WrtApiError::Config(format!("parse {} failed: {}", path.display(), err))
    })?;
    info!("load panel config from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "endpoint = \"http://10.0.0.1/ubus\"\npoll_interval_secs = 5\n").unwrap();

        let config = read_config_file(&path).unwrap();
        assert_eq!(config.endpoint, "http://10.0.0.1/ubus");
        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.firmware_chunk_size, 65536);
        assert_eq!(config.flash_timeout(), Duration::from_secs(120));
    }

    #[test]
    fn test_missing_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_panel_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, WrtApiError::Config(_)));
    }

    #[test]
    fn test_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "poll_interval_secs = \"three\"").unwrap();
        assert!(matches!(read_config_file(&path), Err(WrtApiError::Config(_))));
    }
}
