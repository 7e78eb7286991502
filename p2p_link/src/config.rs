use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::connection::transport::OfferOptions;
use crate::transfer::constants::{DEFAULT_LATENCY_MS, DEFAULT_MAX_CHUNK_SIZE};

const APP_QUALIFIER: &str = "com";
const APP_ORGANIZATION: &str = "p2p";
const APP_NAME: &str = "p2p_link";
const CONFIG_FILE: &str = "config.json";
const CONFIG_DIR_ENV: &str = "P2P_LINK_CONFIG_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesConfig {
    /// Master switch for file transfer
    pub enabled: bool,
    /// Allow sending zero-byte files
    pub empty_files: bool,
    pub max_chunk_size: usize,
    /// Send files as soon as they are chosen in a registered file input
    pub auto_sending: bool,
    /// Request ordered delivery on file channels
    pub ordered: bool,
    /// Pause between two outbound chunks
    pub latency_ms: u64,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            empty_files: true,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            auto_sending: true,
            ordered: true,
            latency_ms: DEFAULT_LATENCY_MS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub files: FilesConfig,
    /// Used for offers the link creates on its own
    pub offer_options: OfferOptions,
}

impl LinkConfig {
    /// Get the config file path
    fn get_config_path() -> Option<PathBuf> {
        if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
            return Some(PathBuf::from(dir).join(CONFIG_FILE));
        }

        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load config from disk or return default
    pub fn load() -> Self {
        let path = match Self::get_config_path() {
            Some(p) => p,
            None => return Self::default(),
        };

        match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring invalid config {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save config to disk
    pub fn save(&self) -> std::io::Result<()> {
        let Some(path) = Self::get_config_path() else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert!(config.files.enabled);
        assert!(config.files.empty_files);
        assert!(config.files.auto_sending);
        assert!(config.files.ordered);
        assert_eq!(config.files.max_chunk_size, 16384);
        assert_eq!(config.files.latency_ms, 200);
        assert!(config.offer_options.offer_to_receive_audio);
        assert!(config.offer_options.offer_to_receive_video);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: LinkConfig =
            serde_json::from_str(r#"{"files":{"latency_ms":5,"empty_files":false}}"#).unwrap();
        assert_eq!(config.files.latency_ms, 5);
        assert!(!config.files.empty_files);
        assert_eq!(config.files.max_chunk_size, DEFAULT_MAX_CHUNK_SIZE);
        assert_eq!(config.offer_options, OfferOptions::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        // SAFETY: no other test in this crate reads this variable.
        unsafe { std::env::set_var(CONFIG_DIR_ENV, dir.path()) };

        let mut config = LinkConfig::default();
        config.files.max_chunk_size = 1000;
        config.files.auto_sending = false;
        config.save().unwrap();

        let loaded = LinkConfig::load();
        unsafe { std::env::remove_var(CONFIG_DIR_ENV) };
        assert_eq!(loaded, config);
    }
}
