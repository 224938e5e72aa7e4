use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ConsensusError, Result};

/// Default upper bound for one inbound consensus message.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 1 << 20;

/// Per-node consensus settings, loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// First byte of every consensus message (message class).
    pub class_byte: u8,
    /// Second byte of every consensus message (instruction within the class).
    pub ins_byte: u8,
    pub max_message_bytes: usize,
    /// Where `SnapshotStore` keeps session snapshots. None disables persistence.
    pub snapshot_path: Option<PathBuf>,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            class_byte: 0x01,
            ins_byte: 0x00,
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
            snapshot_path: None,
        }
    }
}

impl ConsensusConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ConsensusConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load consensus config from TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Overlay `COSIG_*` environment variables on the defaults.
    /// Useful for containerized deployments
    pub fn load_from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Some(v) = env_parse::<u8>("COSIG_CLASS_BYTE")? {
            config.class_byte = v;
        }
        if let Some(v) = env_parse::<u8>("COSIG_INS_BYTE")? {
            config.ins_byte = v;
        }
        if let Some(v) = env_parse::<usize>("COSIG_MAX_MESSAGE_BYTES")? {
            config.max_message_bytes = v;
        }
        if let Ok(path) = std::env::var("COSIG_SNAPSHOT_PATH") {
            config.snapshot_path = Some(PathBuf::from(path));
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // header (7) + signature (64) is the smallest possible message
        if self.max_message_bytes < 7 + cosig_crypto::SIGNATURE_LEN {
            return Err(ConsensusError::InvalidConfig(format!(
                "max_message_bytes {} cannot hold a signed header",
                self.max_message_bytes
            )));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConsensusError::InvalidConfig(format!("{}={} is not valid", key, raw))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config = ConsensusConfig::from_toml_str("class_byte = 5\n").unwrap();
        assert_eq!(config.class_byte, 5);
        assert_eq!(config.ins_byte, 0);
        assert_eq!(config.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
        assert_eq!(config.snapshot_path, None);
    }

    #[test]
    fn test_rejects_tiny_message_limit() {
        assert!(matches!(
            ConsensusConfig::from_toml_str("max_message_bytes = 10\n"),
            Err(ConsensusError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        assert!(matches!(
            ConsensusConfig::from_toml_str("class_byte = \"x\""),
            Err(ConsensusError::Config(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("consensus.toml");
        let config = ConsensusConfig {
            class_byte: 0x02,
            ins_byte: 0x07,
            max_message_bytes: 4096,
            snapshot_path: Some(temp_dir.path().join("snapshots")),
        };
        config.save_to_file(&path).unwrap();
        assert_eq!(ConsensusConfig::load_from_file(&path).unwrap(), config);
    }
}
