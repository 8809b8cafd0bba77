//! Storage Configuration
//!
//! Controls where partition data lives and when segments roll:
//!
//! - **data_dir**: filesystem root for all partitions; created at engine
//!   open if absent
//! - **max_file_size**: segment rollover threshold in bytes (default: 64MB)
//!
//! ## Usage
//!
//! ```ignore
//! use logvault_storage::StorageConfig;
//!
//! // Production config
//! let config = StorageConfig {
//!     data_dir: "/var/lib/logvault".into(),
//!     ..Default::default()
//! };
//!
//! // Test config with tiny segments to exercise rollover
//! let config = StorageConfig {
//!     data_dir: temp_dir.path().to_path_buf(),
//!     max_file_size: 1024,
//! };
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Filesystem root for all partition directories (default: ./data)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum segment store-file size in bytes before rolling (default: 64MB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            max_file_size: default_max_file_size(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_max_file_size() -> u64 {
    64 * 1024 * 1024 // 64MB
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StorageConfig::default();
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.max_file_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_with_missing_fields() {
        let config: StorageConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.max_file_size, 64 * 1024 * 1024);
    }

    #[test]
    fn test_deserialize_overrides() {
        let config: StorageConfig =
            serde_json::from_str(r#"{"data_dir": "/tmp/lv", "max_file_size": 10}"#).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/lv"));
        assert_eq!(config.max_file_size, 10);
    }
}
