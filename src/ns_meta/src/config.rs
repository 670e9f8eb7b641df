use ns_lib::{NsError, NsResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

use crate::driver::DEFAULT_FETCH_SIZE;
use crate::schema::DEFAULT_BUSY_TIMEOUT_MS;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    #[serde(alias = "backend", alias = "db_dialect")]
    pub dialect: String,
    /// Initial IO flag of new inodes.
    #[serde(alias = "inode_io_mode")]
    pub inode_io_enabled: bool,
    pub dir_stream_fetch_size: usize,
    pub busy_timeout_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dialect: "sqlite".to_string(),
            inode_io_enabled: false,
            dir_stream_fetch_size: DEFAULT_FETCH_SIZE,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl DriverConfig {
    pub fn load(path: &Path) -> NsResult<Self> {
        read_json_config(path)
    }

    pub fn fetch_size(&self) -> usize {
        if self.dir_stream_fetch_size == 0 {
            DEFAULT_FETCH_SIZE
        } else {
            self.dir_stream_fetch_size
        }
    }
}

fn read_json_config<T: DeserializeOwned>(path: &Path) -> NsResult<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| NsError::IoError(format!("read {} failed: {}", path.display(), e)))?;
    serde_json::from_str::<T>(&content)
        .map_err(|e| NsError::InvalidData(format!("parse {} failed: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_and_aliases() {
        let config: DriverConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.dialect, "sqlite");
        assert_eq!(config.fetch_size(), 50);
        assert_eq!(config.busy_timeout_ms, 5000);

        let config: DriverConfig = serde_json::from_str(
            r#"{"backend": "generic", "inode_io_mode": true, "dir_stream_fetch_size": 0}"#,
        )
        .unwrap();
        assert_eq!(config.dialect, "generic");
        assert!(config.inode_io_enabled);
        assert_eq!(config.fetch_size(), 50);
    }

    #[test]
    fn test_load() {
        let tmp_dir = TempDir::new().unwrap();
        let path = tmp_dir.path().join("driver.json");
        std::fs::write(&path, r#"{"db_dialect": "sqlite", "dir_stream_fetch_size": 8}"#).unwrap();
        let config = DriverConfig::load(&path).unwrap();
        assert_eq!(config.fetch_size(), 8);

        let missing = DriverConfig::load(&tmp_dir.path().join("nope.json"));
        assert!(matches!(missing, Err(NsError::IoError(_))));

        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            DriverConfig::load(&path),
            Err(NsError::InvalidData(_))
        ));
    }
}
