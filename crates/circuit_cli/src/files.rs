use anyhow::{Context, Result};
use circuit::SessionConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config location, overridable with `CIRCUIT_CONFIG`
pub fn default_config_path() -> PathBuf {
    if let Ok(override_path) = std::env::var("CIRCUIT_CONFIG") {
        return PathBuf::from(override_path);
    }

    let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    data_dir.join("circuit").join("config.json")
}

/// Load the session config. An explicit path must exist; a missing default
/// file means defaults.
pub fn load_config(explicit: Option<&Path>) -> Result<SessionConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => {
            let path = default_config_path();
            if !path.exists() {
                return Ok(SessionConfig::default());
            }
            path
        }
    };
    let json = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config = SessionConfig::from_json(&json)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::debug!("Loaded config from {}", path.display());
    Ok(config)
}

pub fn read_syx(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn write_syx(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn test_load_explicit_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(br#"{"minSendIntervalMs": 40, "portPatterns": ["my circuit"]}"#)
            .unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.min_send_interval_ms, 40);
        assert_eq!(config.port_patterns, vec!["my circuit".to_string()]);
        assert_eq!(config.response_timeout_ms, 3000);
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let result = load_config(Some(Path::new("/nonexistent/circuit.json")));
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_config() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        assert!(load_config(Some(file.path())).is_err());
    }

    #[test]
    fn test_syx_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bank.syx");
        let bytes = vec![0xF0, 0x00, 0x20, 0x29, 0xF7];

        write_syx(&path, &bytes).unwrap();
        assert_eq!(read_syx(&path).unwrap(), bytes);
        assert!(read_syx(&dir.path().join("missing.syx")).is_err());
    }
}
