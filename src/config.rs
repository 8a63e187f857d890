use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

pub const DEFAULT_CONFIG_FILE: &str = "catalog-sync.json";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_THEME: &str = "Hospitals";
pub const DEFAULT_WORKERS: usize = 8;
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// On-disk config file. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub manifest: Option<String>,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub theme: Option<String>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Values given on the command line; they win over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub manifest: Option<String>,
    pub data_dir: Option<String>,
    pub theme: Option<String>,
    pub workers: Option<usize>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub manifest: Utf8PathBuf,
    pub data_dir: Utf8PathBuf,
    pub theme: String,
    pub workers: usize,
    pub timeout: Option<Duration>,
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Reads the config file (if any) and applies CLI overrides.
    ///
    /// A missing default file is fine; a missing file named via `--config` is not.
    pub fn load(path: Option<&str>) -> Result<Config, SyncError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(Config::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| SyncError::ConfigRead(config_path.clone()))?;
        serde_json::from_str(&content).map_err(|err| SyncError::ConfigParse(err.to_string()))
    }

    pub fn resolve(
        path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let config = Self::load(path)?;
        Self::resolve_config(config, overrides)
    }

    pub fn resolve_config(
        config: Config,
        overrides: ConfigOverrides,
    ) -> Result<ResolvedConfig, SyncError> {
        let manifest = overrides
            .manifest
            .or(config.manifest)
            .filter(|value| !value.trim().is_empty())
            .ok_or(SyncError::MissingManifest)?;
        let data_dir = overrides
            .data_dir
            .or(config.data_dir)
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string());
        let theme = overrides
            .theme
            .or(config.theme)
            .unwrap_or_else(|| DEFAULT_THEME.to_string());
        let workers = overrides
            .workers
            .or(config.workers)
            .unwrap_or(DEFAULT_WORKERS)
            .max(1);
        let timeout_secs = overrides
            .timeout_secs
            .or(config.timeout_secs)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        Ok(ResolvedConfig {
            manifest: Utf8PathBuf::from(manifest),
            data_dir: Utf8PathBuf::from(data_dir),
            theme,
            workers,
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        })
    }

    /// Data directory for read-only commands, which need no manifest.
    pub fn resolve_data_dir(
        path: Option<&str>,
        data_dir: Option<String>,
    ) -> Result<Utf8PathBuf, SyncError> {
        let config = Self::load(path)?;
        Ok(Utf8PathBuf::from(
            data_dir
                .or(config.data_dir)
                .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config {
            manifest: Some("items.json".to_string()),
            ..Config::default()
        };

        let resolved = ConfigLoader::resolve_config(config, ConfigOverrides::default()).unwrap();
        assert_eq!(resolved.manifest, Utf8PathBuf::from("items.json"));
        assert_eq!(resolved.data_dir, Utf8PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(resolved.theme, DEFAULT_THEME);
        assert_eq!(resolved.workers, DEFAULT_WORKERS);
        assert_eq!(
            resolved.timeout,
            Some(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
        );
    }

    #[test]
    fn manifest_is_required() {
        let err =
            ConfigLoader::resolve_config(Config::default(), ConfigOverrides::default()).unwrap_err();
        assert_matches!(err, SyncError::MissingManifest);
    }
}
