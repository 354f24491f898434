//! Configuration Loader
//!
//! Environment-aware YAML configuration loading. Discovers a base
//! `ingest-config.yaml`, merges an optional `ingest-config-{env}.yaml`
//! overlay on top, applies the `DATABASE_URL` override, and validates the
//! result before handing it out.

use super::IngestConfig;
use crate::error::{IngestCoreError, Result};
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const BASE_CONFIG_FILE: &str = "ingest-config.yaml";

/// Loaded configuration plus the environment it was resolved for.
pub struct ConfigManager {
    config: IngestConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection.
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory.
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with an explicit
    /// environment. Useful in tests to avoid mutating process env vars.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> Result<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = environment,
            directory = %config_directory.display(),
            "Loading pipeline configuration"
        );

        let mut config = Self::load_and_merge_config(&config_directory, environment)?;

        // Explicit connection URL from the environment beats file config.
        if let Ok(url) = env::var("DATABASE_URL") {
            config.database.url = Some(url);
        }

        config.validate()?;

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration, bypassing file discovery.
    pub fn from_config(config: IngestConfig, environment: &str) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::new(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    /// Get the resolved environment name
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the directory configuration was loaded from
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn detect_environment() -> String {
        env::var("INGEST_ENV").unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("INGEST_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(config_directory: &Path, environment: &str) -> Result<IngestConfig> {
        let base_path = config_directory.join(BASE_CONFIG_FILE);
        if !base_path.exists() {
            return Err(IngestCoreError::configuration(format!(
                "Base configuration file not found: {}",
                base_path.display()
            )));
        }

        let mut merged = Self::read_yaml(&base_path)?;

        let overlay_path = config_directory.join(format!("ingest-config-{environment}.yaml"));
        if overlay_path.exists() {
            let overlay = Self::read_yaml(&overlay_path)?;
            Self::deep_merge(&mut merged, overlay);
            debug!(overlay = %overlay_path.display(), "Applied environment overlay");
        }

        serde_yaml::from_value(merged).map_err(|e| {
            IngestCoreError::configuration(format!("Invalid configuration structure: {e}"))
        })
    }

    fn read_yaml(path: &Path) -> Result<YamlValue> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            IngestCoreError::configuration(format!("Failed to read {}: {e}", path.display()))
        })?;
        serde_yaml::from_str(&contents).map_err(|e| {
            IngestCoreError::configuration(format!("Failed to parse {}: {e}", path.display()))
        })
    }

    /// Merge `overlay` into `base`: mappings merge recursively, everything
    /// else is replaced wholesale.
    fn deep_merge(base: &mut YamlValue, overlay: YamlValue) {
        match (base, overlay) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(overlay_map)) => {
                for (key, overlay_value) in overlay_map {
                    match base_map.get_mut(&key) {
                        Some(base_value) => Self::deep_merge(base_value, overlay_value),
                        None => {
                            base_map.insert(key, overlay_value);
                        }
                    }
                }
            }
            (base_slot, overlay_value) => *base_slot = overlay_value,
        }
    }
}
