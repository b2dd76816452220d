//! Configuration management using the prefer crate for discovery.
//!
//! A `persona.{toml,yaml,json}` file is located by prefer (or passed with
//! `--config`) and deserialized with serde. Every section falls back to its
//! defaults, and LLM device settings are always overlaid from the environment.

mod settings;

pub use settings::{Settings, DEFAULT_DATABASE_FILENAME};

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::analysis::{PipelineConfig, QualityConfig};
use crate::dispatcher::DispatcherConfig;
use crate::llm::LlmConfig;
use crate::rate_limit::RateLimitConfig;

/// Errors while loading a config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {format} config: {message}")]
    Parse {
        format: &'static str,
        message: String,
    },
}

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Data directory (relative paths resolve against the config file).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename inside the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// File this config was loaded from.
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Discover and load the config file, falling back to defaults.
    pub async fn load() -> Self {
        match prefer::load("persona").await {
            Ok(found) => match found.source_path() {
                Some(path) => match Self::load_from_path(path).await {
                    Ok(config) => config,
                    Err(e) => {
                        warn!("Ignoring config file: {}", e);
                        Self::default()
                    }
                },
                None => Self::default(),
            },
            Err(e) => {
                debug!("No config file found: {}", e);
                Self::default()
            }
        }
    }

    /// Load configuration from a specific file path.
    /// The format follows the file extension; anything unknown is read as JSON.
    pub async fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        let mut config = Self::parse(ext, &contents)?;
        config.source_path = Some(path.to_path_buf());
        config.llm = config.llm.with_env_overrides();
        Ok(config)
    }

    fn parse(ext: &str, contents: &str) -> Result<Self, ConfigError> {
        match ext {
            "toml" => toml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "TOML",
                message: e.to_string(),
            }),
            "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "YAML",
                message: e.to_string(),
            }),
            _ => serde_json::from_str(contents).map_err(|e| ConfigError::Parse {
                format: "JSON",
                message: e.to_string(),
            }),
        }
    }

    /// Directory relative paths resolve against.
    pub fn base_dir(&self) -> PathBuf {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    /// Apply file settings to runtime settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref data_dir) = self.data_dir {
            let path = Path::new(data_dir);
            settings.data_dir = if path.is_absolute() {
                path.to_path_buf()
            } else {
                self.base_dir().join(path)
            };
        }
        if let Some(ref database) = self.database {
            settings.database_filename = database.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_toml_sections_fall_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persona.toml");
        std::fs::write(
            &path,
            "data_dir = \"state\"\n\n[pipeline]\nmax_resumes = 5\n\n[rate_limit]\nmax_requests = 4\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path).await.unwrap();
        assert_eq!(config.pipeline.max_resumes, 5);
        assert_eq!(config.pipeline.stage_retry_limit, 2);
        assert_eq!(config.rate_limit.max_requests, 4);
        assert_eq!(config.dispatcher, DispatcherConfig::default());

        let mut settings = Settings::with_data_dir(PathBuf::from("/nowhere"));
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.data_dir, dir.path().join("state"));
    }

    #[tokio::test]
    async fn test_yaml_and_json_formats() {
        let dir = tempdir().unwrap();
        let yaml = dir.path().join("persona.yaml");
        std::fs::write(&yaml, "quality:\n  threshold: 0.5\n").unwrap();
        let config = Config::load_from_path(&yaml).await.unwrap();
        assert_eq!(config.quality.threshold, 0.5);

        let json = dir.path().join("persona.json");
        std::fs::write(&json, r#"{"dispatcher": {"max_attempts": 7}}"#).unwrap();
        let config = Config::load_from_path(&json).await.unwrap();
        assert_eq!(config.dispatcher.max_attempts, 7);
    }

    #[tokio::test]
    async fn test_invalid_file_reports_format() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("persona.toml");
        std::fs::write(&path, "pipeline = [").unwrap();
        let err = Config::load_from_path(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { format: "TOML", .. }));
    }
}
