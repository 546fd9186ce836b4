//! Pipeline configuration loaded from a TOML file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::StageToggles;

/// Number of leading pages fed to the metadata agent.
pub const METADATA_PAGE_COUNT: usize = 20;

/// Default retry cap for book-level operations.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("cannot write config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("config error: {0}")]
    Invalid(String),
}

/// Process-wide pipeline settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Root directory for book data (originals, page images, snapshots).
    pub data_dir: PathBuf,
    /// OCR providers run against every page.
    pub ocr_providers: Vec<String>,
    /// Model selection per LLM phase (metadata, toc, blend, label,
    /// classify, polish).
    pub phase_models: HashMap<String, String>,
    /// Directory holding prompt text files, one per prompt key.
    pub prompt_dir: Option<PathBuf>,
    pub stages: StageToggles,
    pub max_retries: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            ocr_providers: vec!["tesseract".to_string()],
            phase_models: HashMap::new(),
            prompt_dir: None,
            stages: StageToggles::default(),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("BINDERY_DATA_DIR") {
        return PathBuf::from(shellexpand::tilde(&dir).into_owned());
    }
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bindery")
}

impl PipelineConfig {
    /// Load from a TOML file, expanding `~` in the path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();
        let path = PathBuf::from(expanded);
        let raw = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self =
            toml::from_str(&raw).map_err(|source| ConfigError::Parse { path, source })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the given path when present, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) if path.exists() => Self::load(path),
            Some(path) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            }),
            None => Ok(Self::default()),
        }
    }

    /// Write the configuration as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, raw).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.ocr_providers.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one OCR provider is required".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_a_provider() {
        let config = PipelineConfig::default();
        assert!(!config.ocr_providers.is_empty());
        assert_eq!(config.max_retries, DEFAULT_MAX_RETRIES);
    }

    #[test]
    fn toml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bindery.toml");
        let mut config = PipelineConfig::default();
        config.ocr_providers = vec!["tesseract".into(), "vision".into()];
        config
            .phase_models
            .insert("polish".into(), "large-model".into());
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.ocr_providers, config.ocr_providers);
        assert_eq!(
            loaded.phase_models.get("polish").map(String::as_str),
            Some("large-model")
        );
    }

    #[test]
    fn empty_provider_list_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "ocr_providers = []\n").unwrap();
        assert!(PipelineConfig::load(&path).is_err());
    }
}
