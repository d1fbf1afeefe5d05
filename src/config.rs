use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::aggregator::AggregatorConfig;
use crate::app_dirs::AppDirs;
use crate::clock::Millis;
use crate::error::{Result, TypometerError};
use crate::patterns::DEFAULT_SEQUENCE_LENGTHS;
use crate::typing_policy::BackspacePolicy;
use crate::window::{
    WindowConfig, DEFAULT_MAX_INSERT_CHARS, DEFAULT_TREND_THRESHOLD, DEFAULT_WINDOW_MS,
};

pub const DEFAULT_MIN_SAMPLES: i64 = 5;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub user: String,
    pub window_ms: Millis,
    pub max_insert_chars: usize,
    pub trend_threshold: u32,
    pub min_samples: i64,
    pub sequence_lengths: Vec<usize>,
    pub backspace_policy: BackspacePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            user: "default".to_string(),
            window_ms: DEFAULT_WINDOW_MS,
            max_insert_chars: DEFAULT_MAX_INSERT_CHARS,
            trend_threshold: DEFAULT_TREND_THRESHOLD,
            min_samples: DEFAULT_MIN_SAMPLES,
            sequence_lengths: DEFAULT_SEQUENCE_LENGTHS.to_vec(),
            backspace_policy: BackspacePolicy::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.window_ms <= 0 {
            return Err(TypometerError::Config(format!(
                "window_ms must be positive, got {}",
                self.window_ms
            )));
        }
        if self.max_insert_chars == 0 {
            return Err(TypometerError::Config(
                "max_insert_chars must be at least 1".to_string(),
            ));
        }
        if self.min_samples < 1 {
            return Err(TypometerError::Config(format!(
                "min_samples must be at least 1, got {}",
                self.min_samples
            )));
        }
        Ok(())
    }

    pub fn window(&self) -> WindowConfig {
        WindowConfig {
            window_ms: self.window_ms,
            max_insert_chars: self.max_insert_chars,
            trend_threshold: self.trend_threshold,
        }
    }

    pub fn aggregator(&self) -> AggregatorConfig {
        AggregatorConfig {
            min_samples: self.min_samples,
            sequence_lengths: self.sequence_lengths.clone(),
        }
    }
}

pub trait ConfigStore {
    fn load(&self) -> Config;
    fn save(&self, cfg: &Config) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            path: AppDirs::config_path(),
        }
    }

    pub fn with_path<P: AsRef<Path>>(p: P) -> Self {
        Self {
            path: p.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Default for FileConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for FileConfigStore {
    /// Missing or unreadable files fall back to defaults
    fn load(&self) -> Config {
        let Ok(bytes) = fs::read(&self.path) else {
            return Config::default();
        };
        match serde_json::from_slice::<Config>(&bytes) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "ignoring unreadable config");
                Config::default()
            }
        }
    }

    fn save(&self, cfg: &Config) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = serde_json::to_vec_pretty(cfg)?;
        fs::write(&self.path, data)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::tempdir;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config::default();
        store.save(&cfg).unwrap();
        let loaded = store.load();
        assert_eq!(cfg, loaded);
    }

    #[test]
    fn save_and_load_custom_config() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let store = FileConfigStore::with_path(&path);
        let cfg = Config {
            user: "mira".into(),
            window_ms: 30_000,
            max_insert_chars: 3,
            trend_threshold: 5,
            min_samples: 10,
            sequence_lengths: vec![2],
            backspace_policy: BackspacePolicy::ForgiveCorrected,
        };
        store.save(&cfg).unwrap();
        assert_eq!(cfg, store.load());
    }

    #[test]
    fn missing_or_corrupt_file_loads_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = FileConfigStore::with_path(&path);
        assert_eq!(store.load(), Config::default());

        fs::write(&path, b"{ not json").unwrap();
        assert_eq!(store.load(), Config::default());
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            br#"{"window_ms": 5000, "backspace_policy": "forgive-corrected"}"#,
        )
        .unwrap();

        let cfg = FileConfigStore::with_path(&path).load();
        assert_eq!(cfg.window_ms, 5_000);
        assert_eq!(cfg.backspace_policy, BackspacePolicy::ForgiveCorrected);
        assert_eq!(cfg.min_samples, DEFAULT_MIN_SAMPLES);
    }

    #[test]
    fn validate_rejects_bad_values() {
        assert!(Config::default().validate().is_ok());

        let cfg = Config {
            window_ms: 0,
            ..Config::default()
        };
        assert_matches!(cfg.validate(), Err(TypometerError::Config(_)));

        let cfg = Config {
            min_samples: 0,
            ..Config::default()
        };
        assert_matches!(cfg.validate(), Err(TypometerError::Config(_)));
    }

    #[test]
    fn derives_component_configs() {
        let cfg = Config::default();
        assert_eq!(cfg.window(), WindowConfig::default());
        assert_eq!(cfg.aggregator().min_samples, DEFAULT_MIN_SAMPLES);
        assert_eq!(cfg.aggregator().sequence_lengths, vec![2, 3]);
    }
}
