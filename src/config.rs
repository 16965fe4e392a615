//! # Configuration Module
//!
//! Settings file handling and data directory setup for moodtune.
//!
//! ## Data Storage
//!
//! The trained model lives in the platform-standard data directory:
//! - Linux: `~/.local/share/moodtune/`
//! - macOS: `~/Library/Application Support/moodtune/`
//! - Windows: `%APPDATA%\moodtune\`
//!
//! ## Settings File
//!
//! Optional TOML at `<config dir>/moodtune/config.toml`. Every key has a
//! default, so a missing file or a partial file is fine:
//!
//! ```toml
//! [model]
//! hidden_layers = [128, 64, 32]
//! learning_rate = 0.01
//!
//! [training]
//! corpus = "https://storage.example.com/training/data.csv"
//! epochs = 10
//!
//! [prediction]
//! noise_sigma = 0.05
//!
//! [search]
//! max_attempts = 5
//! track_count = 10
//!
//! [search.windows]
//! expansion_factor = 1.5
//!
//! [storage]
//! backend = "sqlite"
//! ```
//!
//! Command-line flags override whatever the file says.

use crate::dataset::SynthesisConfig;
use crate::model::{FitOptions, ModelConfig};
use crate::prediction::DEFAULT_NOISE_SIGMA;
use crate::recommender::RecommenderSettings;
use crate::search::spotify::{DEFAULT_ACCOUNTS_URL, DEFAULT_API_BASE};
use crate::search::SearchConfig;
use crate::training::TrainingSettings;
use anyhow::{bail, Context, Result};
use path_absolutize::Absolutize;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "moodtune";

/// Returns the platform-appropriate data directory, creating it if needed.
///
/// # Errors
///
/// This function will return an error if:
/// - The system data directory cannot be determined
/// - The moodtune subdirectory cannot be created due to permissions
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir().ok_or_else(|| {
        anyhow::anyhow!(
            "Could not determine system data directory. Please ensure your platform supports standard data directories."
        )
    })?;

    let app_dir = data_dir.join(APP_DIR);
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create moodtune data directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir)
}

/// Default location of the JSON model artifact.
pub fn get_model_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("model.json"))
}

/// Default location of the SQLite database.
pub fn get_db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("moodtune.db3"))
}

/// Default settings file location. Not created.
pub fn get_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not determine system config directory."))?;
    Ok(config_dir.join(APP_DIR).join("config.toml"))
}

/// Resolve a user-supplied path against the current directory.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    Ok(path
        .absolutize()
        .with_context(|| format!("Invalid path {}", path.display()))?
        .into_owned())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// A single JSON file, replaced atomically.
    #[default]
    File,
    /// A row in a SQLite database.
    Sqlite,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: StorageBackend,
    /// Overrides the default model file or database location.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSection {
    /// File path or `http(s)://` URL of the training CSV.
    pub corpus: Option<String>,
    pub epochs: usize,
    pub batch_size: usize,
    pub validation_split: f64,
    pub pure_replicas: usize,
    pub combination_replicas: usize,
    pub seed: Option<u64>,
}

impl Default for TrainingSection {
    fn default() -> Self {
        let fit = FitOptions::default();
        let synthesis = SynthesisConfig::default();
        Self {
            corpus: None,
            epochs: fit.epochs,
            batch_size: fit.batch_size,
            validation_split: fit.validation_split,
            pure_replicas: synthesis.pure_replicas,
            combination_replicas: synthesis.combination_replicas,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionSection {
    pub noise_sigma: f64,
    pub seed: Option<u64>,
}

impl Default for PredictionSection {
    fn default() -> Self {
        Self {
            noise_sigma: DEFAULT_NOISE_SIGMA,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogSection {
    pub api_base: String,
    /// Relay endpoint used to refresh expired access tokens.
    pub token_refresh_url: Option<String>,
    /// App client id, for refreshing directly when no relay is configured.
    pub client_id: Option<String>,
    pub accounts_url: String,
}

impl Default for CatalogSection {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            token_refresh_url: None,
            client_id: None,
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
        }
    }
}

/// Everything the settings file can hold.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelConfig,
    pub training: TrainingSection,
    pub prediction: PredictionSection,
    pub search: SearchConfig,
    pub catalog: CatalogSection,
    pub storage: StorageSettings,
}

impl Settings {
    /// Read `path`, or the default location when `None`. A missing file
    /// yields defaults; a malformed one is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => absolutize(path)?,
            None => get_config_path()?,
        };
        if !path.exists() {
            log::debug!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::from_toml(&text)
            .with_context(|| format!("Invalid settings file {}", path.display()))?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let settings: Self = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values that would make training or search meaningless.
    pub fn validate(&self) -> Result<()> {
        let m = &self.model;
        if m.hidden_layers.iter().any(|&units| units == 0) {
            bail!("model.hidden_layers entries must be positive");
        }
        if !(m.learning_rate.is_finite() && m.learning_rate > 0.0) {
            bail!("model.learning_rate must be positive, got {}", m.learning_rate);
        }
        if !(0.0..1.0).contains(&m.dropout) {
            bail!("model.dropout must be within [0, 1), got {}", m.dropout);
        }
        if !(m.l2.is_finite() && m.l2 >= 0.0) {
            bail!("model.l2 must be non-negative, got {}", m.l2);
        }

        let t = &self.training;
        if t.epochs == 0 || t.batch_size == 0 {
            bail!("training.epochs and training.batch_size must be positive");
        }
        if !(0.0..1.0).contains(&t.validation_split) {
            bail!("training.validation_split must be within [0, 1), got {}", t.validation_split);
        }

        let sigma = self.prediction.noise_sigma;
        if !(sigma.is_finite() && sigma >= 0.0) {
            bail!("prediction.noise_sigma must be non-negative, got {sigma}");
        }

        self.search.validate()?;
        Ok(())
    }

    pub fn training_settings(&self) -> TrainingSettings {
        TrainingSettings {
            model: self.model.clone(),
            synthesis: SynthesisConfig {
                pure_replicas: self.training.pure_replicas,
                combination_replicas: self.training.combination_replicas,
            },
            fit: FitOptions {
                epochs: self.training.epochs,
                batch_size: self.training.batch_size,
                validation_split: self.training.validation_split,
            },
            seed: self.training.seed,
        }
    }

    pub fn recommender_settings(&self) -> RecommenderSettings {
        RecommenderSettings {
            noise_sigma: self.prediction.noise_sigma,
            search: self.search.clone(),
        }
    }

    /// Where the model is stored, honoring `storage.path`.
    pub fn model_location(&self) -> Result<PathBuf> {
        match (&self.storage.path, self.storage.backend) {
            (Some(path), _) => absolutize(path),
            (None, StorageBackend::File) => get_model_path(),
            (None, StorageBackend::Sqlite) => get_db_path(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_get_data_dir_structure() {
        let dir = get_data_dir().expect("Should get valid data dir");
        assert!(dir.is_dir());
        assert_eq!(dir.file_name().unwrap(), "moodtune");
        assert!(get_model_path().unwrap().ends_with("moodtune/model.json"));
        assert!(get_db_path().unwrap().is_absolute());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            [search]
            max_attempts = 3

            [search.windows]
            expansion_factor = 2.0

            [storage]
            backend = "sqlite"
            "#,
        )
        .unwrap();

        assert_eq!(settings.search.max_attempts, 3);
        assert_eq!(settings.search.windows.expansion_factor, 2.0);
        assert_eq!(settings.search.windows.tempo_delta, 10.0);
        assert_eq!(settings.storage.backend, StorageBackend::Sqlite);
        assert_eq!(settings.model, ModelConfig::default());
        assert_eq!(settings.training.epochs, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(Settings::from_toml("[prediction]\nnoise_sigma = -0.1\n").is_err());
        assert!(Settings::from_toml("[training]\nvalidation_split = 1.0\n").is_err());
        assert!(Settings::from_toml("[search]\nmax_attempts = 0\n").is_err());
        assert!(Settings::from_toml("[model]\nlearning_rate = 0.0\n").is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let mut settings = Settings::default();
        settings.training.corpus = Some("data.csv".into());
        settings.catalog.token_refresh_url = Some("https://relay/refresh".into());
        settings.catalog.client_id = Some("app-id".into());
        let text = settings.to_toml().unwrap();
        assert_eq!(Settings::from_toml(&text).unwrap(), settings);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_explicit_storage_path_is_absolutized() {
        let mut settings = Settings::default();
        settings.storage.path = Some(PathBuf::from("relative/model.json"));
        let location = settings.model_location().unwrap();
        assert!(location.is_absolute());
        assert!(location.ends_with("relative/model.json"));
    }
}
