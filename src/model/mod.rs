//! # Regression Model
//!
//! A dense network mapping an encoded selection (101 inputs) to twelve
//! normalized audio features.
//!
//! ## Lifecycle
//!
//! ```text
//! absent ──build──▶ Built ──fit──▶ Trained ──save──▶ Persisted
//!    └────load────▶ Loaded ──fit──▶ Trained
//! ```
//!
//! A model value only exists once it has been built or loaded, so fitting an
//! absent model cannot be expressed. Loading re-creates the optimizer with the
//! configured learning rate and loss; optimizer moments are not persisted.
//!
//! ## Artifact
//!
//! JSON holding a format number, the encoding version, the layer shapes and
//! weights. An artifact whose encoding version or input width does not match
//! the current vocabularies is rejected with `ModelLoad` and replaced by a
//! fresh build in [`RegressionModel::load_or_build`].

pub mod network;
pub mod store;

use crate::dataset::TrainingSet;
use crate::encoder::{EncodedVector, ENCODED_WIDTH};
use crate::error::{RecommendError, Result};
use crate::features::{AudioFeatures, FEATURE_COUNT};
use crate::selection::ENCODING_VERSION;
use log::{debug, info, warn};
use ndarray::{Array2, Axis};
use network::{mean_absolute_error, Adam, Loss, Network, Regularization};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use store::ModelStore;

const ARTIFACT_FORMAT: u32 = 1;

/// Topology and compile-time settings of a fresh model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub hidden_layers: Vec<usize>,
    pub learning_rate: f64,
    pub dropout: f64,
    pub l2: f64,
    pub loss: Loss,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 64, 32],
            learning_rate: 0.01,
            dropout: 0.0,
            l2: 0.0,
            loss: Loss::default(),
        }
    }
}

impl ModelConfig {
    fn regularization(&self) -> Regularization {
        Regularization {
            dropout: self.dropout,
            l2: self.l2,
        }
    }
}

/// Mini-batch settings for one `fit` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOptions {
    pub epochs: usize,
    pub batch_size: usize,
    /// Fraction of the (shuffled) set held out for validation, `0.0` for none.
    pub validation_split: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 32,
            validation_split: 0.1,
        }
    }
}

/// Metrics reported at the end of every epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EpochLog {
    /// Zero-based epoch number.
    pub epoch: usize,
    pub loss: f64,
    pub mae: f64,
    pub val_loss: Option<f64>,
    pub val_mae: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingLog {
    pub epochs: Vec<EpochLog>,
}

impl TrainingLog {
    #[must_use]
    pub fn final_loss(&self) -> Option<f64> {
        self.epochs.last().map(|e| e.loss)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// Freshly constructed, random weights.
    Built,
    /// Restored from a store.
    Loaded,
    /// Fitted in this session, not yet saved.
    Trained,
    /// Saved after the last fit.
    Persisted,
}

#[derive(Serialize, Deserialize)]
struct ModelArtifact {
    format: u32,
    encoding_version: u32,
    input_width: usize,
    output_width: usize,
    network: Network,
}

#[derive(Debug, Clone)]
pub struct RegressionModel {
    network: Network,
    config: ModelConfig,
    optimizer: Adam,
    state: ModelState,
}

impl RegressionModel {
    /// Fresh topology with Glorot-initialized weights.
    pub fn build<R: Rng + ?Sized>(config: ModelConfig, rng: &mut R) -> Self {
        let network = Network::new(ENCODED_WIDTH, &config.hidden_layers, FEATURE_COUNT, rng);
        info!(
            "Built model {ENCODED_WIDTH} → {:?} → {FEATURE_COUNT}",
            config.hidden_layers
        );
        Self::compile(network, config, ModelState::Built)
    }

    fn compile(network: Network, config: ModelConfig, state: ModelState) -> Self {
        let optimizer = Adam::new(config.learning_rate, &network.layers);
        Self {
            network,
            config,
            optimizer,
            state,
        }
    }

    /// Decode an artifact. The stored topology wins over `config.hidden_layers`.
    pub fn from_bytes(bytes: &[u8], config: ModelConfig) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_slice(bytes)
            .map_err(|e| RecommendError::ModelLoad(format!("unreadable artifact: {e}")))?;

        if artifact.format != ARTIFACT_FORMAT {
            return Err(RecommendError::ModelLoad(format!(
                "artifact format {} not supported",
                artifact.format
            )));
        }
        if artifact.encoding_version != ENCODING_VERSION {
            return Err(RecommendError::ModelLoad(format!(
                "artifact encoding version {} does not match {ENCODING_VERSION}",
                artifact.encoding_version
            )));
        }
        let network = artifact.network;
        if !network.is_consistent()
            || network.input_width() != ENCODED_WIDTH
            || network.output_width() != FEATURE_COUNT
            || artifact.input_width != ENCODED_WIDTH
            || artifact.output_width != FEATURE_COUNT
        {
            return Err(RecommendError::ModelLoad(format!(
                "artifact shape {} → {} does not match {ENCODED_WIDTH} → {FEATURE_COUNT}",
                network.input_width(),
                network.output_width()
            )));
        }

        Ok(Self::compile(network, config, ModelState::Loaded))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let artifact = ModelArtifact {
            format: ARTIFACT_FORMAT,
            encoding_version: ENCODING_VERSION,
            input_width: self.network.input_width(),
            output_width: self.network.output_width(),
            network: self.network.clone(),
        };
        serde_json::to_vec(&artifact)
            .map_err(|e| RecommendError::TrainingFailure(format!("could not serialize model: {e}")))
    }

    /// Restore the stored model, or build a fresh one when the store is empty,
    /// unreadable or holds an incompatible artifact.
    pub fn load_or_build<R: Rng + ?Sized>(
        store: &dyn ModelStore,
        config: ModelConfig,
        rng: &mut R,
    ) -> Self {
        match Self::load(store, config.clone()) {
            Ok(Some(model)) => {
                info!("Loaded model from {}", store.describe());
                model
            }
            Ok(None) => {
                debug!("No model in {}, building a fresh one", store.describe());
                Self::build(config, rng)
            }
            Err(err) => {
                warn!("{err}; building a fresh model");
                Self::build(config, rng)
            }
        }
    }

    /// Load without fallback. `Ok(None)` when the store is empty.
    pub fn load(store: &dyn ModelStore, config: ModelConfig) -> Result<Option<Self>> {
        let bytes = store
            .load()
            .map_err(|e| RecommendError::ModelLoad(format!("{}: {e}", store.describe())))?;
        bytes.map(|b| Self::from_bytes(&b, config)).transpose()
    }

    /// Write the current weights. Only this call moves the model to `Persisted`.
    pub fn save(&mut self, store: &dyn ModelStore) -> Result<()> {
        let bytes = self.to_bytes()?;
        store.save(&bytes)?;
        info!("Saved model to {}", store.describe());
        self.state = ModelState::Persisted;
        Ok(())
    }

    #[must_use]
    pub fn state(&self) -> ModelState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    #[must_use]
    pub fn network(&self) -> &Network {
        &self.network
    }

    /// Normalized prediction for one input. Never adds noise.
    #[must_use]
    pub fn predict(&self, input: &EncodedVector) -> AudioFeatures {
        let row = Array2::from_shape_fn((1, input.len()), |(_, j)| input.as_slice()[j]);
        let output = self.network.forward(&row);
        let mut features = [0.0; FEATURE_COUNT];
        for (slot, value) in features.iter_mut().zip(output.row(0).iter()) {
            *slot = *value;
        }
        AudioFeatures(features)
    }

    /// Train on `set` in shuffled mini-batches.
    ///
    /// `on_epoch` runs after every epoch; returning `ControlFlow::Break` stops
    /// training with `Cancelled`. A non-finite loss aborts with
    /// `TrainingFailure`. In both cases the in-memory weights are partially
    /// updated and the caller should discard this model; nothing is written to
    /// a store here.
    pub fn fit<R, F>(
        &mut self,
        set: &TrainingSet,
        options: &FitOptions,
        rng: &mut R,
        mut on_epoch: F,
    ) -> Result<TrainingLog>
    where
        R: Rng + ?Sized,
        F: FnMut(&EpochLog) -> ControlFlow<()>,
    {
        if set.is_empty() {
            return Err(RecommendError::TrainingFailure("training set is empty".to_string()));
        }
        if options.batch_size == 0 {
            return Err(RecommendError::TrainingFailure("batch size must be positive".to_string()));
        }
        if options.epochs == 0 {
            return Err(RecommendError::TrainingFailure("epoch count must be positive".to_string()));
        }
        if let Some(bad) = set.inputs.iter().find(|v| v.len() != self.network.input_width()) {
            return Err(RecommendError::TrainingFailure(format!(
                "input width {} does not match model width {}",
                bad.len(),
                self.network.input_width()
            )));
        }

        let (inputs, targets) = to_matrices(set);
        let mut order: Vec<usize> = (0..set.len()).collect();
        order.shuffle(rng);

        let split = options.validation_split.clamp(0.0, 0.9);
        let validation_len = (set.len() as f64 * split).floor() as usize;
        let (train_idx, val_idx) = order.split_at(set.len() - validation_len);
        let mut train_idx = train_idx.to_vec();
        let val = (!val_idx.is_empty())
            .then(|| (inputs.select(Axis(0), val_idx), targets.select(Axis(0), val_idx)));

        let loss = self.config.loss;
        let regularization = self.config.regularization();
        let mut log = TrainingLog::default();

        for epoch in 0..options.epochs {
            train_idx.shuffle(rng);
            let mut loss_sum = 0.0;
            let mut mae_sum = 0.0;

            for batch in train_idx.chunks(options.batch_size) {
                let x = inputs.select(Axis(0), batch);
                let y = targets.select(Axis(0), batch);
                let (batch_loss, prediction) = self.network.train_batch(
                    &x,
                    &y,
                    &loss,
                    &mut self.optimizer,
                    &regularization,
                    rng,
                );
                let weight = batch.len() as f64;
                loss_sum += batch_loss * weight;
                mae_sum += mean_absolute_error(&prediction, &y) * weight;
            }

            let seen = train_idx.len().max(1) as f64;
            let (val_loss, val_mae) = match &val {
                Some((x, y)) => {
                    let prediction = self.network.forward(x);
                    (Some(loss.value(&prediction, y)), Some(mean_absolute_error(&prediction, y)))
                }
                None => (None, None),
            };
            let entry = EpochLog {
                epoch,
                loss: loss_sum / seen,
                mae: mae_sum / seen,
                val_loss,
                val_mae,
            };

            if !entry.loss.is_finite() {
                return Err(RecommendError::TrainingFailure(format!(
                    "loss became non-finite at epoch {epoch}"
                )));
            }

            debug!("Epoch {epoch}: loss {:.5} mae {:.4}", entry.loss, entry.mae);
            log.epochs.push(entry);
            if on_epoch(&entry).is_break() {
                return Err(RecommendError::Cancelled);
            }
        }

        self.state = ModelState::Trained;
        Ok(log)
    }
}

fn to_matrices(set: &TrainingSet) -> (Array2<f64>, Array2<f64>) {
    let width = set.inputs.first().map_or(0, EncodedVector::len);
    let inputs = Array2::from_shape_fn((set.len(), width), |(i, j)| set.inputs[i].as_slice()[j]);
    let targets = Array2::from_shape_fn((set.len(), FEATURE_COUNT), |(i, j)| set.targets[i].0[j]);
    (inputs, targets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{synthesize, CorpusRow, SynthesisConfig};
    use crate::encoder::encode;
    use crate::selection::{Emotion, Selection};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use store::MemoryModelStore;

    fn small_config() -> ModelConfig {
        ModelConfig {
            hidden_layers: vec![16],
            ..ModelConfig::default()
        }
    }

    fn tiny_set() -> TrainingSet {
        let rows = vec![
            CorpusRow {
                label: "Happy".to_string(),
                features: AudioFeatures([0.1, 0.8, 0.9, 0.0, 7.0, 0.2, -5.0, 1.0, 0.05, 125.0, 4.0, 0.9]),
            },
            CorpusRow {
                label: "Sad".to_string(),
                features: AudioFeatures([0.8, 0.3, 0.2, 0.1, 2.0, 0.1, -14.0, 0.0, 0.03, 80.0, 4.0, 0.2]),
            },
        ];
        synthesize(
            &rows,
            &SynthesisConfig {
                pure_replicas: 20,
                combination_replicas: 0,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_build_state_and_shape() {
        let mut rng = StdRng::seed_from_u64(11);
        let model = RegressionModel::build(ModelConfig::default(), &mut rng);
        assert_eq!(model.state(), ModelState::Built);
        assert_eq!(model.network().input_width(), 101);
        assert_eq!(model.network().output_width(), 12);
        assert_eq!(model.network().layers.len(), 4);
    }

    #[test]
    fn test_fit_reports_every_epoch_and_learns() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut model = RegressionModel::build(small_config(), &mut rng);
        let set = tiny_set();
        let options = FitOptions {
            epochs: 30,
            batch_size: 8,
            validation_split: 0.1,
        };

        let mut seen = Vec::new();
        let log = model
            .fit(&set, &options, &mut rng, |entry| {
                seen.push(entry.epoch);
                ControlFlow::Continue(())
            })
            .unwrap();

        assert_eq!(seen, (0..30).collect::<Vec<_>>());
        assert_eq!(log.epochs.len(), 30);
        assert!(log.epochs[0].val_loss.is_some());
        assert!(log.final_loss().unwrap() < log.epochs[0].loss);
        assert_eq!(model.state(), ModelState::Trained);

        let happy = model.predict(&encode(&Selection::new(Some(Emotion::Happy), None, None)));
        let sad = model.predict(&encode(&Selection::new(Some(Emotion::Sad), None, None)));
        assert!(happy.0[1] > sad.0[1], "danceability should separate the rows");
    }

    #[test]
    fn test_fit_stops_when_callback_breaks() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = RegressionModel::build(small_config(), &mut rng);
        let options = FitOptions {
            epochs: 10,
            batch_size: 4,
            validation_split: 0.0,
        };
        let mut calls = 0;
        let err = model
            .fit(&tiny_set(), &options, &mut rng, |_| {
                calls += 1;
                ControlFlow::Break(())
            })
            .unwrap_err();
        assert!(matches!(err, RecommendError::Cancelled));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_fit_rejects_empty_set() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = RegressionModel::build(small_config(), &mut rng);
        let err = model
            .fit(&TrainingSet::default(), &FitOptions::default(), &mut rng, |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, RecommendError::TrainingFailure(_)));
    }

    #[test]
    fn test_fit_rejects_zero_epochs() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut model = RegressionModel::build(small_config(), &mut rng);
        let options = FitOptions {
            epochs: 0,
            ..FitOptions::default()
        };
        let err = model
            .fit(&tiny_set(), &options, &mut rng, |_| ControlFlow::Continue(()))
            .unwrap_err();
        assert!(matches!(err, RecommendError::TrainingFailure(_)));
        assert_eq!(model.state(), ModelState::Built);
    }

    #[test]
    fn test_save_then_load_predicts_identically() {
        let mut rng = StdRng::seed_from_u64(9);
        let store = MemoryModelStore::new();
        let mut model = RegressionModel::build(small_config(), &mut rng);
        model.save(&store).unwrap();
        assert_eq!(model.state(), ModelState::Persisted);

        let loaded = RegressionModel::load(&store, small_config()).unwrap().unwrap();
        assert_eq!(loaded.state(), ModelState::Loaded);

        let input = encode(&Selection::new(Some(Emotion::Calm), None, None));
        assert_eq!(model.predict(&input), loaded.predict(&input));
    }

    #[test]
    fn test_corrupt_artifact_falls_back_to_fresh_build() {
        let mut rng = StdRng::seed_from_u64(4);
        let store = MemoryModelStore::with_bytes(b"{not json".to_vec());
        assert!(matches!(
            RegressionModel::load(&store, small_config()),
            Err(RecommendError::ModelLoad(_))
        ));

        let model = RegressionModel::load_or_build(&store, small_config(), &mut rng);
        assert_eq!(model.state(), ModelState::Built);
    }

    #[test]
    fn test_incompatible_encoding_version_is_rejected() {
        let mut rng = StdRng::seed_from_u64(4);
        let model = RegressionModel::build(small_config(), &mut rng);
        let mut value: serde_json::Value = serde_json::from_slice(&model.to_bytes().unwrap()).unwrap();
        value["encoding_version"] = serde_json::json!(ENCODING_VERSION + 1);
        let bytes = serde_json::to_vec(&value).unwrap();

        let err = RegressionModel::from_bytes(&bytes, small_config()).unwrap_err();
        assert!(err.to_string().contains("encoding version"));
    }
}
