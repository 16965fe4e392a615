//! Song recommendations from how the listener feels, what they are doing and
//! what they like to hear.
//!
//! Core modules:
//! - [`selection`] - The closed Emotion / Event / Genre enumerations
//! - [`encoder`] - One-hot encoding of a selection
//! - [`features`] - The twelve audio features and their normalization
//! - [`dataset`] - Training set synthesis from a labeled corpus
//! - [`model`] - Regression network, persistence stores, model lifecycle
//! - [`prediction`] - Noisy prediction and post-processing
//! - [`search`] - Widening catalog search, seeds, catalog client
//!
//! ### Supporting Modules
//!
//! - [`training`] - Corpus sources and the single-flight trainer
//! - [`recommender`] - The end-to-end recommendation pipeline
//! - [`config`] - Settings file and data directory management
//! - [`cli`] - Command-line interface definitions with clap integration
//! - [`completion`] - Shell completion generation
//! - [`error`] - Error taxonomy
//!
//! ## Quick Start Example
//!
//! ```no_run
//! use moodtune::model::store::FileModelStore;
//! use moodtune::model::{ModelConfig, RegressionModel};
//! use moodtune::prediction::predict_with_noise;
//! use moodtune::encoder::encode;
//! use moodtune::selection::{Emotion, Event, Selection};
//! use rand::SeedableRng;
//!
//! let mut rng = rand::rngs::StdRng::seed_from_u64(7);
//! let store = FileModelStore::new(moodtune::config::get_model_path()?);
//! let model = RegressionModel::load_or_build(&store, ModelConfig::default(), &mut rng);
//!
//! let selection = Selection::new(Some(Emotion::Happy), Some(Event::Vacation), None);
//! let features = predict_with_noise(&model, &encode(&selection), 0.05, &mut rng)?;
//! println!("{features}");
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! ## Encoding
//!
//! Version 1 encodes a selection as 101 positions: 25 emotions, then 25
//! events, then 51 genres. An absent axis leaves its segment all zero. The
//! version and widths are written into every saved model and checked on load,
//! so an artifact trained against a different member list is rejected rather
//! than silently misread.
//!
//! ## Search
//!
//! Predictions are point estimates. The catalog is asked for tracks inside a
//! window around each feature; every empty answer widens the windows
//! geometrically, up to five attempts.

pub mod cli;
pub mod completion;
pub mod config;
pub mod dataset;
pub mod encoder;
pub mod error;
pub mod features;
pub mod model;
pub mod prediction;
pub mod recommender;
pub mod search;
pub mod selection;
pub mod training;

pub use error::{RecommendError, Result};
