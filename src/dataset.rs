//! # Training Data Synthesis
//!
//! Turns the labeled feature corpus into `(input, target)` pairs for the model.
//!
//! ## Corpus format
//!
//! ```text
//! category,acousticness,danceability,energy,instrumentalness,key,liveness,loudness,mode,speechiness,tempo,time_signature,valence
//! Happy,0.12,0.71,0.80,0.01,5,0.15,-5.2,1,0.05,122.0,4,0.85
//! ...
//! ```
//!
//! The first column is a human label and is always dropped. Two row layouts
//! are accepted, told apart by row count alone:
//!
//! - **Per position** (at most 101 rows): data row `i` describes encoding
//!   position `i` (emotions, then events, then genres) and is replicated below.
//! - **Per example** (exactly `101 * pure_replicas + 10 * combination_replicas`
//!   rows): every row is already one example, paired in order with the inputs
//!   the synthesis below would generate.
//!
//! Any other row count is a `Corpus` error. Every cell after the label must
//! be a finite number.
//!
//! ## Synthesis
//!
//! - **Pure examples**: one hot bit per position that has a corpus row,
//!   repeated `pure_replicas` times.
//! - **Curated combinations**: hand-picked (emotion, event) pairs with no
//!   genre, repeated `combination_replicas` times. Their target is the mean of
//!   the two constituent rows; a combination is skipped when either row is
//!   missing from the corpus.
//!
//! Balance between the two groups comes only from the replica counts.

use crate::encoder::{self, EncodedVector, ENCODED_WIDTH};
use crate::error::{RecommendError, Result};
use crate::features::{AudioFeatures, FEATURE_COUNT};
use crate::selection::{Emotion, Event, Selection};
use log::{debug, warn};

/// Hand-picked emotion/event pairs that teach the model how axes combine.
pub const CURATED_COMBINATIONS: &[(Emotion, Event)] = &[
    (Emotion::Happy, Event::Vacation),
    (Emotion::Sad, Event::Relaxation),
    (Emotion::Angry, Event::Workout),
    (Emotion::Calm, Event::Meditation),
    (Emotion::Excited, Event::Party),
    (Emotion::Calm, Event::BeachDay),
    (Emotion::Love, Event::Date),
    (Emotion::Excited, Event::Running),
    (Emotion::Calm, Event::Study),
    (Emotion::Nostalgic, Event::Roadtrip),
];

/// Replication counts for the two example groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynthesisConfig {
    pub pure_replicas: usize,
    pub combination_replicas: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            pure_replicas: 100,
            combination_replicas: 100,
        }
    }
}

/// One labeled corpus row, raw (not normalized).
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusRow {
    pub label: String,
    pub features: AudioFeatures,
}

/// Parallel input/target sequences. Targets are normalized.
#[derive(Debug, Clone, Default)]
pub struct TrainingSet {
    pub inputs: Vec<EncodedVector>,
    pub targets: Vec<AudioFeatures>,
}

impl TrainingSet {
    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Assemble a set, failing with `DatasetMismatch` when lengths differ.
    pub fn from_parts(inputs: Vec<EncodedVector>, targets: Vec<AudioFeatures>) -> Result<Self> {
        if inputs.len() != targets.len() {
            return Err(RecommendError::DatasetMismatch {
                inputs: inputs.len(),
                targets: targets.len(),
            });
        }
        Ok(Self { inputs, targets })
    }
}

/// Parse the corpus text. Blank lines are ignored; `\r\n` endings are fine.
pub fn parse_corpus(csv: &str) -> Result<Vec<CorpusRow>> {
    let mut lines = csv
        .lines()
        .map(str::trim)
        .enumerate()
        .filter(|(_, line)| !line.is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| RecommendError::Corpus("corpus is empty".to_string()))?;
    let header_columns = header.split(',').count();
    if header_columns != FEATURE_COUNT + 1 {
        warn!(
            "Corpus header has {header_columns} columns, expected {}",
            FEATURE_COUNT + 1
        );
    }

    lines
        .map(|(line_no, line)| parse_row(line_no + 1, line))
        .collect()
}

fn parse_row(line_no: usize, line: &str) -> Result<CorpusRow> {
    let mut columns = line.split(',').map(str::trim);
    let label = columns.next().unwrap_or_default().to_string();

    let values = columns
        .map(|cell| {
            match cell.parse::<f64>() {
                Ok(value) if value.is_finite() => Ok(value),
                Ok(_) => Err(RecommendError::Corpus(format!(
                    "line {line_no}: `{cell}` is not a finite number"
                ))),
                Err(_) => Err(RecommendError::Corpus(format!(
                    "line {line_no}: `{cell}` is not a number"
                ))),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let features = AudioFeatures::from_slice(&values).ok_or_else(|| {
        RecommendError::Corpus(format!(
            "line {line_no}: expected {FEATURE_COUNT} feature columns, found {}",
            values.len()
        ))
    })?;

    Ok(CorpusRow { label, features })
}

/// Parse the corpus and synthesize the full training set.
pub fn build_training_set(csv: &str, config: &SynthesisConfig) -> Result<TrainingSet> {
    let rows = parse_corpus(csv)?;
    synthesize(&rows, config)
}

/// Synthesize pure and curated examples from already-parsed rows.
pub fn synthesize(rows: &[CorpusRow], config: &SynthesisConfig) -> Result<TrainingSet> {
    if rows.len() <= ENCODED_WIDTH {
        return synthesize_per_position(rows, config);
    }

    let per_example = ENCODED_WIDTH * config.pure_replicas
        + CURATED_COMBINATIONS.len() * config.combination_replicas;
    if rows.len() != per_example {
        return Err(RecommendError::Corpus(format!(
            "corpus has {} rows: expected at most {ENCODED_WIDTH} (one per position) \
             or exactly {per_example} (one per example)",
            rows.len()
        )));
    }
    pair_per_example(rows, config)
}

/// Rows already expanded to one per example: only the inputs are generated.
fn pair_per_example(rows: &[CorpusRow], config: &SynthesisConfig) -> Result<TrainingSet> {
    let mut inputs = Vec::with_capacity(rows.len());
    for position in 0..ENCODED_WIDTH {
        let input = EncodedVector::one_hot(position)?;
        inputs.extend(std::iter::repeat(input).take(config.pure_replicas));
    }
    for (emotion, event) in CURATED_COMBINATIONS {
        let input = encoder::encode(&Selection::new(Some(*emotion), Some(*event), None));
        inputs.extend(std::iter::repeat(input).take(config.combination_replicas));
    }

    let targets = rows.iter().map(|row| row.features.normalized()).collect();
    debug!("Paired {} per-example corpus rows with their inputs", rows.len());
    TrainingSet::from_parts(inputs, targets)
}

fn synthesize_per_position(addressable: &[CorpusRow], config: &SynthesisConfig) -> Result<TrainingSet> {
    let mut inputs = Vec::new();
    let mut targets = Vec::new();

    for (position, row) in addressable.iter().enumerate() {
        let input = EncodedVector::one_hot(position)?;
        let target = row.features.normalized();
        for _ in 0..config.pure_replicas {
            inputs.push(input.clone());
            targets.push(target);
        }
    }

    let mut used_combinations = 0;
    for (emotion, event) in CURATED_COMBINATIONS {
        let emotion_row = addressable.get(encoder::EMOTION_OFFSET + emotion.ordinal());
        let event_row = addressable.get(encoder::EVENT_OFFSET + event.ordinal());
        let (Some(emotion_row), Some(event_row)) = (emotion_row, event_row) else {
            debug!("Skipping {emotion}+{event}: corpus row missing");
            continue;
        };

        let input = encoder::encode(&Selection::new(Some(*emotion), Some(*event), None));
        let target = mean(&emotion_row.features, &event_row.features).normalized();
        for _ in 0..config.combination_replicas {
            inputs.push(input.clone());
            targets.push(target);
        }
        used_combinations += 1;
    }

    debug!(
        "Synthesized {} examples from {} rows and {used_combinations} combinations",
        inputs.len(),
        addressable.len()
    );

    TrainingSet::from_parts(inputs, targets)
}

fn mean(a: &AudioFeatures, b: &AudioFeatures) -> AudioFeatures {
    let mut out = [0.0; FEATURE_COUNT];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = (a.0[i] + b.0[i]) / 2.0;
    }
    AudioFeatures(out)
}
