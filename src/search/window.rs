//! Target/min/max windows around a predicted feature vector.
//!
//! Every attempt rebuilds the query from the same point estimate, widening the
//! half-widths by `expansion_factor^(attempt - 1)`. Loudness has its own,
//! steeper factor and an asymmetric window: quieter tracks are tolerated more
//! than louder ones, and the upper edge never rises above 0 dB.

use super::catalog::SeedSet;
use crate::features::{AudioFeature, AudioFeatures, FEATURE_COUNT};
use serde::{Deserialize, Serialize};

/// Initial half-widths and per-attempt growth.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Acousticness, danceability, energy, instrumentalness, liveness,
    /// speechiness, valence.
    pub continuous_delta: f64,
    pub tempo_delta: f64,
    /// Key, mode, time signature.
    pub ordinal_step: f64,
    pub loudness_below: f64,
    pub loudness_above: f64,
    pub expansion_factor: f64,
    pub loudness_expansion_factor: f64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            continuous_delta: 0.05,
            tempo_delta: 10.0,
            ordinal_step: 1.0,
            loudness_below: 3.0,
            loudness_above: 1.5,
            expansion_factor: 1.5,
            loudness_expansion_factor: 2.0,
        }
    }
}

/// How a feature's window is shaped.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Tolerance {
    Ordinal { step: f64 },
    Symmetric { delta: f64 },
    Asymmetric { below: f64, above: f64 },
}

impl WindowConfig {
    fn tolerance(&self, feature: AudioFeature) -> Tolerance {
        match feature {
            AudioFeature::Key | AudioFeature::Mode | AudioFeature::TimeSignature => {
                Tolerance::Ordinal { step: self.ordinal_step }
            }
            AudioFeature::Tempo => Tolerance::Symmetric { delta: self.tempo_delta },
            AudioFeature::Loudness => Tolerance::Asymmetric {
                below: self.loudness_below,
                above: self.loudness_above,
            },
            _ => Tolerance::Symmetric { delta: self.continuous_delta },
        }
    }

    /// Growth multiplier for 1-based `attempt`.
    #[must_use]
    pub fn scale(&self, feature: AudioFeature, attempt: u32) -> f64 {
        let factor = if feature == AudioFeature::Loudness {
            self.loudness_expansion_factor
        } else {
            self.expansion_factor
        };
        factor.powi(attempt.saturating_sub(1) as i32)
    }
}

/// One feature's acceptable range for a single attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureWindow {
    pub feature: AudioFeature,
    pub target: f64,
    pub min: f64,
    pub max: f64,
}

impl FeatureWindow {
    fn build(feature: AudioFeature, point: f64, attempt: u32, config: &WindowConfig) -> Self {
        let bounds = feature.bounds();
        let target = bounds.clamp(point);
        let scale = config.scale(feature, attempt);

        let (min, max) = match config.tolerance(feature) {
            Tolerance::Ordinal { step } => {
                let reach = step * scale;
                ((target - reach).floor(), (target + reach).ceil())
            }
            Tolerance::Symmetric { delta } => (target - delta * scale, target + delta * scale),
            Tolerance::Asymmetric { below, above } => {
                (target - below * scale, (target + above * scale).min(0.0))
            }
        };

        Self {
            feature,
            target,
            min: bounds.clamp(min),
            max: bounds.clamp(max),
        }
    }

    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        (self.min..=self.max).contains(&value)
    }

    fn format(&self, value: f64) -> String {
        if self.feature.is_integral() {
            format!("{value:.0}")
        } else {
            format!("{value:.4}")
        }
    }
}

/// Everything one recommendation request carries.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationQuery {
    pub attempt: u32,
    pub limit: usize,
    pub market: Option<String>,
    pub seeds: SeedSet,
    pub windows: [FeatureWindow; FEATURE_COUNT],
}

impl RecommendationQuery {
    #[must_use]
    pub fn build(
        features: &AudioFeatures,
        attempt: u32,
        config: &WindowConfig,
        seeds: &SeedSet,
        limit: usize,
        market: Option<&str>,
    ) -> Self {
        let windows = AudioFeature::ALL
            .map(|feature| FeatureWindow::build(feature, features.get(feature), attempt, config));
        Self {
            attempt,
            limit,
            market: market.map(str::to_string),
            seeds: seeds.clone(),
            windows,
        }
    }

    #[must_use]
    pub fn window(&self, feature: AudioFeature) -> &FeatureWindow {
        &self.windows[feature.index()]
    }

    /// Query-string pairs in the catalog's `target_*`/`min_*`/`max_*` shape.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("limit".to_string(), self.limit.to_string())];
        if let Some(market) = &self.market {
            pairs.push(("market".to_string(), market.clone()));
        }
        pairs.extend(self.seeds.to_query_pairs());
        for window in &self.windows {
            let name = window.feature.api_name();
            pairs.push((format!("target_{name}"), window.format(window.target)));
            pairs.push((format!("min_{name}"), window.format(window.min)));
            pairs.push((format!("max_{name}"), window.format(window.max)));
        }
        pairs
    }
}
