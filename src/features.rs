//! # Audio Features
//!
//! The twelve audio descriptors the model predicts, in their fixed order, and
//! the per-feature domain bounds used to move between raw catalog values and
//! the model's `[0, 1]` space.
//!
//! `normalize` performs no range checking: a corpus row outside the documented
//! bounds produces a value outside `[0, 1]`, and that value is kept as-is.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of predicted features.
pub const FEATURE_COUNT: usize = 12;

/// One audio descriptor. The discriminant is its column in every vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioFeature {
    Acousticness,
    Danceability,
    Energy,
    Instrumentalness,
    Key,
    Liveness,
    Loudness,
    Mode,
    Speechiness,
    Tempo,
    TimeSignature,
    Valence,
}

impl AudioFeature {
    pub const ALL: [AudioFeature; FEATURE_COUNT] = [
        AudioFeature::Acousticness,
        AudioFeature::Danceability,
        AudioFeature::Energy,
        AudioFeature::Instrumentalness,
        AudioFeature::Key,
        AudioFeature::Liveness,
        AudioFeature::Loudness,
        AudioFeature::Mode,
        AudioFeature::Speechiness,
        AudioFeature::Tempo,
        AudioFeature::TimeSignature,
        AudioFeature::Valence,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Name as used by the catalog API query parameters (`target_<name>`).
    #[must_use]
    pub const fn api_name(self) -> &'static str {
        match self {
            AudioFeature::Acousticness => "acousticness",
            AudioFeature::Danceability => "danceability",
            AudioFeature::Energy => "energy",
            AudioFeature::Instrumentalness => "instrumentalness",
            AudioFeature::Key => "key",
            AudioFeature::Liveness => "liveness",
            AudioFeature::Loudness => "loudness",
            AudioFeature::Mode => "mode",
            AudioFeature::Speechiness => "speechiness",
            AudioFeature::Tempo => "tempo",
            AudioFeature::TimeSignature => "time_signature",
            AudioFeature::Valence => "valence",
        }
    }

    #[must_use]
    pub const fn bounds(self) -> FeatureBounds {
        FEATURE_BOUNDS[self.index()]
    }

    /// Key, mode and time signature only take whole values.
    #[must_use]
    pub const fn is_integral(self) -> bool {
        matches!(
            self,
            AudioFeature::Key | AudioFeature::Mode | AudioFeature::TimeSignature
        )
    }

    /// Loudness is the only feature with a legitimately negative domain.
    #[must_use]
    pub const fn allows_negative(self) -> bool {
        matches!(self, AudioFeature::Loudness)
    }
}

impl fmt::Display for AudioFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.api_name())
    }
}

/// Closed domain `[min, max]` of one feature.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureBounds {
    pub min: f64,
    pub max: f64,
}

impl FeatureBounds {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    #[must_use]
    pub fn normalize(&self, value: f64) -> f64 {
        normalize(value, self.min, self.max)
    }

    #[must_use]
    pub fn denormalize(&self, value: f64) -> f64 {
        denormalize(value, self.min, self.max)
    }

    #[must_use]
    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }
}

/// Domain bounds, indexed like [`AudioFeature::ALL`].
pub const FEATURE_BOUNDS: [FeatureBounds; FEATURE_COUNT] = [
    FeatureBounds::new(0.0, 1.0),    // acousticness
    FeatureBounds::new(0.0, 1.0),    // danceability
    FeatureBounds::new(0.0, 1.0),    // energy
    FeatureBounds::new(0.0, 1.0),    // instrumentalness
    FeatureBounds::new(-1.0, 11.0),  // key
    FeatureBounds::new(0.0, 1.0),    // liveness
    FeatureBounds::new(-60.0, 0.0),  // loudness
    FeatureBounds::new(0.0, 1.0),    // mode
    FeatureBounds::new(0.0, 1.0),    // speechiness
    FeatureBounds::new(35.0, 256.0), // tempo
    FeatureBounds::new(3.0, 7.0),    // time_signature
    FeatureBounds::new(0.0, 1.0),    // valence
];

#[must_use]
pub fn normalize(value: f64, min: f64, max: f64) -> f64 {
    (value - min) / (max - min)
}

#[must_use]
pub fn denormalize(value: f64, min: f64, max: f64) -> f64 {
    value * (max - min) + min
}

/// A full feature vector. Whether it is raw or normalized depends on where it
/// came from; the conversions below make the direction explicit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures(pub [f64; FEATURE_COUNT]);

impl AudioFeatures {
    #[must_use]
    pub fn get(&self, feature: AudioFeature) -> f64 {
        self.0[feature.index()]
    }

    pub fn set(&mut self, feature: AudioFeature, value: f64) {
        self.0[feature.index()] = value;
    }

    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Build from a slice of exactly [`FEATURE_COUNT`] values.
    #[must_use]
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        <[f64; FEATURE_COUNT]>::try_from(values).ok().map(Self)
    }

    /// Raw → `[0, 1]` per the bounds table.
    #[must_use]
    pub fn normalized(&self) -> Self {
        self.map_with_bounds(FeatureBounds::normalize)
    }

    /// `[0, 1]` → raw per the bounds table.
    #[must_use]
    pub fn denormalized(&self) -> Self {
        self.map_with_bounds(FeatureBounds::denormalize)
    }

    fn map_with_bounds(&self, f: fn(&FeatureBounds, f64) -> f64) -> Self {
        let mut out = [0.0; FEATURE_COUNT];
        for (i, value) in self.0.iter().enumerate() {
            out[i] = f(&FEATURE_BOUNDS[i], *value);
        }
        Self(out)
    }

    /// Iterate `(feature, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (AudioFeature, f64)> + '_ {
        AudioFeature::ALL.iter().map(move |f| (*f, self.get(*f)))
    }
}

impl fmt::Display for AudioFeatures {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (feature, value) in self.iter() {
            writeln!(f, "{:>17}: {value:.4}", feature.api_name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loudness_midpoint() {
        assert_eq!(normalize(-30.0, -60.0, 0.0), 0.5);
        assert_eq!(denormalize(0.5, -60.0, 0.0), -30.0);
    }

    #[test]
    fn test_normalize_denormalize_inverse_within_bounds() {
        for feature in AudioFeature::ALL {
            let bounds = feature.bounds();
            for step in 0..=100 {
                let value = bounds.min + (bounds.max - bounds.min) * f64::from(step) / 100.0;
                let back = bounds.denormalize(bounds.normalize(value));
                assert!((back - value).abs() < 1e-9, "{feature}: {value} -> {back}");
            }
        }
    }

    #[test]
    fn test_out_of_bounds_is_not_clamped() {
        let tempo = AudioFeature::Tempo.bounds();
        assert!(tempo.normalize(300.0) > 1.0);
        assert!(tempo.normalize(20.0) < 0.0);
    }

    #[test]
    fn test_bounds_table_matches_features() {
        assert_eq!(AudioFeature::Key.bounds(), FeatureBounds::new(-1.0, 11.0));
        assert_eq!(AudioFeature::Loudness.bounds(), FeatureBounds::new(-60.0, 0.0));
        assert_eq!(AudioFeature::Tempo.bounds(), FeatureBounds::new(35.0, 256.0));
        assert_eq!(AudioFeature::TimeSignature.bounds(), FeatureBounds::new(3.0, 7.0));
        for (i, feature) in AudioFeature::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i);
        }
    }

    #[test]
    fn test_vector_round_trip() {
        let raw = AudioFeatures([0.2, 0.7, 0.9, 0.0, 5.0, 0.1, -7.5, 1.0, 0.04, 128.0, 4.0, 0.8]);
        let back = raw.normalized().denormalized();
        for (a, b) in raw.as_slice().iter().zip(back.as_slice()) {
            assert!((a - b).abs() < 1e-9);
        }
        assert!(AudioFeatures::from_slice(&[0.0; 11]).is_none());
    }
}
