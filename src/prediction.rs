//! Prediction with noise injection and per-feature post-processing.
//!
//! Repeated requests for the same selection should not return the same song,
//! so the normalized prediction is jittered with zero-mean Gaussian noise
//! before denormalizing. With a seeded RNG the result is reproducible.

use crate::encoder::EncodedVector;
use crate::error::{RecommendError, Result};
use crate::features::{AudioFeature, AudioFeatures};
use crate::model::RegressionModel;
use log::trace;
use rand::Rng;
use rand_distr::{Distribution, Normal};

/// Default noise standard deviation in normalized space.
pub const DEFAULT_NOISE_SIGMA: f64 = 0.05;

/// Predict raw audio features for `input`.
///
/// 1. normalized prediction from the model
/// 2. `N(0, sigma)` added to every component
/// 3. denormalized through the bounds table
/// 4. key, mode and time signature rounded
/// 5. absolute value taken for everything except loudness
pub fn predict_with_noise<R: Rng + ?Sized>(
    model: &RegressionModel,
    input: &EncodedVector,
    sigma: f64,
    rng: &mut R,
) -> Result<AudioFeatures> {
    let noise = Normal::new(0.0, sigma)
        .map_err(|e| RecommendError::Config(format!("noise sigma {sigma}: {e}")))?;

    let mut normalized = model.predict(input);
    for value in normalized.0.iter_mut() {
        *value += noise.sample(rng);
    }

    let raw = postprocess(&normalized.denormalized());
    for (feature, value) in raw.iter() {
        trace!("Predicted {feature} = {value}");
    }
    Ok(raw)
}

/// Round integral features and fold negatives back into their domain.
#[must_use]
pub fn postprocess(raw: &AudioFeatures) -> AudioFeatures {
    let mut out = *raw;
    for feature in AudioFeature::ALL {
        let mut value = out.get(feature);
        if feature.is_integral() {
            value = value.round();
        }
        if !feature.allows_negative() {
            value = value.abs();
        }
        out.set(feature, value);
    }
    out
}
