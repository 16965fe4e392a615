//! # Adaptive Search
//!
//! Turn one predicted feature vector into a list of tracks.
//!
//! ## State Machine
//!
//! ```text
//! Attempting(1) -> results       -> Success
//!               -> no results    -> Attempting(2) -> ... -> Attempting(max) -> Exhausted
//!               -> catalog error -> abort
//! ```
//!
//! Attempts are strictly sequential: attempt `k + 1` is only issued after
//! attempt `k` came back empty. Every attempt is built from the same point
//! estimate; only the windows grow. Running out of attempts is a normal
//! outcome ([`SearchOutcome::NotFound`]), not an error.
//!
//! Cancellation is observed while waiting on the catalog; a cancelled search
//! issues no further requests.

pub mod catalog;
pub mod seeds;
pub mod spotify;
pub mod window;

pub use catalog::{ArtistSummary, CatalogApi, SeedSet, TimeRange, Track};
pub use window::{FeatureWindow, RecommendationQuery, WindowConfig};

use crate::error::{RecommendError, Result, Stage};
use crate::features::AudioFeatures;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Knobs for one search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub max_attempts: u32,
    /// Tracks requested per attempt.
    pub track_count: usize,
    /// ISO 3166-1 market code.
    pub market: Option<String>,
    pub windows: WindowConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            track_count: 10,
            market: Some("US".to_string()),
            windows: WindowConfig::default(),
        }
    }
}

impl SearchConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RecommendError::Config("search.max_attempts must be at least 1".into()));
        }
        if self.track_count == 0 || self.track_count > 100 {
            return Err(RecommendError::Config("search.track_count must be within 1..=100".into()));
        }
        let w = &self.windows;
        if w.expansion_factor < 1.0 || w.loudness_expansion_factor < 1.0 {
            return Err(RecommendError::Config("window expansion factors must be >= 1".into()));
        }
        let deltas = [
            w.continuous_delta,
            w.tempo_delta,
            w.ordinal_step,
            w.loudness_below,
            w.loudness_above,
        ];
        if deltas.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(RecommendError::Config("window half-widths must be finite and >= 0".into()));
        }
        Ok(())
    }
}

/// How a search ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Found { tracks: Vec<Track>, attempts: u32 },
    NotFound { attempts: u32 },
}

impl SearchOutcome {
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            SearchOutcome::Found { attempts, .. } | SearchOutcome::NotFound { attempts } => *attempts,
        }
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        match self {
            SearchOutcome::Found { tracks, .. } => tracks,
            SearchOutcome::NotFound { .. } => &[],
        }
    }

    /// For callers that treat an empty result as a failure.
    pub fn into_result(self) -> Result<Vec<Track>> {
        match self {
            SearchOutcome::Found { tracks, .. } => Ok(tracks),
            SearchOutcome::NotFound { attempts } => Err(RecommendError::SearchExhausted { attempts }),
        }
    }
}

enum SearchState {
    Attempting(u32),
    Success { tracks: Vec<Track>, attempt: u32 },
    Exhausted { attempts: u32 },
}

/// Run the widening search for `features`.
pub async fn search<C>(
    catalog: &C,
    features: &AudioFeatures,
    seeds: &SeedSet,
    config: &SearchConfig,
    cancel: &CancellationToken,
) -> Result<SearchOutcome>
where
    C: CatalogApi + ?Sized,
{
    config.validate()?;

    let mut state = SearchState::Attempting(1);
    loop {
        state = match state {
            SearchState::Attempting(attempt) => {
                if cancel.is_cancelled() {
                    return Err(RecommendError::Cancelled);
                }

                let query = RecommendationQuery::build(
                    features,
                    attempt,
                    &config.windows,
                    seeds,
                    config.track_count,
                    config.market.as_deref(),
                );
                debug!("Search attempt {attempt}/{}", config.max_attempts);

                let response = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(RecommendError::Cancelled),
                    response = catalog.recommendations(&query) => response,
                };
                let mut tracks = response
                    .map_err(|err| RecommendError::from_catalog(Stage::Search { attempt }, err))?;
                tracks.truncate(config.track_count);

                if !tracks.is_empty() {
                    SearchState::Success { tracks, attempt }
                } else if attempt >= config.max_attempts {
                    SearchState::Exhausted { attempts: attempt }
                } else {
                    debug!("Attempt {attempt} returned nothing, widening");
                    SearchState::Attempting(attempt + 1)
                }
            }
            SearchState::Success { tracks, attempt } => {
                info!("Found {} tracks on attempt {attempt}", tracks.len());
                return Ok(SearchOutcome::Found {
                    tracks,
                    attempts: attempt,
                });
            }
            SearchState::Exhausted { attempts } => {
                info!("No tracks found after {attempts} attempts");
                return Ok(SearchOutcome::NotFound { attempts });
            }
        };
    }
}
