//! # Recommendation Pipeline
//!
//! `Selection -> encode -> predict + noise -> seeds -> widening search`.
//!
//! The result is a [`Recommendation`] value. Follow-up actions (exporting a
//! playlist, saving tracks to the library) take that value as a parameter;
//! nothing is remembered between calls.

use crate::encoder::encode;
use crate::error::{RecommendError, Result, Stage};
use crate::features::AudioFeatures;
use crate::model::RegressionModel;
use crate::prediction::{predict_with_noise, DEFAULT_NOISE_SIGMA};
use crate::search::seeds::derive_seeds;
use crate::search::spotify::{Playlist, SpotifyClient};
use crate::search::{search, CatalogApi, SearchConfig, SearchOutcome, SeedSet, Track};
use crate::selection::Selection;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, PartialEq)]
pub struct RecommenderSettings {
    pub noise_sigma: f64,
    pub search: SearchConfig,
}

impl Default for RecommenderSettings {
    fn default() -> Self {
        Self {
            noise_sigma: DEFAULT_NOISE_SIGMA,
            search: SearchConfig::default(),
        }
    }
}

/// Everything one request produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub selection: Selection,
    /// Raw (denormalized, post-processed) features that were searched for.
    pub features: AudioFeatures,
    pub seeds: SeedSet,
    /// Empty when the search ran out of attempts.
    pub tracks: Vec<Track>,
    pub attempts: u32,
}

impl Recommendation {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Error out on an empty result, for flows that need tracks.
    pub fn require_tracks(&self) -> Result<&[Track]> {
        if self.tracks.is_empty() {
            return Err(RecommendError::SearchExhausted {
                attempts: self.attempts,
            });
        }
        Ok(&self.tracks)
    }

    pub fn save_json(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_json(path: &Path) -> anyhow::Result<Self> {
        let json = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }
}

pub struct Recommender<C> {
    model: RegressionModel,
    catalog: C,
    settings: RecommenderSettings,
    rng: StdRng,
}

impl<C: CatalogApi> Recommender<C> {
    pub fn new(model: RegressionModel, catalog: C, settings: RecommenderSettings) -> Self {
        Self {
            model,
            catalog,
            settings,
            rng: StdRng::from_entropy(),
        }
    }

    /// Fix the RNG driving noise and seed offsets.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &C {
        &self.catalog
    }

    #[must_use]
    pub fn model(&self) -> &RegressionModel {
        &self.model
    }

    /// Noisy raw features for `selection`, without touching the catalog.
    pub fn predict(&mut self, selection: &Selection) -> Result<AudioFeatures> {
        let input = encode(selection);
        predict_with_noise(&self.model, &input, self.settings.noise_sigma, &mut self.rng)
    }

    /// Run the whole pipeline for one selection.
    pub async fn recommend(&mut self, selection: Selection, cancel: &CancellationToken) -> Result<Recommendation> {
        info!("Recommending for {selection}");
        let features = self.predict(&selection)?;
        debug!("Target features: {features}");

        let seeds = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RecommendError::Cancelled),
            seeds = derive_seeds(&self.catalog, selection.genre, &mut self.rng) => seeds?,
        };

        let outcome = search(&self.catalog, &features, &seeds, &self.settings.search, cancel).await?;
        let attempts = outcome.attempts();
        let tracks = match outcome {
            SearchOutcome::Found { tracks, .. } => tracks,
            SearchOutcome::NotFound { .. } => Vec::new(),
        };

        Ok(Recommendation {
            selection,
            features,
            seeds,
            tracks,
            attempts,
        })
    }
}

/// Create a playlist for `user_id` holding every recommended track.
pub async fn export_playlist(
    client: &SpotifyClient,
    user_id: &str,
    name: &str,
    public: bool,
    recommendation: &Recommendation,
) -> Result<Playlist> {
    let tracks = recommendation.require_tracks()?;
    let export = |err| RecommendError::from_catalog(Stage::Export, err);

    let playlist = client.create_playlist(user_id, name, public).await.map_err(export)?;
    client.add_tracks(&playlist.id, tracks).await.map_err(export)?;
    info!("Exported {} tracks to playlist {}", tracks.len(), playlist.id);
    Ok(playlist)
}

/// Save recommended tracks to the listener's library. `only` picks a single
/// track by index.
pub async fn save_liked(client: &SpotifyClient, recommendation: &Recommendation, only: Option<usize>) -> Result<usize> {
    let tracks = recommendation.require_tracks()?;
    let chosen = match only {
        Some(index) => tracks.get(index..=index).ok_or_else(|| {
            RecommendError::InvalidSelection(format!(
                "track {index} out of range, recommendation has {}",
                tracks.len()
            ))
        })?,
        None => tracks,
    };
    client
        .save_to_library(chosen)
        .await
        .map_err(|err| RecommendError::from_catalog(Stage::Export, err))?;
    Ok(chosen.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CatalogError;
    use crate::model::ModelConfig;
    use crate::search::{ArtistSummary, RecommendationQuery};
    use crate::selection::{Emotion, Event, Genre};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a track once the search reaches attempt `succeed_on`.
    struct PatientCatalog {
        succeed_on: u32,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CatalogApi for PatientCatalog {
        async fn recommendations(&self, query: &RecommendationQuery) -> std::result::Result<Vec<Track>, CatalogError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if query.attempt < self.succeed_on {
                return Ok(Vec::new());
            }
            Ok(vec![Track {
                id: format!("hit-{}", query.attempt),
                name: "Hit".into(),
                artist: "Band".into(),
                artwork_url: None,
                preview_url: None,
            }])
        }

        async fn top_artists(&self, _: usize, _: usize) -> std::result::Result<Vec<ArtistSummary>, CatalogError> {
            Ok(Vec::new())
        }

        async fn top_tracks(&self, _: usize, _: usize, _: crate::search::TimeRange) -> std::result::Result<Vec<String>, CatalogError> {
            Ok(Vec::new())
        }
    }

    fn recommender(succeed_on: u32) -> Recommender<PatientCatalog> {
        let mut rng = StdRng::seed_from_u64(3);
        let model = RegressionModel::build(ModelConfig::default(), &mut rng);
        let catalog = PatientCatalog {
            succeed_on,
            calls: AtomicUsize::new(0),
        };
        Recommender::new(model, catalog, RecommenderSettings::default()).with_seed(11)
    }

    #[tokio::test]
    async fn test_recommend_widens_until_found() {
        let mut recommender = recommender(2);
        let selection = Selection::new(Some(Emotion::Happy), Some(Event::Vacation), Some(Genre::Pop));

        let rec = recommender.recommend(selection, &CancellationToken::new()).await.unwrap();
        assert_eq!(rec.attempts, 2);
        assert_eq!(rec.tracks[0].id, "hit-2");
        assert_eq!(rec.seeds, SeedSet::genres(["pop"]));
        assert_eq!(recommender.catalog().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_recommend_not_found_is_empty_value() {
        let mut recommender = recommender(u32::MAX);
        let rec = recommender
            .recommend(Selection::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(rec.is_empty());
        assert_eq!(rec.attempts, 5);
        assert!(matches!(
            rec.require_tracks(),
            Err(RecommendError::SearchExhausted { attempts: 5 })
        ));
    }

    #[test]
    fn test_recommendation_json_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("last.json");
        let rec = Recommendation {
            selection: Selection::new(Some(Emotion::Calm), None, Some(Genre::Jazz)),
            features: AudioFeatures([0.5, 0.5, 0.5, 0.0, 3.0, 0.1, -9.0, 1.0, 0.04, 90.0, 4.0, 0.4]),
            seeds: SeedSet::genres(["jazz"]),
            tracks: Vec::new(),
            attempts: 5,
        };
        rec.save_json(&path).unwrap();
        assert_eq!(Recommendation::load_json(&path).unwrap(), rec);
    }
}
