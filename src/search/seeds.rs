//! Seed derivation from the listener's history.
//!
//! With a genre selected, up to three of the listener's top artists tagged
//! with that genre are used alongside the genre seed and one top track. When
//! none match, the genre seed alone is sent. Without a genre, two top artists
//! and one top track are picked from a random offset.
//!
//! A failed history lookup degrades the seeds instead of failing the request.
//! Only a rejected token is terminal.

use super::catalog::{ArtistSummary, CatalogApi, SeedSet, TimeRange, MAX_SEEDS};
use crate::error::{CatalogError, RecommendError, Result, Stage};
use crate::selection::{canonical, Genre};
use lazy_static::lazy_static;
use log::{debug, warn};
use rand::Rng;
use std::collections::HashMap;

/// Top artists scanned for a genre match.
const TOP_ARTIST_SCAN: usize = 50;
/// Artists kept after the genre filter.
const GENRE_ARTIST_SEEDS: usize = 3;
/// Artists taken when no genre is selected.
const UNFILTERED_ARTIST_SEEDS: usize = 2;
/// Upper bound for the random history offset.
const MAX_OFFSET: usize = 50;
/// Recent listening, so the seed track reflects the current mood.
const TRACK_RANGE: TimeRange = TimeRange::ShortTerm;
/// Sent when nothing else could be derived; the catalog needs at least one seed.
pub const FALLBACK_GENRE_SEED: &str = "pop";

lazy_static! {
    /// Genres whose catalog seed name differs from the lowercased member name.
    static ref GENRE_SEED_ALIASES: HashMap<Genre, &'static [&'static str]> = {
        let mut m: HashMap<Genre, &'static [&'static str]> = HashMap::new();
        m.insert(Genre::RnB, &["r-n-b"]);
        m.insert(Genre::DrumAndBass, &["drum-and-bass"]);
        m.insert(Genre::HipHop, &["hip-hop"]);
        m.insert(Genre::KPop, &["k-pop"]);
        m.insert(Genre::PsychedelicRock, &["psych-rock"]);
        m.insert(Genre::Soundtrack, &["soundtracks"]);
        m.insert(Genre::WorldMusic, &["world-music"]);
        m.insert(Genre::Chillout, &["chill"]);
        m.insert(Genre::LoFi, &["chill"]);
        m.insert(Genre::NewWave, &["punk-rock"]);
        m.insert(Genre::PostRock, &["alternative", "rock"]);
        m.insert(Genre::ProgressiveRock, &["rock"]);
        m.insert(Genre::Shoegaze, &["indie"]);
        m.insert(Genre::Synthwave, &["synth-pop"]);
        m.insert(Genre::Trap, &["hip-hop", "rap"]);
        m
    };
}

/// Catalog seed names for `genre`.
#[must_use]
pub fn genre_seeds(genre: Genre) -> Vec<String> {
    match GENRE_SEED_ALIASES.get(&genre) {
        Some(aliases) => aliases.iter().map(|s| (*s).to_string()).collect(),
        None => vec![genre.name().to_lowercase()],
    }
}

/// Whether an artist's genre tags mention `genre` or one of its seed names.
fn artist_matches(artist: &ArtistSummary, genre: Genre) -> bool {
    let mut wanted = vec![canonical(genre.name())];
    wanted.extend(genre_seeds(genre).iter().map(|s| canonical(s)));
    artist
        .genres
        .iter()
        .any(|tag| wanted.contains(&canonical(tag)))
}

/// Turn a history lookup failure into either a terminal error or a warning.
fn tolerate<T: Default>(result: std::result::Result<T, CatalogError>, what: &str) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(CatalogError::Unauthorized) => {
            Err(RecommendError::from_catalog(Stage::SeedLookup, CatalogError::Unauthorized))
        }
        Err(err) => {
            warn!("Could not fetch {what}, continuing without: {err}");
            Ok(T::default())
        }
    }
}

/// Derive the seeds for one recommendation request.
pub async fn derive_seeds<C, R>(catalog: &C, genre: Option<Genre>, rng: &mut R) -> Result<SeedSet>
where
    C: CatalogApi + ?Sized,
    R: Rng + ?Sized,
{
    let track_offset = rng.gen_range(1..=MAX_OFFSET);

    let mut seeds = match genre {
        Some(genre) => {
            let artists = tolerate(catalog.top_artists(TOP_ARTIST_SCAN, 0).await, "top artists")?;
            let matching: Vec<String> = artists
                .iter()
                .filter(|artist| artist_matches(artist, genre))
                .take(GENRE_ARTIST_SEEDS)
                .map(|artist| artist.id.clone())
                .collect();

            if matching.is_empty() {
                debug!("No top artist tagged `{genre}`, seeding by genre only");
                SeedSet::genres(genre_seeds(genre))
            } else {
                let tracks = tolerate(catalog.top_tracks(1, track_offset, TRACK_RANGE).await, "top tracks")?;
                SeedSet {
                    artists: matching,
                    genres: genre_seeds(genre),
                    tracks,
                }
            }
        }
        None => {
            let artist_offset = rng.gen_range(1..=MAX_OFFSET);
            let artists = tolerate(
                catalog.top_artists(UNFILTERED_ARTIST_SEEDS, artist_offset).await,
                "top artists",
            )?;
            let tracks = tolerate(catalog.top_tracks(1, track_offset, TRACK_RANGE).await, "top tracks")?;
            SeedSet {
                artists: artists.into_iter().map(|artist| artist.id).collect(),
                genres: Vec::new(),
                tracks,
            }
        }
    };

    seeds.truncate(MAX_SEEDS);
    if seeds.is_empty() {
        debug!("No history available, falling back to `{FALLBACK_GENRE_SEED}`");
        seeds = SeedSet::genres([FALLBACK_GENRE_SEED]);
    }
    debug!("Seeds: {seeds}");
    Ok(seeds)
}
