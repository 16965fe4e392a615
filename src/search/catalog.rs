//! The music catalog as the search sees it.
//!
//! [`CatalogApi`] is the seam between the search loop and the network. The
//! production implementation is [`super::spotify::SpotifyClient`]; tests plug
//! in fakes that count calls and script responses.

use super::window::RecommendationQuery;
use crate::error::CatalogError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The catalog rejects requests carrying more seeds than this.
pub const MAX_SEEDS: usize = 5;

/// A playable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub name: String,
    /// First credited artist.
    pub artist: String,
    pub artwork_url: Option<String>,
    pub preview_url: Option<String>,
}

impl Track {
    #[must_use]
    pub fn uri(&self) -> String {
        format!("spotify:track:{}", self.id)
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.artist, self.name)
    }
}

/// Just enough of an artist to filter by genre.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
}

/// Seeds steering a recommendation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedSet {
    pub artists: Vec<String>,
    pub genres: Vec<String>,
    pub tracks: Vec<String>,
}

impl SeedSet {
    pub fn genres<I, S>(genres: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            genres: genres.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.artists.len() + self.genres.len() + self.tracks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop seeds until at most `max` remain: tracks go first, then genres,
    /// then artists.
    pub fn truncate(&mut self, max: usize) {
        while self.len() > max {
            if self.tracks.pop().is_some() {
                continue;
            }
            if self.genres.pop().is_some() {
                continue;
            }
            self.artists.pop();
        }
    }

    /// `seed_artists`, `seed_genres`, `seed_tracks`, each comma-joined, empty
    /// lists omitted.
    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        [
            ("seed_artists", &self.artists),
            ("seed_genres", &self.genres),
            ("seed_tracks", &self.tracks),
        ]
        .into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(key, values)| (key.to_string(), values.join(",")))
        .collect()
    }
}

impl fmt::Display for SeedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "artists [{}] genres [{}] tracks [{}]",
            self.artists.join(", "),
            self.genres.join(", "),
            self.tracks.join(", ")
        )
    }
}

/// Listening-history window for top items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeRange {
    /// Roughly the last four weeks.
    #[default]
    ShortTerm,
    MediumTerm,
    LongTerm,
}

impl TimeRange {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::ShortTerm => "short_term",
            TimeRange::MediumTerm => "medium_term",
            TimeRange::LongTerm => "long_term",
        }
    }
}

/// Read access to the catalog.
#[async_trait]
pub trait CatalogApi: Send + Sync {
    /// Tracks matching every window in `query`. An empty list is a valid
    /// answer, not an error.
    async fn recommendations(&self, query: &RecommendationQuery) -> Result<Vec<Track>, CatalogError>;

    /// The listener's top artists.
    async fn top_artists(&self, limit: usize, offset: usize) -> Result<Vec<ArtistSummary>, CatalogError>;

    /// Ids of the listener's top tracks over `range`.
    async fn top_tracks(&self, limit: usize, offset: usize, range: TimeRange) -> Result<Vec<String>, CatalogError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_range_query_values() {
        assert_eq!(TimeRange::default(), TimeRange::ShortTerm);
        assert_eq!(TimeRange::ShortTerm.as_str(), "short_term");
        assert_eq!(TimeRange::LongTerm.as_str(), "long_term");
    }

    #[test]
    fn test_truncate_prefers_artists() {
        let mut seeds = SeedSet {
            artists: vec!["a1".into(), "a2".into(), "a3".into()],
            genres: vec!["alternative".into(), "rock".into()],
            tracks: vec!["t1".into()],
        };
        seeds.truncate(MAX_SEEDS);
        assert_eq!(seeds.len(), 5);
        assert!(seeds.tracks.is_empty());
        assert_eq!(seeds.genres.len(), 2);

        seeds.truncate(2);
        assert_eq!(seeds.artists, vec!["a1", "a2"]);
        assert!(seeds.genres.is_empty());
    }

    #[test]
    fn test_seed_query_pairs_skip_empty_lists() {
        let seeds = SeedSet {
            artists: vec!["a1".into(), "a2".into()],
            genres: vec![],
            tracks: vec!["t1".into()],
        };
        assert_eq!(
            seeds.to_query_pairs(),
            vec![
                ("seed_artists".to_string(), "a1,a2".to_string()),
                ("seed_tracks".to_string(), "t1".to_string()),
            ]
        );
    }

    #[test]
    fn test_track_uri_and_display() {
        let track = Track {
            id: "4uLU6hMCjMI75M1A2tKUQC".into(),
            name: "Never Gonna Give You Up".into(),
            artist: "Rick Astley".into(),
            artwork_url: None,
            preview_url: None,
        };
        assert_eq!(track.uri(), "spotify:track:4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(track.to_string(), "Rick Astley - Never Gonna Give You Up");
    }
}
