//! # Error Taxonomy
//!
//! Library-level errors for the recommendation core. Encoder and normalizer
//! errors are programming errors; model, training and search errors are
//! operational and meant to be handled at the call site. The binary wraps all
//! of these in `anyhow::Error` with extra context.

use std::fmt;
use thiserror::Error;

/// Which step of a network-bound pipeline failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Downloading the training corpus.
    CorpusDownload,
    /// Fetching the user's top artists / tracks for seeding.
    SeedLookup,
    /// A recommendation query, with its 1-based attempt number.
    Search { attempt: u32 },
    /// Creating a playlist or saving tracks.
    Export,
    /// Refreshing the catalog bearer token.
    TokenRefresh,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::CorpusDownload => write!(f, "corpus download"),
            Stage::SeedLookup => write!(f, "seed lookup"),
            Stage::Search { attempt } => write!(f, "search attempt {attempt}"),
            Stage::Export => write!(f, "playlist export"),
            Stage::TokenRefresh => write!(f, "token refresh"),
        }
    }
}

/// Errors surfaced by the recommendation core.
#[derive(Debug, Error)]
pub enum RecommendError {
    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("dataset mismatch: {inputs} inputs vs {targets} targets")]
    DatasetMismatch { inputs: usize, targets: usize },

    #[error("malformed training corpus: {0}")]
    Corpus(String),

    #[error("model load failed: {0}")]
    ModelLoad(String),

    #[error("training failed: {0}")]
    TrainingFailure(String),

    #[error("a training run is already in progress")]
    TrainingInProgress,

    #[error("no songs found after {attempts} attempts")]
    SearchExhausted { attempts: u32 },

    #[error("catalog rejected the access token after a refresh")]
    UpstreamAuth,

    #[error("network error during {stage}: {message}")]
    Network { stage: Stage, message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of the model persistence store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("atomic replace failed: {0}")]
    Persist(#[from] tempfile::PersistError),
}

/// Failures of a single catalog HTTP call.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The bearer token was rejected (HTTP 401).
    #[error("unauthorized")]
    Unauthorized,

    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("could not decode response: {0}")]
    Decode(String),

    /// The token endpoint could not be reached or answered garbage.
    #[error("token refresh failed: {0}")]
    Refresh(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CatalogError::Decode(err.to_string())
        } else {
            CatalogError::Transport(err.to_string())
        }
    }
}

impl RecommendError {
    /// Map a catalog failure onto the taxonomy, attaching the failing stage.
    pub fn from_catalog(stage: Stage, err: CatalogError) -> Self {
        match err {
            CatalogError::Unauthorized => RecommendError::UpstreamAuth,
            CatalogError::Refresh(message) => RecommendError::Network {
                stage: Stage::TokenRefresh,
                message,
            },
            other => RecommendError::Network {
                stage,
                message: other.to_string(),
            },
        }
    }
}

pub type Result<T, E = RecommendError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_maps_to_upstream_auth() {
        let err = RecommendError::from_catalog(Stage::Search { attempt: 2 }, CatalogError::Unauthorized);
        assert!(matches!(err, RecommendError::UpstreamAuth));
    }

    #[test]
    fn test_network_error_keeps_stage() {
        let err = RecommendError::from_catalog(
            Stage::Search { attempt: 3 },
            CatalogError::Transport("connection reset".to_string()),
        );
        let message = err.to_string();
        assert!(message.contains("search attempt 3"));
        assert!(message.contains("connection reset"));
    }

    #[test]
    fn test_refresh_failure_reports_refresh_stage() {
        let err = RecommendError::from_catalog(
            Stage::Search { attempt: 1 },
            CatalogError::Refresh("connection refused".to_string()),
        );
        assert!(matches!(
            err,
            RecommendError::Network {
                stage: Stage::TokenRefresh,
                ..
            }
        ));
        assert!(err.to_string().contains("token refresh"));
    }
}
