//! # Command-Line Interface Module
//!
//! This module defines the command-line interface for moodtune using Clap
//! derive macros. Parsed arguments are routed to the library in `main.rs`.
//!
//! ## Commands
//!
//! - `train`: Fit the model on a labeled corpus and persist it
//! - `recommend`: Predict features for a selection and search the catalog
//! - `predict`: Print predicted features without searching
//! - `encode`: Show the one-hot encoding of a selection
//! - `list`: Print the members of an axis or the feature table
//! - `playlist`: Export a saved recommendation to a playlist or liked songs
//! - `completion`: Generate shell completions
//!
//! ## Examples
//!
//! ```bash
//! moodtune train --corpus ./data.csv --epochs 20
//! moodtune recommend --emotion calm --event study --genre jazz --save last.json
//! moodtune playlist create --from last.json --user-id alice --name "Focus"
//! ```

use crate::selection::{Emotion, Event, Genre, Selection};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// What `list` prints.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ListKind {
    Emotions,
    Events,
    Genres,
    /// The twelve audio features with their bounds
    Features,
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "moodtune")]
#[command(about = "moodtune: song recommendations from how you feel and what you're doing")]
#[command(version)]
pub struct Args {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "MOODTUNE_CONFIG")]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// The three selection axes. Each one is optional; omitting it means "no
/// preference".
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// How you feel (e.g. happy, calm, nostalgic)
    #[arg(long)]
    pub emotion: Option<Emotion>,

    /// What you're doing (e.g. study, workout, roadtrip)
    #[arg(long)]
    pub event: Option<Event>,

    /// Preferred genre (e.g. jazz, hip-hop, lo-fi)
    #[arg(long)]
    pub genre: Option<Genre>,
}

impl SelectionArgs {
    #[must_use]
    pub fn selection(&self) -> Selection {
        Selection::new(self.emotion, self.event, self.genre)
    }
}

/// Catalog credentials. Prefer the environment over flags so tokens stay out
/// of shell history.
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct CatalogArgs {
    /// Catalog bearer token
    #[arg(long, env = "MOODTUNE_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Refresh token used when the access token expires
    #[arg(long, env = "MOODTUNE_REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Session JWT presented to the token refresh relay
    #[arg(long, env = "MOODTUNE_SESSION_JWT", hide_env_values = true)]
    pub session_jwt: Option<String>,

    /// Client secret for refreshing directly against the accounts service
    #[arg(long, env = "MOODTUNE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,
}

fn positive(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Train the model on a labeled corpus
    ///
    /// Downloads or reads the CSV, synthesizes the training set, fits the
    /// network and replaces the stored model once training succeeds. Press
    /// Ctrl-C to stop at the next epoch; the previous model is kept.
    Train {
        /// CSV file path or http(s) URL (overrides `training.corpus`)
        #[arg(long, value_hint = clap::ValueHint::AnyPath)]
        corpus: Option<String>,

        /// Bearer token for an authenticated corpus URL
        #[arg(long, env = "MOODTUNE_CORPUS_TOKEN", hide_env_values = true)]
        corpus_token: Option<String>,

        #[arg(long, value_parser = positive)]
        epochs: Option<usize>,

        #[arg(long, value_parser = positive)]
        batch_size: Option<usize>,

        /// Seed for reproducible training
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Recommend tracks for a selection
    ///
    /// Predicts target audio features, derives seeds from your listening
    /// history and queries the catalog, widening the acceptable ranges on
    /// every empty attempt.
    Recommend {
        #[command(flatten)]
        selection: SelectionArgs,

        #[command(flatten)]
        catalog: CatalogArgs,

        /// Number of tracks to request
        #[arg(long, short = 'n')]
        tracks: Option<usize>,

        /// Seed for the prediction noise
        #[arg(long)]
        seed: Option<u64>,

        /// Write the recommendation as JSON for later `playlist` commands
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        save: Option<PathBuf>,

        /// Print the recommendation as JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Print predicted audio features for a selection
    Predict {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Seed for the prediction noise
        #[arg(long)]
        seed: Option<u64>,

        /// Noise standard deviation (overrides `prediction.noise_sigma`)
        #[arg(long)]
        sigma: Option<f64>,
    },

    /// Show the one-hot encoding of a selection
    Encode {
        #[command(flatten)]
        selection: SelectionArgs,
    },

    /// List selectable members or the feature table
    List {
        kind: ListKind,
    },

    /// Export a saved recommendation
    Playlist {
        #[command(subcommand)]
        action: PlaylistAction,
    },

    /// Generate shell completions
    ///
    /// Usage: moodtune completion bash > ~/.local/share/bash-completion/completions/moodtune
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// Print selectable values for dynamic completion (hidden command)
    #[command(hide = true)]
    CompleteValues {
        kind: ListKind,
    },
}

#[derive(Subcommand, Debug)]
pub enum PlaylistAction {
    /// Create a playlist holding every recommended track
    Create {
        /// Recommendation JSON written by `recommend --save`
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        from: PathBuf,

        /// Catalog user id owning the playlist
        #[arg(long, env = "MOODTUNE_USER_ID")]
        user_id: String,

        /// Playlist name (defaults to the selection)
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        public: bool,

        #[command(flatten)]
        catalog: CatalogArgs,
    },

    /// Save recommended tracks to your liked songs
    Like {
        /// Recommendation JSON written by `recommend --save`
        #[arg(long, value_hint = clap::ValueHint::FilePath)]
        from: PathBuf,

        /// Only like the track at this position (0-based)
        #[arg(long)]
        index: Option<usize>,

        #[command(flatten)]
        catalog: CatalogArgs,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_train_rejects_zero_overrides() {
        assert!(Args::try_parse_from(["moodtune", "train", "--epochs", "0"]).is_err());
        assert!(Args::try_parse_from(["moodtune", "train", "--batch-size", "0"]).is_err());

        let args = Args::try_parse_from(["moodtune", "train", "--epochs", "3"]).unwrap();
        assert!(matches!(args.command, Command::Train { epochs: Some(3), .. }));
    }

    #[test]
    fn test_recommend_parses_selection() {
        let args = Args::try_parse_from([
            "moodtune",
            "recommend",
            "--emotion",
            "calm",
            "--genre",
            "drum-and-bass",
            "-n",
            "5",
        ])
        .unwrap();

        match args.command {
            Command::Recommend { selection, tracks, .. } => {
                assert_eq!(
                    selection.selection(),
                    Selection::new(Some(Emotion::Calm), None, Some(Genre::DrumAndBass))
                );
                assert_eq!(tracks, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_member_is_rejected() {
        let result = Args::try_parse_from(["moodtune", "predict", "--emotion", "meh"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_playlist_create_requires_source() {
        assert!(Args::try_parse_from(["moodtune", "playlist", "create", "--user-id", "u"]).is_err());
        let args = Args::try_parse_from([
            "moodtune",
            "playlist",
            "create",
            "--from",
            "last.json",
            "--user-id",
            "u",
            "--public",
        ])
        .unwrap();
        assert!(matches!(
            args.command,
            Command::Playlist {
                action: PlaylistAction::Create { public: true, .. }
            }
        ));
    }
}
