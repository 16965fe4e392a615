//! # moodtune
//!
//! Song recommendations from an emotion, an activity and a genre. A small
//! regression network maps the selection to target audio features; a widening
//! catalog search turns those features into tracks.
//!
//! ## Usage
//!
//! ```bash
//! # Train on a labeled corpus
//! moodtune train --corpus ./data.csv
//!
//! # Recommend and keep the result for later
//! moodtune recommend --emotion happy --event vacation --save last.json
//!
//! # Export it
//! moodtune playlist create --from last.json --user-id alice
//! ```
//!
//! Set `RUST_LOG=moodtune=debug` to follow each search attempt.

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info, warn};
use moodtune::cli::{Args, CatalogArgs, Command, ListKind, PlaylistAction};
use moodtune::completion;
use moodtune::config::{self, Settings, StorageBackend};
use moodtune::encoder::encode;
use moodtune::features::{AudioFeature, AudioFeatures};
use moodtune::model::store::{FileModelStore, ModelStore, SqliteModelStore};
use moodtune::model::{ModelState, RegressionModel};
use moodtune::prediction::predict_with_noise;
use moodtune::recommender::{export_playlist, save_liked, Recommendation, Recommender};
use moodtune::search::spotify::{OAuthRefresher, RelayRefresher, SpotifyClient, TokenManager, TokenRefresher};
use moodtune::selection::{Emotion, Event, Genre};
use moodtune::training::{corpus_source, Trainer};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut settings = Settings::load(args.config.as_deref())?;
    debug!("Effective settings: {settings:?}");

    match args.command {
        Command::Train {
            corpus,
            corpus_token,
            epochs,
            batch_size,
            seed,
        } => {
            if let Some(epochs) = epochs {
                settings.training.epochs = epochs;
            }
            if let Some(batch_size) = batch_size {
                settings.training.batch_size = batch_size;
            }
            if seed.is_some() {
                settings.training.seed = seed;
            }
            settings.validate().context("Invalid training overrides")?;
            let training = settings.training_settings();
            let location = corpus
                .or_else(|| settings.training.corpus.clone())
                .context("No training corpus given. Pass --corpus or set training.corpus in the settings file.")?;

            let store = open_store(&settings)?;
            let trainer = Trainer::new(store, training);
            let source = corpus_source(&location, corpus_token);
            let cancel = cancel_on_ctrl_c();

            let report = trainer
                .train(source.as_ref(), &cancel, |epoch| {
                    let validation = match (epoch.val_loss, epoch.val_mae) {
                        (Some(loss), Some(mae)) => format!("  val_loss {loss:.5}  val_mae {mae:.5}"),
                        _ => String::new(),
                    };
                    println!(
                        "epoch {:>3}  loss {:.5}  mae {:.5}{validation}",
                        epoch.epoch + 1,
                        epoch.loss,
                        epoch.mae
                    );
                })
                .await
                .context("Training failed")?;
            println!(
                "Trained on {} examples for {} epochs.",
                report.examples,
                report.log.epochs.len()
            );
        }

        Command::Recommend {
            selection,
            catalog,
            tracks,
            seed,
            save,
            json,
        } => {
            let selection = selection.selection();
            let mut recommender_settings = settings.recommender_settings();
            if let Some(tracks) = tracks {
                recommender_settings.search.track_count = tracks;
            }
            recommender_settings.search.validate()?;

            let model = load_model(&settings)?;
            let client = spotify_client(&settings, &catalog)?;
            let mut recommender = Recommender::new(model, client, recommender_settings);
            if let Some(seed) = seed.or(settings.prediction.seed) {
                recommender = recommender.with_seed(seed);
            }

            let cancel = cancel_on_ctrl_c();
            let recommendation = recommender
                .recommend(selection, &cancel)
                .await
                .context("Recommendation failed")?;

            if json {
                println!("{}", serde_json::to_string_pretty(&recommendation)?);
            } else {
                print_recommendation(&recommendation);
            }
            if let Some(path) = save {
                let path = config::absolutize(&path)?;
                recommendation
                    .save_json(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Saved recommendation to {}", path.display());
            }
        }

        Command::Predict { selection, seed, sigma } => {
            let selection = selection.selection();
            let model = load_model(&settings)?;
            let sigma = sigma.unwrap_or(settings.prediction.noise_sigma);
            let mut rng = match seed.or(settings.prediction.seed) {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let features = predict_with_noise(&model, &encode(&selection), sigma, &mut rng)?;
            println!("{selection}");
            print_features(&features);
        }

        Command::Encode { selection } => {
            let selection = selection.selection();
            let encoded = encode(&selection);
            let hot: Vec<String> = encoded
                .as_slice()
                .iter()
                .enumerate()
                .filter(|(_, v)| **v == 1.0)
                .map(|(i, _)| i.to_string())
                .collect();
            println!("{selection}");
            println!("width {}, hot positions [{}]", encoded.len(), hot.join(", "));
        }

        Command::List { kind } => match kind {
            ListKind::Emotions => print_members(Emotion::ALL.iter().map(|m| m.name())),
            ListKind::Events => print_members(Event::ALL.iter().map(|m| m.name())),
            ListKind::Genres => print_members(Genre::ALL.iter().map(|m| m.name())),
            ListKind::Features => {
                for feature in AudioFeature::ALL {
                    let bounds = feature.bounds();
                    println!("{:<18} [{}, {}]", feature.api_name(), bounds.min, bounds.max);
                }
            }
        },

        Command::Playlist { action } => match action {
            PlaylistAction::Create {
                from,
                user_id,
                name,
                public,
                catalog,
            } => {
                let recommendation = read_recommendation(&from)?;
                let client = spotify_client(&settings, &catalog)?;
                let name = name.unwrap_or_else(|| format!("moodtune: {}", recommendation.selection));
                let playlist = export_playlist(&client, &user_id, &name, public, &recommendation)
                    .await
                    .context("Playlist export failed")?;
                println!("Created playlist `{name}` with {} tracks", recommendation.tracks.len());
                if let Some(url) = playlist.url {
                    println!("{url}");
                }
            }
            PlaylistAction::Like { from, index, catalog } => {
                let recommendation = read_recommendation(&from)?;
                let client = spotify_client(&settings, &catalog)?;
                let saved = save_liked(&client, &recommendation, index)
                    .await
                    .context("Saving to liked songs failed")?;
                println!("Saved {saved} track(s) to liked songs");
            }
        },

        Command::Completion { shell } => {
            let mut cmd = Args::command();
            let shell = completion::shell_to_completion_shell(&shell);
            completion::generate_completions(shell, &mut cmd);
        }

        Command::CompleteValues { kind } => {
            completion::print_values(kind)?;
        }
    }

    Ok(())
}

/// A token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, stopping...");
            trigger.cancel();
        }
    });
    cancel
}

fn open_store(settings: &Settings) -> Result<Arc<dyn ModelStore>> {
    let location = settings.model_location()?;
    let store: Arc<dyn ModelStore> = match settings.storage.backend {
        StorageBackend::File => Arc::new(FileModelStore::new(location)),
        StorageBackend::Sqlite => Arc::new(
            SqliteModelStore::open(&location)
                .with_context(|| format!("Failed to open model database at {}", location.display()))?,
        ),
    };
    debug!("Model store: {}", store.describe());
    Ok(store)
}

fn load_model(settings: &Settings) -> Result<RegressionModel> {
    let store = open_store(settings)?;
    let mut rng = StdRng::from_entropy();
    let model = RegressionModel::load_or_build(store.as_ref(), settings.model.clone(), &mut rng);
    if model.state() == ModelState::Built {
        warn!("No trained model found; predictions come from untrained weights. Run `moodtune train` first.");
    }
    Ok(model)
}

fn spotify_client(settings: &Settings, args: &CatalogArgs) -> Result<SpotifyClient> {
    let Some(access_token) = args.access_token.clone() else {
        bail!("No catalog access token. Set MOODTUNE_ACCESS_TOKEN or pass --access-token.");
    };

    let catalog = &settings.catalog;
    let refresher: Option<Arc<dyn TokenRefresher>> = match (
        &args.refresh_token,
        &catalog.token_refresh_url,
        &args.session_jwt,
        &catalog.client_id,
        &args.client_secret,
    ) {
        (Some(refresh), Some(url), Some(jwt), _, _) => {
            Some(Arc::new(RelayRefresher::new(url.clone(), jwt.clone(), refresh.clone())) as Arc<dyn TokenRefresher>)
        }
        (Some(refresh), _, _, Some(client_id), Some(secret)) => {
            let oauth = OAuthRefresher::new(client_id.clone(), secret.clone(), refresh.clone())
                .with_url(catalog.accounts_url.clone());
            Some(Arc::new(oauth) as Arc<dyn TokenRefresher>)
        }
        _ => {
            debug!("Token refresh not configured; a 401 will be final");
            None
        }
    };

    let tokens = Arc::new(TokenManager::new(access_token, refresher));
    let client = SpotifyClient::new(settings.catalog.api_base.clone(), tokens)
        .context("Failed to build HTTP client")?
        .with_market(settings.search.market.clone());
    Ok(client)
}

fn read_recommendation(path: &std::path::Path) -> Result<Recommendation> {
    let path = config::absolutize(path)?;
    Recommendation::load_json(&path).with_context(|| format!("Failed to read recommendation from {}", path.display()))
}

fn print_members<'a>(names: impl Iterator<Item = &'a str>) {
    for (index, name) in names.enumerate() {
        println!("{index:>3}  {name}");
    }
}

fn print_features(features: &AudioFeatures) {
    for (feature, value) in features.iter() {
        if feature.is_integral() {
            println!("  {:<18} {value:.0}", feature.api_name());
        } else {
            println!("  {:<18} {value:.3}", feature.api_name());
        }
    }
}

fn print_recommendation(recommendation: &Recommendation) {
    println!("{}", recommendation.selection);
    print_features(&recommendation.features);
    println!();

    if recommendation.is_empty() {
        println!("No songs found after {} attempts.", recommendation.attempts);
        return;
    }

    println!(
        "{} tracks (attempt {}):",
        recommendation.tracks.len(),
        recommendation.attempts
    );
    for (index, track) in recommendation.tracks.iter().enumerate() {
        println!("{:>3}. {track}", index + 1);
        if let Some(preview) = &track.preview_url {
            println!("      preview: {preview}");
        }
    }
}
