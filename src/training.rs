//! # Training
//!
//! End-to-end training run: fetch the corpus, synthesize the training set,
//! fit on the blocking pool, persist on success.
//!
//! Only one run may be in flight per [`Trainer`]. A second `train` call while
//! one is running fails fast with `TrainingInProgress` instead of queueing.
//!
//! The stored artifact is replaced only after a fit completes. A failed or
//! cancelled run leaves the previously persisted model untouched.

use crate::dataset::{build_training_set, SynthesisConfig};
use crate::error::{RecommendError, Result, Stage};
use crate::model::store::ModelStore;
use crate::model::{EpochLog, FitOptions, ModelConfig, RegressionModel, TrainingLog};
use async_trait::async_trait;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Where the training CSV comes from.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    async fn fetch(&self) -> Result<String>;
    fn describe(&self) -> String;
}

/// A CSV on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileCorpus {
    path: PathBuf,
}

impl FileCorpus {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CorpusSource for FileCorpus {
    async fn fetch(&self) -> Result<String> {
        tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| RecommendError::Corpus(format!("{}: {e}", self.path.display())))
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// A CSV served over HTTP, e.g. from object storage.
#[derive(Debug, Clone)]
pub struct HttpCorpus {
    http: reqwest::Client,
    url: String,
    bearer: Option<String>,
}

impl HttpCorpus {
    pub fn new(url: impl Into<String>, bearer: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: url.into(),
            bearer,
        }
    }
}

#[async_trait]
impl CorpusSource for HttpCorpus {
    async fn fetch(&self) -> Result<String> {
        let network = |e: reqwest::Error| RecommendError::Network {
            stage: Stage::CorpusDownload,
            message: e.to_string(),
        };

        let mut request = self.http.get(&self.url);
        if let Some(token) = &self.bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(network)?;
        let response = response.error_for_status().map_err(network)?;
        response.text().await.map_err(network)
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}

/// Pick a source from a location string: `http(s)://` URLs are downloaded,
/// anything else is read as a file path.
pub fn corpus_source(location: &str, bearer: Option<String>) -> Box<dyn CorpusSource> {
    if location.starts_with("http://") || location.starts_with("https://") {
        Box::new(HttpCorpus::new(location, bearer))
    } else {
        Box::new(FileCorpus::new(location))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSettings {
    pub model: ModelConfig,
    pub synthesis: SynthesisConfig,
    pub fit: FitOptions,
    /// Fixed seed for weight init, shuffling and dropout.
    pub seed: Option<u64>,
}

/// Result of a completed run.
#[derive(Debug)]
pub struct TrainingReport {
    pub examples: usize,
    pub log: TrainingLog,
    /// The fitted model, already persisted.
    pub model: RegressionModel,
}

/// Clears the in-flight flag when the run ends, however it ends.
///
/// Owned so it can follow the fit onto the blocking pool: the flag stays set
/// until the fit itself returns, even if the caller stopped waiting.
struct InFlight(Arc<AtomicBool>);

impl InFlight {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| RecommendError::TrainingInProgress)?;
        Ok(Self(Arc::clone(flag)))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Trainer {
    store: Arc<dyn ModelStore>,
    settings: TrainingSettings,
    in_flight: Arc<AtomicBool>,
}

impl Trainer {
    pub fn new(store: Arc<dyn ModelStore>, settings: TrainingSettings) -> Self {
        Self {
            store,
            settings,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_training(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one training pass.
    ///
    /// `on_epoch` observes every epoch from the blocking pool. Cancelling
    /// `cancel` aborts the download or stops the fit at the next epoch
    /// boundary. Dropping the returned future does the same: the fit stops at
    /// its next epoch boundary without saving, and [`Trainer::is_training`]
    /// stays true until it has.
    pub async fn train<F>(
        &self,
        source: &dyn CorpusSource,
        cancel: &CancellationToken,
        mut on_epoch: F,
    ) -> Result<TrainingReport>
    where
        F: FnMut(&EpochLog) + Send + 'static,
    {
        let in_flight = InFlight::acquire(&self.in_flight)?;

        info!("Fetching training corpus from {}", source.describe());
        let csv = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RecommendError::Cancelled),
            csv = source.fetch() => csv?,
        };

        let set = build_training_set(&csv, &self.settings.synthesis)?;
        let examples = set.len();
        info!("Synthesized {examples} training examples");

        let store = Arc::clone(&self.store);
        let settings = self.settings.clone();
        let fit_cancel = cancel.child_token();
        let _cancel_on_drop = fit_cancel.clone().drop_guard();

        let fitted = tokio::task::spawn_blocking(move || -> Result<(RegressionModel, TrainingLog)> {
            let _in_flight = in_flight;
            let mut rng = match settings.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut model = RegressionModel::load_or_build(store.as_ref(), settings.model.clone(), &mut rng);

            let log = model.fit(&set, &settings.fit, &mut rng, |epoch| {
                info!(
                    "Epoch {}: loss = {:.6}, mae = {:.6}",
                    epoch.epoch + 1,
                    epoch.loss,
                    epoch.mae
                );
                if let (Some(val_loss), Some(val_mae)) = (epoch.val_loss, epoch.val_mae) {
                    debug!("Epoch {}: val_loss = {val_loss:.6}, val_mae = {val_mae:.6}", epoch.epoch + 1);
                }
                on_epoch(epoch);
                if fit_cancel.is_cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;

            // The caller may have gone away during the last epoch.
            if fit_cancel.is_cancelled() {
                return Err(RecommendError::Cancelled);
            }
            model.save(store.as_ref())?;
            Ok((model, log))
        })
        .await
        .map_err(|e| RecommendError::TrainingFailure(format!("training task failed: {e}")))??;

        let (model, log) = fitted;
        if let Some(loss) = log.final_loss() {
            info!("Training complete after {} epochs, final loss {loss:.6}", log.epochs.len());
        }
        Ok(TrainingReport { examples, log, model })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::network::Loss;
    use crate::model::store::MemoryModelStore;
    use crate::model::ModelState;
    use std::sync::Mutex;
    use std::time::Duration;

    const CSV: &str = "label,acousticness,danceability,energy,instrumentalness,key,liveness,loudness,mode,speechiness,tempo,time_signature,valence\n\
                       Happy,0.2,0.8,0.8,0.0,5,0.1,-5,1,0.05,125,4,0.9\n\
                       Sad,0.8,0.3,0.2,0.1,2,0.1,-14,0,0.04,70,4,0.2\n";

    /// Finite on disk, but its squared residual overflows.
    const OVERFLOWING_CSV: &str = "label,acousticness,danceability,energy,instrumentalness,key,liveness,loudness,mode,speechiness,tempo,time_signature,valence\n\
                                   Happy,0.2,0.8,0.8,0.0,5,0.1,-5,1,0.05,1e200,4,0.9\n";

    struct StaticCorpus(&'static str);

    #[async_trait]
    impl CorpusSource for StaticCorpus {
        async fn fetch(&self) -> Result<String> {
            Ok(self.0.to_string())
        }

        fn describe(&self) -> String {
            "static".into()
        }
    }

    /// Never resolves, so a second caller can observe the in-flight flag.
    struct StalledCorpus;

    #[async_trait]
    impl CorpusSource for StalledCorpus {
        async fn fetch(&self) -> Result<String> {
            std::future::pending::<()>().await;
            Ok(String::new())
        }

        fn describe(&self) -> String {
            "stalled".into()
        }
    }

    fn settings() -> TrainingSettings {
        TrainingSettings {
            synthesis: SynthesisConfig {
                pure_replicas: 5,
                combination_replicas: 5,
            },
            fit: FitOptions {
                epochs: 3,
                batch_size: 8,
                validation_split: 0.0,
            },
            seed: Some(7),
            ..TrainingSettings::default()
        }
    }

    #[tokio::test]
    async fn test_train_persists_on_success() {
        let store = Arc::new(MemoryModelStore::new());
        let trainer = Trainer::new(store.clone(), settings());
        let epochs = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&epochs);

        let report = trainer
            .train(&StaticCorpus(CSV), &CancellationToken::new(), move |e| {
                seen.lock().unwrap().push(e.epoch)
            })
            .await
            .unwrap();

        assert_eq!(report.examples, 10);
        assert_eq!(report.log.epochs.len(), 3);
        assert_eq!(*epochs.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(report.model.state(), ModelState::Persisted);
        assert!(store.load().unwrap().is_some());
        assert!(!trainer.is_training());
    }

    #[tokio::test]
    async fn test_cancelled_run_leaves_store_untouched() {
        let store = Arc::new(MemoryModelStore::with_bytes(b"previous".to_vec()));
        let trainer = Trainer::new(store.clone(), settings());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        let err = trainer
            .train(&StaticCorpus(CSV), &cancel, move |_| trigger.cancel())
            .await
            .unwrap_err();

        assert!(matches!(err, RecommendError::Cancelled));
        assert_eq!(store.load().unwrap(), Some(b"previous".to_vec()));
        assert!(!trainer.is_training());
    }

    #[tokio::test]
    async fn test_dropped_run_stops_fit_without_saving() {
        let store = Arc::new(MemoryModelStore::with_bytes(b"previous".to_vec()));
        let mut settings = settings();
        settings.fit.epochs = 50;
        let trainer = Trainer::new(store.clone(), settings);

        // The first epoch parks the fit until the test lets it go.
        let (started_tx, mut started_rx) = tokio::sync::mpsc::unbounded_channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
        let corpus = StaticCorpus(CSV);
        let cancel = CancellationToken::new();
        let run = trainer.train(&corpus, &cancel, move |e| {
            if e.epoch == 0 {
                let _ = started_tx.send(());
                let _ = release_rx.recv();
            }
        });

        let observed = tokio::time::timeout(Duration::from_secs(30), async {
            tokio::select! {
                _ = run => panic!("run finished while its fit was parked"),
                _ = started_rx.recv() => {}
            }
        })
        .await;
        assert!(observed.is_ok(), "fit never reached its first epoch");

        // The caller is gone but the fit is still on the blocking pool.
        assert!(trainer.is_training());
        let second = trainer.train(&StaticCorpus(CSV), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(second, Err(RecommendError::TrainingInProgress)));

        release_tx.send(()).unwrap();
        for _ in 0..1000 {
            if !trainer.is_training() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!trainer.is_training());
        assert_eq!(store.load().unwrap(), Some(b"previous".to_vec()));
    }

    #[tokio::test]
    async fn test_non_finite_loss_keeps_previous_model() {
        let store = Arc::new(MemoryModelStore::with_bytes(b"previous".to_vec()));
        let mut settings = settings();
        settings.model.loss = Loss::MeanSquaredError;
        let trainer = Trainer::new(store.clone(), settings);

        let err = trainer
            .train(&StaticCorpus(OVERFLOWING_CSV), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, RecommendError::TrainingFailure(_)), "{err}");
        assert_eq!(store.load().unwrap(), Some(b"previous".to_vec()));
        assert!(!trainer.is_training());
    }

    #[tokio::test]
    async fn test_malformed_corpus_fails_before_fit() {
        let store = Arc::new(MemoryModelStore::new());
        let trainer = Trainer::new(store.clone(), settings());
        let err = trainer
            .train(&StaticCorpus("label,a\nHappy,not-a-number\n"), &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, RecommendError::Corpus(_)));
        assert!(store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_overlapping_runs_are_rejected() {
        let trainer = Arc::new(Trainer::new(Arc::new(MemoryModelStore::new()), settings()));
        let cancel = CancellationToken::new();

        let first = {
            let trainer = Arc::clone(&trainer);
            let cancel = cancel.clone();
            tokio::spawn(async move { trainer.train(&StalledCorpus, &cancel, |_| {}).await.map(|_| ()) })
        };
        while !trainer.is_training() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let second = trainer.train(&StaticCorpus(CSV), &CancellationToken::new(), |_| {}).await;
        assert!(matches!(second, Err(RecommendError::TrainingInProgress)));

        cancel.cancel();
        assert!(matches!(first.await.unwrap(), Err(RecommendError::Cancelled)));
        assert!(!trainer.is_training());
    }

    #[tokio::test]
    async fn test_file_corpus_missing_file() {
        let err = FileCorpus::new("/definitely/not/here.csv").fetch().await.unwrap_err();
        assert!(matches!(err, RecommendError::Corpus(_)));
    }

    #[test]
    fn test_corpus_source_dispatch() {
        assert_eq!(corpus_source("https://bucket/data.csv", None).describe(), "https://bucket/data.csv");
        assert_eq!(corpus_source("data/train.csv", None).describe(), "data/train.csv");
    }
}
