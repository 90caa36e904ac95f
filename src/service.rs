//! Anomaly Analysis Service
//!
//! Async front for the synchronous detector. Exactly one fitted detector is
//! current at any time; training and loading build a replacement off to the
//! side and swap it in whole.
//!
//! - train / predict run on tokio's blocking pool
//! - concurrent predictions share the current detector through an `Arc`
//! - at most one training run is in flight

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::detector::{
    AnomalyFlag, DetectorConfig, FittedBundle, FuelAnomalyDetector, LabeledTable, ModelStatus,
    TrainingStats, VehicleAnomalySummary,
};
use crate::error::Result;
use crate::preprocess::PreprocessConfig;
use crate::record::FuelRecord;

/// Service health view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub model: ModelStatus,
    pub last_training: Option<DateTime<Utc>>,
}

/// How `load_or_train` obtained its model
#[derive(Debug, Clone, PartialEq)]
pub enum ModelSource {
    Loaded { model_version: String },
    Trained { model_version: String, stats: TrainingStats },
}

pub struct AnomalyService {
    detector_config: DetectorConfig,
    preprocess_config: PreprocessConfig,
    current: RwLock<Arc<FuelAnomalyDetector>>,
    last_training: RwLock<Option<DateTime<Utc>>>,
    training: Mutex<()>,
}

impl AnomalyService {
    pub fn new(detector_config: DetectorConfig, preprocess_config: PreprocessConfig) -> Self {
        let untrained = FuelAnomalyDetector::new(detector_config.clone(), preprocess_config.clone());
        Self {
            detector_config,
            preprocess_config,
            current: RwLock::new(Arc::new(untrained)),
            last_training: RwLock::new(None),
            training: Mutex::new(()),
        }
    }

    /// Snapshot of the current detector
    pub async fn detector(&self) -> Arc<FuelAnomalyDetector> {
        self.current.read().await.clone()
    }

    async fn swap(&self, detector: FuelAnomalyDetector) {
        *self.current.write().await = Arc::new(detector);
    }

    /// Train a fresh detector on `records` and make it current.
    ///
    /// The previous detector stays in place when training fails.
    pub async fn train(&self, records: Vec<FuelRecord>) -> Result<TrainingStats> {
        let _guard = self.training.lock().await;
        let mut detector =
            FuelAnomalyDetector::new(self.detector_config.clone(), self.preprocess_config.clone());

        let (detector, outcome) = spawn_blocking(move || {
            let outcome = detector.train(&records)?;
            Ok::<_, crate::error::Error>((detector, outcome))
        })
        .await??;

        self.swap(detector).await;
        *self.last_training.write().await = Some(outcome.stats.training_date);
        info!("Service switched to model {}", outcome.model_version);
        Ok(outcome.stats)
    }

    /// Load a bundle from disk and make it current.
    ///
    /// `last_training` follows the training date recorded in the bundle.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref().to_path_buf();
        let detector = spawn_blocking(move || FuelAnomalyDetector::load(path)).await??;
        let version = detector.model_version().unwrap_or_default().to_string();
        let trained_at = detector
            .bundle()
            .map(|bundle| bundle.metadata().training_stats.training_date);

        let _guard = self.training.lock().await;
        self.swap(detector).await;
        *self.last_training.write().await = trained_at;
        Ok(version)
    }

    /// Persist the current detector
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let detector = self.detector().await;
        let path = path.as_ref().to_path_buf();
        spawn_blocking(move || detector.save(path)).await?
    }

    /// Reuse the bundle at `path` unless `retrain` is set or none exists;
    /// otherwise train on `records` and save to `path`.
    pub async fn load_or_train(
        &self,
        path: impl AsRef<Path>,
        records: Vec<FuelRecord>,
        retrain: bool,
    ) -> Result<ModelSource> {
        let path = path.as_ref();
        if !retrain && path.exists() {
            let model_version = self.load(path).await?;
            info!("Loaded existing anomaly model {}", model_version);
            return Ok(ModelSource::Loaded { model_version });
        }

        let stats = self.train(records).await?;
        self.save(path).await?;
        let model_version = self
            .detector()
            .await
            .model_version()
            .unwrap_or_default()
            .to_string();
        Ok(ModelSource::Trained {
            model_version,
            stats,
        })
    }

    /// Train and save under `dir` with the version-derived file name
    pub async fn train_and_save(
        &self,
        dir: impl AsRef<Path>,
        records: Vec<FuelRecord>,
    ) -> Result<(TrainingStats, PathBuf)> {
        let stats = self.train(records).await?;
        let detector = self.detector().await;
        let path = FittedBundle::default_path(dir, detector.model_version().unwrap_or_default());
        self.save(&path).await?;
        Ok((stats, path))
    }

    pub async fn predict(&self, records: Vec<FuelRecord>) -> Result<LabeledTable> {
        let detector = self.detector().await;
        debug!("Scoring batch of {} records", records.len());
        spawn_blocking(move || detector.predict(&records)).await?
    }

    pub async fn anomaly_flags(&self, records: Vec<FuelRecord>) -> Result<Vec<AnomalyFlag>> {
        let detector = self.detector().await;
        spawn_blocking(move || detector.anomaly_flags(&records)).await?
    }

    pub async fn analyze_by_vehicle(
        &self,
        records: Vec<FuelRecord>,
    ) -> Result<Vec<VehicleAnomalySummary>> {
        let detector = self.detector().await;
        spawn_blocking(move || detector.analyze_anomalies_by_vehicle(&records)).await?
    }

    pub async fn status(&self) -> ServiceStatus {
        ServiceStatus {
            model: self.detector().await.status(),
            last_training: *self.last_training.read().await,
        }
    }
}

impl Default for AnomalyService {
    fn default() -> Self {
        Self::new(DetectorConfig::default(), PreprocessConfig::default())
    }
}
