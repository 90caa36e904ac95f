//! Fuel Anomaly Detector
//!
//! Couples the [`FuelDataPreprocessor`] with an [`IsolationForest`] and
//! manages the `Untrained -> Trained` lifecycle.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fuelwatch::detector::FuelAnomalyDetector;
//! # fn example(records: Vec<fuelwatch::FuelRecord>) -> fuelwatch::Result<()> {
//! let mut detector = FuelAnomalyDetector::default();
//! let outcome = detector.train(&records)?;
//! println!("anomaly rate: {:.2}%", outcome.stats.anomaly_rate * 100.0);
//!
//! let scored = detector.predict(&records)?;
//! for record in detector.get_top_anomalies(&scored, 5)? {
//!     println!("{} {:.4}", record.row.vehicle_id, record.anomaly_score);
//! }
//! detector.save("models/fuel_anomaly_model.json")?;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod bundle;
pub mod evaluation;

use std::borrow::Cow;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{IsolationForest, IsolationForestParams};
use crate::preprocess::{
    Feature, FeatureRow, FuelDataPreprocessor, PreprocessConfig, Preprocessed,
};
use crate::record::FuelRecord;

pub use analysis::{AnomalyFlag, VehicleAnomalySummary};
pub use bundle::{BundleMetadata, FittedBundle, BUNDLE_FORMAT_VERSION};
pub use evaluation::EvaluationReport;

/// Fewest cleaned records a model can be trained on
pub const MIN_TRAINING_RECORDS: usize = 2;

/// Isolation forest settings used by `train`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Expected share of anomalies, in (0, 0.5]
    pub contamination: f64,
    pub seed: u64,
    pub n_estimators: usize,
    /// Rows per tree; `None` = min(256, n)
    pub max_samples: Option<usize>,
    pub max_features: f64,
    pub bootstrap: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        let params = IsolationForestParams::default();
        Self {
            contamination: params.contamination,
            seed: params.seed,
            n_estimators: params.n_estimators,
            max_samples: params.max_samples,
            max_features: params.max_features,
            bootstrap: params.bootstrap,
        }
    }
}

impl DetectorConfig {
    pub fn forest_params(&self) -> IsolationForestParams {
        IsolationForestParams {
            n_estimators: self.n_estimators,
            max_samples: self.max_samples,
            max_features: self.max_features,
            bootstrap: self.bootstrap,
            contamination: self.contamination,
            seed: self.seed,
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.forest_params().validate()
    }
}

/// An engineered record with its model verdict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredRecord {
    #[serde(flatten)]
    pub row: FeatureRow,
    /// Decision value; negative = anomalous, lower = more anomalous
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

/// Scored rows ordered by (vehicle_id, timestamp).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LabeledTable {
    pub records: Vec<ScoredRecord>,
}

impl LabeledTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_anomaly).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredRecord> {
        self.records.iter()
    }
}

/// Input accepted by the analysis helpers: raw records are scored first.
#[derive(Debug, Clone, Copy)]
pub enum Batch<'a> {
    Raw(&'a [FuelRecord]),
    Labeled(&'a LabeledTable),
}

impl<'a> From<&'a [FuelRecord]> for Batch<'a> {
    fn from(records: &'a [FuelRecord]) -> Self {
        Batch::Raw(records)
    }
}

impl<'a> From<&'a Vec<FuelRecord>> for Batch<'a> {
    fn from(records: &'a Vec<FuelRecord>) -> Self {
        Batch::Raw(records.as_slice())
    }
}

impl<'a> From<&'a LabeledTable> for Batch<'a> {
    fn from(table: &'a LabeledTable) -> Self {
        Batch::Labeled(table)
    }
}

/// Statistics recorded by `train`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    /// Records handed to `train`
    pub input_records: usize,
    /// Records that survived cleaning and were used for fitting
    pub total_records: usize,
    pub anomalies_detected: usize,
    pub anomaly_rate: f64,
    pub features_used: usize,
    pub feature_names: Vec<Feature>,
    pub contamination_setting: f64,
    pub seed: u64,
    pub training_date: DateTime<Utc>,
}

/// Result of a successful `train`
#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub table: LabeledTable,
    pub stats: TrainingStats,
    pub model_version: String,
}

/// Details of a trained model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_version: String,
    pub contamination: f64,
    pub seed: u64,
    pub training_stats: TrainingStats,
    pub model_params: IsolationForestParams,
    pub preprocessor_features: Vec<Feature>,
    pub trained_at: DateTime<Utc>,
}

/// Health/status view of a detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModelStatus {
    NotTrained,
    Trained(ModelInfo),
}

impl ModelStatus {
    pub fn is_trained(&self) -> bool {
        matches!(self, ModelStatus::Trained(_))
    }
}

/// Opaque version tag: `v<date>_<time>_<8 hex>`
fn new_model_version(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("v{}_{}", now.format("%Y%m%d_%H%M%S"), &suffix[..8])
}

/// Isolation-forest anomaly detector for fuel records
#[derive(Debug, Clone, Default)]
pub struct FuelAnomalyDetector {
    config: DetectorConfig,
    /// Owns the canonical feature list across retrains
    preprocessor: FuelDataPreprocessor,
    fitted: Option<FittedBundle>,
}

impl FuelAnomalyDetector {
    pub fn new(config: DetectorConfig, preprocess: PreprocessConfig) -> Self {
        Self {
            config,
            preprocessor: FuelDataPreprocessor::new(preprocess),
            fitted: None,
        }
    }

    /// Trained detector restored from a bundle
    pub fn from_bundle(bundle: FittedBundle) -> Self {
        let params = bundle.forest.params();
        let config = DetectorConfig {
            contamination: params.contamination,
            seed: params.seed,
            n_estimators: params.n_estimators,
            max_samples: params.max_samples,
            max_features: params.max_features,
            bootstrap: params.bootstrap,
        };
        Self {
            config,
            preprocessor: FuelDataPreprocessor::from_state(bundle.preprocessor.clone()),
            fitted: Some(bundle),
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn is_trained(&self) -> bool {
        self.fitted.is_some()
    }

    pub fn bundle(&self) -> Option<&FittedBundle> {
        self.fitted.as_ref()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.fitted
            .as_ref()
            .map(|bundle| bundle.metadata.model_version.as_str())
    }

    pub fn feature_names(&self) -> &[Feature] {
        self.fitted
            .as_ref()
            .map(|bundle| bundle.preprocessor.feature_names())
            .unwrap_or(&[])
    }

    fn fitted(&self) -> Result<&FittedBundle> {
        self.fitted
            .as_ref()
            .ok_or_else(|| Error::State("model must be trained before making predictions".into()))
    }

    /// Train with an explicit contamination and seed, overriding the config.
    ///
    /// The override is kept only when training succeeds.
    pub fn train_with(
        &mut self,
        records: &[FuelRecord],
        contamination: f64,
        seed: u64,
    ) -> Result<TrainingOutcome> {
        let previous = self.config.clone();
        self.config.contamination = contamination;
        self.config.seed = seed;
        let result = self.train(records);
        if result.is_err() {
            self.config = previous;
        }
        result
    }

    /// Fit preprocessor and forest on `records` and label them.
    ///
    /// On failure the detector keeps its previous state.
    pub fn train(&mut self, records: &[FuelRecord]) -> Result<TrainingOutcome> {
        self.config.validate()?;
        info!(
            "Training isolation forest: records={}, contamination={}, seed={}",
            records.len(),
            self.config.contamination,
            self.config.seed
        );

        let mut preprocessor = self.preprocessor.clone();
        let prepared = preprocessor.fit_transform(records)?;
        if prepared.table.len() < MIN_TRAINING_RECORDS {
            return Err(Error::Data(format!(
                "{} record(s) after cleaning, need at least {}",
                prepared.table.len(),
                MIN_TRAINING_RECORDS
            )));
        }

        let forest = IsolationForest::fit(self.config.forest_params(), &prepared.features)?;
        let table = label(&forest, prepared)?;

        let trained_at = Utc::now();
        let state = preprocessor
            .state()
            .cloned()
            .ok_or_else(|| Error::State("preprocessor was not fitted".into()))?;
        let total_records = table.len();
        let anomalies_detected = table.anomaly_count();
        let stats = TrainingStats {
            input_records: records.len(),
            total_records,
            anomalies_detected,
            anomaly_rate: anomalies_detected as f64 / total_records as f64,
            features_used: state.feature_names().len(),
            feature_names: state.feature_names().to_vec(),
            contamination_setting: self.config.contamination,
            seed: self.config.seed,
            training_date: trained_at,
        };
        let model_version = new_model_version(trained_at);

        let bundle = FittedBundle::new(
            state,
            forest,
            BundleMetadata {
                model_version: model_version.clone(),
                training_stats: stats.clone(),
            },
        );

        self.preprocessor = preprocessor;
        self.fitted = Some(bundle);

        info!(
            "Training completed: version={}, records={}, anomalies={} ({:.2}%), features={}",
            model_version,
            stats.total_records,
            stats.anomalies_detected,
            stats.anomaly_rate * 100.0,
            stats.features_used
        );

        Ok(TrainingOutcome {
            table,
            stats,
            model_version,
        })
    }

    /// Score `records` with the frozen preprocessor and forest.
    ///
    /// A batch where nothing survives cleaning yields an empty table.
    pub fn predict(&self, records: &[FuelRecord]) -> Result<LabeledTable> {
        let bundle = self.fitted()?;
        let prepared = bundle.preprocessor.transform(records)?;
        if prepared.table.is_empty() {
            warn!(
                "No valid data available for prediction ({} input records)",
                records.len()
            );
            return Ok(LabeledTable::default());
        }
        let table = label(&bundle.forest, prepared)?;
        debug!(
            "Scored {} of {} records, {} flagged",
            table.len(),
            records.len(),
            table.anomaly_count()
        );
        Ok(table)
    }

    /// Labeled view of a batch, scoring raw records on the way
    fn resolve<'a>(&self, batch: Batch<'a>) -> Result<Cow<'a, LabeledTable>> {
        self.fitted()?;
        match batch {
            Batch::Raw(records) => Ok(Cow::Owned(self.predict(records)?)),
            Batch::Labeled(table) => Ok(Cow::Borrowed(table)),
        }
    }

    /// Anomalous rows, most anomalous first.
    ///
    /// With a threshold, rows scoring below it are returned regardless of
    /// the model's label.
    pub fn get_anomalies<'a>(
        &self,
        batch: impl Into<Batch<'a>>,
        threshold: Option<f64>,
    ) -> Result<Vec<ScoredRecord>> {
        let table = self.resolve(batch.into())?;
        Ok(analysis::select_anomalies(&table, threshold))
    }

    /// The `n` lowest-scoring rows
    pub fn get_top_anomalies<'a>(
        &self,
        batch: impl Into<Batch<'a>>,
        n: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let table = self.resolve(batch.into())?;
        Ok(analysis::top_anomalies(&table, n))
    }

    pub fn analyze_anomalies_by_vehicle<'a>(
        &self,
        batch: impl Into<Batch<'a>>,
    ) -> Result<Vec<VehicleAnomalySummary>> {
        let table = self.resolve(batch.into())?;
        Ok(analysis::summarize_by_vehicle(&table))
    }

    /// Per-record verdicts keyed by storage id for write-back
    pub fn anomaly_flags<'a>(&self, batch: impl Into<Batch<'a>>) -> Result<Vec<AnomalyFlag>> {
        let table = self.resolve(batch.into())?;
        Ok(analysis::anomaly_flags(&table))
    }

    /// Compare predictions on `records` with ground truth aligned to them
    pub fn evaluate_with_labels(
        &self,
        records: &[FuelRecord],
        truth: &[bool],
    ) -> Result<EvaluationReport> {
        if truth.len() != records.len() {
            return Err(Error::invalid_parameter(
                "truth",
                format!(
                    "{} labels for {} records",
                    truth.len(),
                    records.len()
                ),
            ));
        }
        let table = self.predict(records)?;
        if table.is_empty() {
            return Err(Error::Data("no records survived cleaning to evaluate".into()));
        }
        let pairs: Vec<(bool, bool)> = table
            .iter()
            .map(|record| (truth[record.row.source_index], record.is_anomaly))
            .collect();
        Ok(EvaluationReport::from_pairs(&pairs))
    }

    pub fn status(&self) -> ModelStatus {
        match &self.fitted {
            None => ModelStatus::NotTrained,
            Some(bundle) => {
                let params = bundle.forest.params();
                ModelStatus::Trained(ModelInfo {
                    model_version: bundle.metadata.model_version.clone(),
                    contamination: params.contamination,
                    seed: params.seed,
                    training_stats: bundle.metadata.training_stats.clone(),
                    model_params: params.clone(),
                    preprocessor_features: bundle.preprocessor.feature_names().to_vec(),
                    trained_at: bundle.metadata.training_stats.training_date,
                })
            }
        }
    }

    /// Alias of [`status`](Self::status)
    pub fn model_info(&self) -> ModelStatus {
        self.status()
    }

    /// Persist the fitted bundle as JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let bundle = self
            .fitted
            .as_ref()
            .ok_or_else(|| Error::State("cannot save an untrained model".into()))?;
        bundle.save(path)
    }

    /// Restore a trained detector from a bundle file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_bundle(FittedBundle::load(path)?))
    }

    /// As [`load`](Self::load), rejecting bundles fitted on other features
    pub fn load_expecting(path: impl AsRef<Path>, features: &[Feature]) -> Result<Self> {
        Ok(Self::from_bundle(FittedBundle::load_expecting(path, features)?))
    }
}

/// Attach decision scores and labels to preprocessed rows
fn label(forest: &IsolationForest, prepared: Preprocessed) -> Result<LabeledTable> {
    let scores = forest.decision_function(&prepared.features)?;
    let records = prepared
        .table
        .rows
        .into_iter()
        .zip(scores)
        .map(|(row, anomaly_score)| ScoredRecord {
            row,
            anomaly_score,
            is_anomaly: anomaly_score < 0.0,
        })
        .collect();
    Ok(LabeledTable { records })
}
