//! Fuel Data Preprocessing
//!
//! Cleaning, feature engineering and scaling of raw fuel records.
//!
//! ## Pipeline
//!
//! 1. **clean**: drop non-positive fuel/distance, clip 3-sigma outliers
//!    (fuel, then distance, then efficiency), sort by timestamp
//! 2. **engineer**: time-of-day, per-vehicle deviations, rolling windows,
//!    fuel-per-km
//! 3. **select**: lay the canonical feature list out as a matrix
//! 4. **scale**: standardise with the scaler fitted on the reference batch
//!
//! The first `fit_transform` freezes the feature list and scaler in a
//! [`FittedPreprocessorState`]; every later `transform` reuses them so that
//! future batches land in the same feature space.

pub mod clean;
pub mod features;
pub mod scaler;
pub(crate) mod stats;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::record::FuelRecord;

pub use clean::{clean, CleanRecord};
pub use features::{
    engineer_features, rolling_stats, Feature, FeatureMatrix, FeatureRow, FeatureTable,
    RollingStats, TimeFeatures, VehicleStats,
};
pub use scaler::StandardScaler;

/// What `transform` does when a batch cannot provide a fitted feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingFeaturePolicy {
    /// Insert a zero column (before scaling)
    #[default]
    ZeroFill,
    /// Fail with a shape error
    Reject,
}

/// Preprocessing settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    /// Cleaning drops rows further than this many deviations from the mean
    pub outlier_sigma: f64,
    /// Records per rolling window
    pub rolling_window: usize,
    pub missing_feature_policy: MissingFeaturePolicy,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            outlier_sigma: 3.0,
            rolling_window: 3,
            missing_feature_policy: MissingFeaturePolicy::ZeroFill,
        }
    }
}

impl PreprocessConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.outlier_sigma.is_finite() && self.outlier_sigma > 0.0) {
            return Err(Error::invalid_parameter(
                "outlier_sigma",
                "must be a positive number",
            ));
        }
        if self.rolling_window == 0 {
            return Err(Error::invalid_parameter(
                "rolling_window",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Output of `fit_transform` / `transform`.
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Engineered rows, one per surviving record
    pub table: FeatureTable,
    /// Scaled model input, row-aligned with `table`
    pub features: FeatureMatrix,
    /// Input positions of the surviving records, row-aligned with `table`
    pub kept_indices: Vec<usize>,
}

/// Descriptive statistics of one feature over an engineered table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    /// `None` with fewer than two rows
    pub std: Option<f64>,
    pub min: f64,
    pub max: f64,
    /// `None` when either column is constant
    pub correlation_with_efficiency: Option<f64>,
}

/// Frozen feature list and scaler produced by the first fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedPreprocessorState {
    config: PreprocessConfig,
    feature_names: Vec<Feature>,
    scaler: StandardScaler,
}

impl FittedPreprocessorState {
    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn feature_names(&self) -> &[Feature] {
        &self.feature_names
    }

    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    /// Clean, engineer and scale `records` in the fitted feature space.
    ///
    /// A batch with no surviving records yields an empty result rather than
    /// an error.
    pub fn transform(&self, records: &[FuelRecord]) -> Result<Preprocessed> {
        let cleaned = clean(records, self.config.outlier_sigma);
        let table = engineer_features(&cleaned, self.config.rolling_window);
        let raw = FeatureMatrix::from_table(
            &table,
            &self.feature_names,
            self.config.missing_feature_policy,
        )?;
        let features = self.scaler.transform(&raw)?;
        let kept_indices = table.source_indices();
        Ok(Preprocessed {
            table,
            features,
            kept_indices,
        })
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.config.validate()?;
        self.scaler.validate()?;
        if self.feature_names.is_empty() {
            return Err(Error::Shape("fitted feature list is empty".into()));
        }
        if self.feature_names.len() != self.scaler.n_features() {
            return Err(Error::Shape(format!(
                "{} feature names but scaler fitted on {} features",
                self.feature_names.len(),
                self.scaler.n_features()
            )));
        }
        Ok(())
    }
}

/// Stateful preprocessor for fuel efficiency data
#[derive(Debug, Clone, Default)]
pub struct FuelDataPreprocessor {
    config: PreprocessConfig,
    state: Option<FittedPreprocessorState>,
}

impl FuelDataPreprocessor {
    pub fn new(config: PreprocessConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Restore a preprocessor from previously fitted state
    pub fn from_state(state: FittedPreprocessorState) -> Self {
        Self {
            config: state.config.clone(),
            state: Some(state),
        }
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    pub fn state(&self) -> Option<&FittedPreprocessorState> {
        self.state.as_ref()
    }

    pub fn into_state(self) -> Option<FittedPreprocessorState> {
        self.state
    }

    /// Canonical feature list; empty until fitted
    pub fn feature_names(&self) -> &[Feature] {
        self.state
            .as_ref()
            .map(|state| state.feature_names.as_slice())
            .unwrap_or(&[])
    }

    pub fn clean(&self, records: &[FuelRecord]) -> Vec<CleanRecord> {
        clean(records, self.config.outlier_sigma)
    }

    pub fn engineer_features(&self, cleaned: &[CleanRecord]) -> FeatureTable {
        engineer_features(cleaned, self.config.rolling_window)
    }

    /// Feature list a table offers: the frozen list once fitted, otherwise
    /// the candidates the table can provide.
    pub fn select_features(&self, table: &FeatureTable) -> Result<FeatureMatrix> {
        match &self.state {
            Some(state) => FeatureMatrix::from_table(
                table,
                &state.feature_names,
                self.config.missing_feature_policy,
            ),
            None => FeatureMatrix::from_table(
                table,
                &table.available_features(),
                self.config.missing_feature_policy,
            ),
        }
    }

    /// Per-feature statistics of `table` over the fitted feature list.
    ///
    /// Empty until fitted, or when the table has no rows. Features the table
    /// cannot provide are skipped.
    pub fn feature_statistics(&self, table: &FeatureTable) -> BTreeMap<Feature, FeatureStats> {
        let mut out = BTreeMap::new();
        if table.is_empty() {
            return out;
        }
        let efficiency: Vec<f64> = table.rows.iter().map(|row| row.fuel_efficiency).collect();
        for &feature in self.feature_names() {
            if !table.contains(feature) {
                continue;
            }
            let values: Vec<f64> = table
                .rows
                .iter()
                .map(|row| row.value(feature).unwrap_or(0.0))
                .collect();
            out.insert(
                feature,
                FeatureStats {
                    mean: stats::mean(&values).unwrap_or(0.0),
                    std: stats::sample_std(&values),
                    min: stats::min(&values).unwrap_or(0.0),
                    max: stats::max(&values).unwrap_or(0.0),
                    correlation_with_efficiency: stats::pearson(&values, &efficiency),
                },
            );
        }
        out
    }

    /// Fit the scaler (and, on first fit, the feature list) and transform.
    pub fn fit_transform(&mut self, records: &[FuelRecord]) -> Result<Preprocessed> {
        self.config.validate()?;

        let cleaned = self.clean(records);
        if cleaned.is_empty() {
            warn!(
                "No valid data after cleaning ({} input records)",
                records.len()
            );
            return Err(Error::Data(format!(
                "no valid data: none of {} records survived cleaning",
                records.len()
            )));
        }

        let table = self.engineer_features(&cleaned);
        let raw = self.select_features(&table)?;
        let scaler = StandardScaler::fit(&raw)?;
        let features = scaler.transform(&raw)?;

        let state = FittedPreprocessorState {
            config: self.config.clone(),
            feature_names: raw.columns().to_vec(),
            scaler,
        };
        info!(
            "Preprocessor fitted: {} records, {} features",
            table.len(),
            state.feature_names.len()
        );
        debug!(
            "Fitted features: {}",
            state
                .feature_names
                .iter()
                .map(|f| f.name())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.state = Some(state);

        let kept_indices = table.source_indices();
        Ok(Preprocessed {
            table,
            features,
            kept_indices,
        })
    }

    /// Transform with the fitted feature list and scaler; no refitting.
    pub fn transform(&self, records: &[FuelRecord]) -> Result<Preprocessed> {
        self.state
            .as_ref()
            .ok_or_else(|| Error::State("preprocessor must be fitted before transform".into()))?
            .transform(records)
    }
}
