//! # fuelwatch
//!
//! Anomaly detection for fleet fuel logs.
//!
//! Raw [`FuelRecord`]s are cleaned, turned into per-vehicle feature vectors
//! and scored by an isolation forest. The fitted preprocessor and forest are
//! persisted together as a single [`FittedBundle`] so that later batches are
//! always scored in the feature space the model was trained on.
//!
//! - [`preprocess`]: cleaning, feature engineering, scaling
//! - [`model`]: the isolation forest
//! - [`detector`]: training, prediction, analysis and persistence
//! - [`service`]: async wrapper for long-running hosts

pub mod config;
pub mod detector;
pub mod error;
pub mod logging;
pub mod model;
pub mod preprocess;
pub mod record;
pub mod service;

pub use detector::{
    FittedBundle, FuelAnomalyDetector, LabeledTable, ModelStatus, ScoredRecord, TrainingStats,
};
pub use error::{Error, Result};
pub use preprocess::{Feature, FuelDataPreprocessor};
pub use record::FuelRecord;
pub use service::AnomalyService;
