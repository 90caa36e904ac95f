//! Unsupervised scoring models
//!
//! Currently a single estimator: the [`IsolationForest`].

pub mod isolation_forest;

pub use isolation_forest::{
    average_path_length, percentile, IsolationForest, IsolationForestParams, IsolationTree,
    AUTO_MAX_SAMPLES, INLIER, OUTLIER,
};
