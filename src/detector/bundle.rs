//! Persisted detector bundle
//!
//! The fitted preprocessor, the forest and the training metadata travel as a
//! single value. A bundle is written and read whole; its parts are never
//! persisted or swapped independently.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use super::TrainingStats;
use crate::error::{Error, Result};
use crate::model::IsolationForest;
use crate::preprocess::{Feature, FittedPreprocessorState};

/// Current on-disk layout
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub model_version: String,
    pub training_stats: TrainingStats,
}

/// Fitted preprocessor + forest + metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedBundle {
    pub(crate) format_version: u32,
    pub(crate) preprocessor: FittedPreprocessorState,
    pub(crate) forest: IsolationForest,
    pub(crate) metadata: BundleMetadata,
}

impl FittedBundle {
    pub(crate) fn new(
        preprocessor: FittedPreprocessorState,
        forest: IsolationForest,
        metadata: BundleMetadata,
    ) -> Self {
        Self {
            format_version: BUNDLE_FORMAT_VERSION,
            preprocessor,
            forest,
            metadata,
        }
    }

    pub fn preprocessor(&self) -> &FittedPreprocessorState {
        &self.preprocessor
    }

    pub fn forest(&self) -> &IsolationForest {
        &self.forest
    }

    pub fn metadata(&self) -> &BundleMetadata {
        &self.metadata
    }

    pub fn feature_names(&self) -> &[Feature] {
        self.preprocessor.feature_names()
    }

    /// Default file name for a model version
    pub fn default_path(dir: impl AsRef<Path>, model_version: &str) -> PathBuf {
        dir.as_ref()
            .join(format!("anomaly_model_{}.json", model_version))
    }

    /// Feature list, scaler and forest must agree with each other.
    pub fn validate(&self) -> Result<()> {
        if self.format_version != BUNDLE_FORMAT_VERSION {
            return Err(Error::Shape(format!(
                "unsupported bundle format {}, expected {}",
                self.format_version, BUNDLE_FORMAT_VERSION
            )));
        }
        self.preprocessor.validate()?;
        self.forest.validate()?;

        let width = self.preprocessor.feature_names().len();
        if self.forest.n_features() != width {
            return Err(Error::Shape(format!(
                "forest fitted on {} features, preprocessor provides {}",
                self.forest.n_features(),
                width
            )));
        }
        if self.metadata.training_stats.feature_names != self.preprocessor.feature_names() {
            return Err(Error::Shape(
                "training metadata lists different features than the preprocessor".into(),
            ));
        }
        Ok(())
    }

    /// Write as JSON via a temporary file and rename
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let content = serde_json::to_vec(self)?;
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)?;
        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e.into());
        }

        info!(
            "Model saved: path={}, version={}",
            path.display(),
            self.metadata.model_version
        );
        Ok(())
    }

    /// Read and validate a bundle
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read(path)?;
        let bundle: Self = serde_json::from_slice(&content)?;
        bundle.validate()?;
        info!(
            "Model loaded: path={}, version={}",
            path.display(),
            bundle.metadata.model_version
        );
        Ok(bundle)
    }

    /// Load, rejecting a bundle whose feature list differs from `expected`
    pub fn load_expecting(path: impl AsRef<Path>, expected: &[Feature]) -> Result<Self> {
        let bundle = Self::load(path)?;
        if bundle.feature_names() != expected {
            return Err(Error::Shape(format!(
                "bundle features [{}] differ from expected [{}]",
                join(bundle.feature_names()),
                join(expected)
            )));
        }
        Ok(bundle)
    }
}

fn join(features: &[Feature]) -> String {
    features
        .iter()
        .map(|f| f.name())
        .collect::<Vec<_>>()
        .join(", ")
}
