//! Per-feature standardisation to zero mean and unit variance.

use serde::{Deserialize, Serialize};

use super::features::FeatureMatrix;
use super::stats;
use crate::error::{Error, Result};

/// Fitted mean and scale for every column of a feature matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    /// Fit on `matrix`; a column without spread gets scale 1.
    pub fn fit(matrix: &FeatureMatrix) -> Result<Self> {
        if matrix.is_empty() {
            return Err(Error::Data("cannot fit scaler on an empty matrix".into()));
        }

        let mut mean = Vec::with_capacity(matrix.n_cols());
        let mut scale = Vec::with_capacity(matrix.n_cols());
        for col in 0..matrix.n_cols() {
            let values = matrix.column(col);
            let m = stats::mean(&values).unwrap_or(0.0);
            let s = stats::population_std(&values).unwrap_or(0.0);
            mean.push(m);
            scale.push(if s == 0.0 { 1.0 } else { s });
        }
        Ok(Self { mean, scale })
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn transform(&self, matrix: &FeatureMatrix) -> Result<FeatureMatrix> {
        if matrix.n_cols() != self.n_features() {
            return Err(Error::Shape(format!(
                "scaler fitted on {} features, got {}",
                self.n_features(),
                matrix.n_cols()
            )));
        }
        Ok(matrix.map_rows(|row, out| {
            out.extend(
                row.iter()
                    .zip(self.mean.iter().zip(&self.scale))
                    .map(|(value, (mean, scale))| (value - mean) / scale),
            );
        }))
    }

    /// Internal consistency check used when a scaler is restored from disk
    pub(crate) fn validate(&self) -> Result<()> {
        if self.mean.len() != self.scale.len() {
            return Err(Error::Shape(format!(
                "scaler has {} means but {} scales",
                self.mean.len(),
                self.scale.len()
            )));
        }
        if self
            .mean
            .iter()
            .chain(&self.scale)
            .any(|value| !value.is_finite())
            || self.scale.iter().any(|s| *s == 0.0)
        {
            return Err(Error::Shape("scaler parameters are not finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::features::Feature;

    fn matrix(data: Vec<f64>) -> FeatureMatrix {
        FeatureMatrix::new(vec![Feature::FuelUsed, Feature::KmDriven], data).unwrap()
    }

    #[test]
    fn test_fit_transform_standardises() {
        let m = matrix(vec![1.0, 5.0, 3.0, 5.0, 5.0, 5.0]);
        let scaler = StandardScaler::fit(&m).unwrap();
        assert_eq!(scaler.mean(), &[3.0, 5.0]);
        // second column is constant: scale falls back to 1
        assert_eq!(scaler.scale()[1], 1.0);

        let scaled = scaler.transform(&m).unwrap();
        let first = scaled.column(0);
        assert!((first.iter().sum::<f64>()).abs() < 1e-12);
        assert_eq!(scaled.column(1), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_transform_rejects_wrong_width() {
        let scaler = StandardScaler::fit(&matrix(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        let narrow = FeatureMatrix::new(vec![Feature::FuelUsed], vec![1.0]).unwrap();
        assert!(matches!(scaler.transform(&narrow), Err(Error::Shape(_))));
    }

    #[test]
    fn test_fit_on_empty_matrix_fails() {
        let empty = matrix(vec![]);
        assert!(matches!(StandardScaler::fit(&empty), Err(Error::Data(_))));
    }

    #[test]
    fn test_validate_detects_corruption() {
        let mut scaler = StandardScaler::fit(&matrix(vec![1.0, 2.0, 3.0, 4.0])).unwrap();
        assert!(scaler.validate().is_ok());
        scaler.scale.pop();
        assert!(scaler.validate().is_err());
    }
}
