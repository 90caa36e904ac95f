//! Isolation Forest
//!
//! Ensemble of random isolation trees. Points that are isolated after few
//! random splits are anomalous. Scores follow the usual convention:
//! `score_samples` is the negated anomaly score (lower = more anomalous),
//! `decision_function` shifts it by the contamination offset so that
//! negative values are outliers, and `predict` returns -1 / +1.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::preprocess::FeatureMatrix;

/// Subsample size used when `max_samples` is left on auto
pub const AUTO_MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Label for an outlier in `predict`
pub const OUTLIER: i8 = -1;
/// Label for an inlier in `predict`
pub const INLIER: i8 = 1;

/// Forest hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForestParams {
    pub n_estimators: usize,
    /// Rows drawn per tree; `None` = min(256, n)
    pub max_samples: Option<usize>,
    /// Fraction of features drawn per tree
    pub max_features: f64,
    /// Draw rows with replacement
    pub bootstrap: bool,
    /// Expected share of outliers, in (0, 0.5]
    pub contamination: f64,
    pub seed: u64,
}

impl Default for IsolationForestParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            max_samples: None,
            max_features: 1.0,
            bootstrap: false,
            contamination: 0.05,
            seed: 42,
        }
    }
}

impl IsolationForestParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.contamination > 0.0 && self.contamination <= 0.5) {
            return Err(Error::invalid_parameter(
                "contamination",
                format!("must be in (0, 0.5], got {}", self.contamination),
            ));
        }
        if self.n_estimators == 0 {
            return Err(Error::invalid_parameter(
                "n_estimators",
                "must be at least 1",
            ));
        }
        if !(self.max_features > 0.0 && self.max_features <= 1.0) {
            return Err(Error::invalid_parameter(
                "max_features",
                format!("must be in (0, 1], got {}", self.max_features),
            ));
        }
        if self.max_samples == Some(0) {
            return Err(Error::invalid_parameter(
                "max_samples",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Average path length of an unsuccessful BST search over `n` points.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A single isolation tree stored as a node arena rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationTree {
    nodes: Vec<Node>,
}

impl IsolationTree {
    fn grow(
        data: &FeatureMatrix,
        sample: Vec<usize>,
        features: &[usize],
        max_depth: usize,
        rng: &mut StdRng,
    ) -> Self {
        let mut nodes = vec![Node::Leaf { size: 0 }];
        let mut pending = vec![(0usize, sample, 0usize)];

        while let Some((slot, rows, depth)) = pending.pop() {
            if depth >= max_depth || rows.len() <= 1 {
                nodes[slot] = Node::Leaf { size: rows.len() };
                continue;
            }

            // only features that still vary inside this node can split it
            let spans: Vec<(usize, f64, f64)> = features
                .iter()
                .filter_map(|&feature| {
                    let (lo, hi) = rows.iter().fold(
                        (f64::INFINITY, f64::NEG_INFINITY),
                        |(lo, hi), &row| {
                            let v = data.get(row, feature);
                            (lo.min(v), hi.max(v))
                        },
                    );
                    (hi > lo).then_some((feature, lo, hi))
                })
                .collect();

            if spans.is_empty() {
                nodes[slot] = Node::Leaf { size: rows.len() };
                continue;
            }

            let (feature, lo, hi) = spans[rng.gen_range(0..spans.len())];
            let threshold = rng.gen_range(lo..hi);
            let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = rows
                .into_iter()
                .partition(|&row| data.get(row, feature) <= threshold);

            let left = nodes.len();
            let right = left + 1;
            nodes.push(Node::Leaf { size: 0 });
            nodes.push(Node::Leaf { size: 0 });
            nodes[slot] = Node::Split {
                feature,
                threshold,
                left,
                right,
            };
            pending.push((right, right_rows, depth + 1));
            pending.push((left, left_rows, depth + 1));
        }

        Self { nodes }
    }

    /// Depth of the leaf reached by `x`, corrected by the leaf's size
    pub fn path_length(&self, x: &[f64]) -> f64 {
        let mut node = 0;
        let mut depth = 0.0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { size } => return depth + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                    depth += 1.0;
                }
            }
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn validate(&self, n_features: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::Shape("isolation tree has no nodes".into()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            if let Node::Split {
                feature,
                threshold,
                left,
                right,
            } = node
            {
                // children always live after their parent, which rules out cycles
                let child_ok = |child: usize| child > index && child < self.nodes.len();
                if *feature >= n_features || !threshold.is_finite() {
                    return Err(Error::Shape(format!(
                        "tree node {} splits on feature {} of {}",
                        index, feature, n_features
                    )));
                }
                if !child_ok(*left) || !child_ok(*right) {
                    return Err(Error::Shape(format!(
                        "tree node {} has invalid children",
                        index
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A fitted isolation forest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    params: IsolationForestParams,
    n_features: usize,
    /// Subsample size actually used per tree
    max_samples: usize,
    offset: f64,
    trees: Vec<IsolationTree>,
}

impl IsolationForest {
    /// Grow the ensemble on `data` and derive the contamination offset from
    /// the training scores.
    pub fn fit(params: IsolationForestParams, data: &FeatureMatrix) -> Result<Self> {
        params.validate()?;
        let n_rows = data.n_rows();
        if n_rows == 0 {
            return Err(Error::Data("cannot fit isolation forest on no rows".into()));
        }

        let n_features = data.n_cols();
        let max_samples = params
            .max_samples
            .unwrap_or(AUTO_MAX_SAMPLES)
            .min(n_rows);
        let max_depth = (max_samples.max(2) as f64).log2().ceil() as usize;
        let features_per_tree = ((params.max_features * n_features as f64) as usize).clamp(1, n_features);

        let mut master = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_estimators)
            .map(|_| {
                let mut rng = StdRng::seed_from_u64(master.gen());
                let sample = if params.bootstrap {
                    (0..max_samples).map(|_| rng.gen_range(0..n_rows)).collect()
                } else {
                    index::sample(&mut rng, n_rows, max_samples).into_vec()
                };
                let features = if features_per_tree == n_features {
                    (0..n_features).collect::<Vec<_>>()
                } else {
                    let mut drawn = index::sample(&mut rng, n_features, features_per_tree).into_vec();
                    drawn.sort_unstable();
                    drawn
                };
                IsolationTree::grow(data, sample, &features, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            params,
            n_features,
            max_samples,
            offset: -0.5,
            trees,
        };

        let training_scores = forest.score_samples(data)?;
        forest.offset = percentile(&training_scores, 100.0 * forest.params.contamination);

        debug!(
            "Isolation forest fitted: trees={}, max_samples={}, max_depth={}, offset={:.6}",
            forest.trees.len(),
            max_samples,
            max_depth,
            forest.offset
        );
        Ok(forest)
    }

    pub fn params(&self) -> &IsolationForestParams {
        &self.params
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn trees(&self) -> &[IsolationTree] {
        &self.trees
    }

    fn check_width(&self, data: &FeatureMatrix) -> Result<()> {
        if data.n_cols() != self.n_features {
            return Err(Error::Shape(format!(
                "model fitted on {} features, got {}",
                self.n_features,
                data.n_cols()
            )));
        }
        Ok(())
    }

    /// Negated anomaly score in [-1, 0); lower is more anomalous
    pub fn score_samples(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        self.check_width(data)?;
        let normaliser = average_path_length(self.max_samples).max(1.0);
        let n_trees = self.trees.len() as f64;
        Ok(data
            .rows()
            .map(|row| {
                let mean_depth =
                    self.trees.iter().map(|tree| tree.path_length(row)).sum::<f64>() / n_trees;
                -(2f64.powf(-mean_depth / normaliser))
            })
            .collect())
    }

    /// Score shifted by the offset; negative values are outliers
    pub fn decision_function(&self, data: &FeatureMatrix) -> Result<Vec<f64>> {
        Ok(self
            .score_samples(data)?
            .into_iter()
            .map(|score| score - self.offset)
            .collect())
    }

    /// [`OUTLIER`] or [`INLIER`] per row
    pub fn predict(&self, data: &FeatureMatrix) -> Result<Vec<i8>> {
        Ok(self
            .decision_function(data)?
            .into_iter()
            .map(|decision| if decision < 0.0 { OUTLIER } else { INLIER })
            .collect())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.trees.is_empty() || self.max_samples == 0 || !self.offset.is_finite() {
            return Err(Error::Shape("isolation forest parameters are inconsistent".into()));
        }
        for tree in &self.trees {
            tree.validate(self.n_features)?;
        }
        Ok(())
    }
}

/// Linearly interpolated percentile, `q` in [0, 100]
pub fn percentile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}
