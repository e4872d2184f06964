use rand::rngs::StdRng;
use rand::seq::index::sample;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use super::ModelError;

/// Smallest SSE reduction that still counts as a useful split.
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Hyper-parameters of the boosted ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of rows sampled, without replacement, for each tree.
    pub subsample: f64,
    pub min_samples_leaf: usize,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            n_estimators: 150,
            max_depth: 5,
            learning_rate: 0.1,
            subsample: 0.8,
            min_samples_leaf: 1,
            seed: 42,
        }
    }
}

impl GbdtParams {
    fn validate(&self) -> Result<(), ModelError> {
        if self.n_estimators == 0 {
            return Err(ModelError::InvalidParameter(
                "n_estimators must be positive".into(),
            ));
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return Err(ModelError::InvalidParameter(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ModelError::InvalidParameter(format!(
                "subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        if self.min_samples_leaf == 0 {
            return Err(ModelError::InvalidParameter(
                "min_samples_leaf must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        value: f64,
    },
}

/// Regression tree stored as a flat arena; node 0 is the root.
#[derive(Debug, Clone, PartialEq)]
struct RegressionTree {
    nodes: Vec<Node>,
}

struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

impl RegressionTree {
    fn fit(rows: &[Vec<f64>], residuals: &[f64], indices: Vec<usize>, params: &GbdtParams) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        tree.grow(rows, residuals, indices, 0, params);
        tree
    }

    fn grow(
        &mut self,
        rows: &[Vec<f64>],
        residuals: &[f64],
        indices: Vec<usize>,
        depth: usize,
        params: &GbdtParams,
    ) -> usize {
        let id = self.nodes.len();
        let value = indices.iter().map(|&i| residuals[i]).sum::<f64>() / indices.len() as f64;
        self.nodes.push(Node::Leaf { value });

        if depth >= params.max_depth || indices.len() < 2 * params.min_samples_leaf {
            return id;
        }

        let Some(split) = best_split(rows, residuals, &indices, params.min_samples_leaf) else {
            return id;
        };

        let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| rows[i][split.feature] <= split.threshold);

        let left = self.grow(rows, residuals, left_idx, depth + 1, params);
        let right = self.grow(rows, residuals, right_idx, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Exhaustive search for the split with the largest SSE reduction.
fn best_split(
    rows: &[Vec<f64>],
    residuals: &[f64],
    indices: &[usize],
    min_leaf: usize,
) -> Option<SplitCandidate> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| residuals[i]).sum();
    let parent_score = total * total / n as f64;
    let n_features = rows[indices[0]].len();

    let mut best: Option<SplitCandidate> = None;
    let mut order = indices.to_vec();

    for feature in 0..n_features {
        order.sort_by(|&a, &b| rows[a][feature].total_cmp(&rows[b][feature]));

        let mut left_sum = 0.0;
        for k in 0..n - 1 {
            left_sum += residuals[order[k]];
            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let here = rows[order[k]][feature];
            let next = rows[order[k + 1]][feature];
            if here >= next {
                continue;
            }

            let right_sum = total - left_sum;
            let gain = left_sum * left_sum / left_n as f64
                + right_sum * right_sum / right_n as f64
                - parent_score;

            if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |b| gain > b.gain) {
                let mid = here + (next - here) / 2.0;
                let threshold = if mid < next { mid } else { here };
                best = Some(SplitCandidate {
                    feature,
                    threshold,
                    gain,
                });
            }
        }
    }

    best
}

/// Squared-loss gradient-boosted regression trees.
#[derive(Debug, Clone, PartialEq)]
pub struct GradientBoostedTrees {
    base_score: f64,
    learning_rate: f64,
    n_features: usize,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    /// Fits the ensemble. Starts from the target mean; every tree fits the
    /// current residuals on a seeded row subsample.
    pub fn fit(rows: &[Vec<f64>], targets: &[f64], params: &GbdtParams) -> Result<Self, ModelError> {
        params.validate()?;

        if rows.is_empty() {
            return Err(ModelError::EmptyTrainingSet);
        }
        if rows.len() != targets.len() {
            return Err(ModelError::DimensionMismatch {
                expected: rows.len(),
                got: targets.len(),
            });
        }
        let n_features = rows[0].len();
        if let Some(bad) = rows.iter().find(|row| row.len() != n_features) {
            return Err(ModelError::DimensionMismatch {
                expected: n_features,
                got: bad.len(),
            });
        }
        if rows.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("feature matrix"));
        }
        if targets.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("targets"));
        }

        let n = rows.len();
        let base_score = targets.iter().sum::<f64>() / n as f64;
        let mut predictions = vec![base_score; n];
        let mut residuals = vec![0.0; n];
        let mut rng = StdRng::seed_from_u64(params.seed);
        let sample_size = ((n as f64 * params.subsample).round() as usize).clamp(1, n);

        let mut trees = Vec::with_capacity(params.n_estimators);
        for _ in 0..params.n_estimators {
            for i in 0..n {
                residuals[i] = targets[i] - predictions[i];
            }

            let indices = if sample_size < n {
                sample(&mut rng, n, sample_size).into_vec()
            } else {
                (0..n).collect()
            };

            let tree = RegressionTree::fit(rows, &residuals, indices, params);
            for (pred, row) in predictions.iter_mut().zip(rows) {
                *pred += params.learning_rate * tree.predict(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            base_score,
            learning_rate: params.learning_rate,
            n_features,
            trees,
        })
    }

    pub fn predict(&self, row: &[f64]) -> Result<f64, ModelError> {
        if row.len() != self.n_features {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features,
                got: row.len(),
            });
        }
        if row.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite("prediction input"));
        }

        let value = self.base_score
            + self
                .trees
                .iter()
                .map(|tree| self.learning_rate * tree.predict(row))
                .sum::<f64>();

        if value.is_finite() {
            Ok(value)
        } else {
            Err(ModelError::NonFinite("prediction"))
        }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
