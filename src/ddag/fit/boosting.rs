use log::{debug, trace};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::RngCore;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::fit::classifier::{Classifier, encode_labels};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoostingConfig {
    pub n_rounds: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    /// L2 penalty on leaf weights.
    pub lambda: f64,
    /// Minimum hessian mass in a child for a split to be kept.
    pub min_child_weight: f64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        BoostingConfig {
            n_rounds: 50,
            learning_rate: 0.3,
            max_depth: 3,
            lambda: 1.0,
            min_child_weight: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
enum RegressionNode {
    Leaf(f64),
    Split {
        feature: usize,
        value: usize,
        equal: Box<RegressionNode>,
        other: Box<RegressionNode>,
    },
}

impl RegressionNode {
    fn predict(&self, row: ArrayView1<usize>) -> f64 {
        match self {
            RegressionNode::Leaf(weight) => *weight,
            RegressionNode::Split {
                feature,
                value,
                equal,
                other,
            } => {
                if row[*feature] == *value {
                    equal.predict(row)
                } else {
                    other.predict(row)
                }
            }
        }
    }
}

fn score(gradient: f64, hessian: f64, lambda: f64) -> f64 {
    gradient * gradient / (hessian + lambda)
}

fn grow(
    x: ArrayView2<usize>,
    gradients: &[f64],
    hessians: &[f64],
    rows: &[usize],
    depth: usize,
    config: &BoostingConfig,
) -> RegressionNode {
    let g: f64 = rows.iter().map(|&r| gradients[r]).sum();
    let h: f64 = rows.iter().map(|&r| hessians[r]).sum();
    let leaf = RegressionNode::Leaf(-g / (h + config.lambda));
    if depth >= config.max_depth || rows.len() < 2 {
        return leaf;
    }

    let parent_score = score(g, h, config.lambda);
    let mut best: Option<(f64, usize, usize)> = None;
    for feature in 0..x.ncols() {
        let mut values: Vec<usize> = rows.iter().map(|&r| x[[r, feature]]).collect();
        values.sort_unstable();
        values.dedup();
        for value in values {
            let (mut g_equal, mut h_equal) = (0.0, 0.0);
            for &r in rows.iter().filter(|&&r| x[[r, feature]] == value) {
                g_equal += gradients[r];
                h_equal += hessians[r];
            }
            let (g_other, h_other) = (g - g_equal, h - h_equal);
            if h_equal < config.min_child_weight || h_other < config.min_child_weight {
                continue;
            }
            let gain = score(g_equal, h_equal, config.lambda) + score(g_other, h_other, config.lambda)
                - parent_score;
            if gain > 1e-12 && best.is_none_or(|(b, _, _)| gain > b) {
                best = Some((gain, feature, value));
            }
        }
    }

    match best {
        None => leaf,
        Some((_, feature, value)) => {
            let (equal, other): (Vec<usize>, Vec<usize>) =
                rows.iter().partition(|&&r| x[[r, feature]] == value);
            RegressionNode::Split {
                feature,
                value,
                equal: Box::new(grow(x, gradients, hessians, &equal, depth + 1, config)),
                other: Box::new(grow(x, gradients, hessians, &other, depth + 1, config)),
            }
        }
    }
}

fn softmax_rows(scores: &Array2<f64>) -> Array2<f64> {
    let mut probabilities = scores.clone();
    for mut row in probabilities.rows_mut() {
        let max = row.fold(f64::NEG_INFINITY, |acc, &s| acc.max(s));
        row.mapv_inplace(|s| (s - max).exp());
        let total = row.sum();
        row /= total;
    }
    probabilities
}

/// Gradient-boosted regression trees on the softmax loss, one tree per class per
/// round, with second-order leaf weights `-G / (H + lambda)`.
#[derive(Debug, Clone)]
pub struct GradientBoostingClassifier {
    config: BoostingConfig,
    classes: Vec<usize>,
    rounds: Vec<Vec<RegressionNode>>,
}

impl GradientBoostingClassifier {
    pub fn new(config: BoostingConfig) -> Self {
        GradientBoostingClassifier {
            config,
            classes: Vec::new(),
            rounds: Vec::new(),
        }
    }

    fn raw_scores(&self, x: ArrayView2<usize>) -> Array2<f64> {
        let mut scores = Array2::zeros((x.nrows(), self.classes.len()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            for trees in &self.rounds {
                for (k, tree) in trees.iter().enumerate() {
                    scores[[i, k]] += self.config.learning_rate * tree.predict(row);
                }
            }
        }
        scores
    }
}

impl Classifier for GradientBoostingClassifier {
    fn fit(&mut self, x: ArrayView2<usize>, y: ArrayView1<usize>, _rng: &mut dyn RngCore) -> Result<()> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(DagError::InvalidData(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let (classes, labels) = encode_labels(y);
        self.classes = classes;
        self.rounds.clear();
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut scores = Array2::<f64>::zeros((x.nrows(), self.classes.len()));

        for round in 0..self.config.n_rounds {
            let probabilities = softmax_rows(&scores);
            let mut trees = Vec::with_capacity(self.classes.len());
            for k in 0..self.classes.len() {
                let column = probabilities.column(k);
                let gradients: Vec<f64> = column
                    .iter()
                    .zip(&labels)
                    .map(|(&p, &label)| p - if label == k { 1.0 } else { 0.0 })
                    .collect();
                let hessians: Vec<f64> = column.iter().map(|&p| (p * (1.0 - p)).max(1e-16)).collect();
                trees.push(grow(x, &gradients, &hessians, &rows, 0, &self.config));
            }
            for (i, row) in x.axis_iter(Axis(0)).enumerate() {
                for (k, tree) in trees.iter().enumerate() {
                    scores[[i, k]] += self.config.learning_rate * tree.predict(row);
                }
            }
            self.rounds.push(trees);
            trace!("boosting round {} done", round);
        }
        debug!(
            "fitted gradient boosting with {} rounds over {} classes",
            self.rounds.len(),
            self.classes.len()
        );
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<usize>) -> Result<Array2<f64>> {
        Ok(softmax_rows(&self.raw_scores(x)))
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_boosting_recovers_conditional_frequencies() {
        // parent 0: label 0 three times out of four; parent 1: label 1 always
        let x = arr2(&[[0], [0], [0], [0], [1], [1], [1], [1]]);
        let y = arr1(&[0, 0, 0, 1, 1, 1, 1, 1]);
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = GradientBoostingClassifier::new(BoostingConfig {
            n_rounds: 200,
            lambda: 0.0,
            min_child_weight: 0.0,
            ..BoostingConfig::default()
        });
        model.fit(x.view(), y.view(), &mut rng).unwrap();
        let probabilities = model.predict_proba(arr2(&[[0], [1]]).view()).unwrap();
        assert!((probabilities[[0, 0]] - 0.75).abs() < 0.05);
        assert!(probabilities[[1, 1]] > 0.95);
    }

    #[test]
    fn test_single_class_gives_certainty() {
        let x = arr2(&[[0], [1]]);
        let y = arr1(&[2, 2]);
        let mut rng = StdRng::seed_from_u64(0);
        let mut model = GradientBoostingClassifier::new(BoostingConfig::default());
        model.fit(x.view(), y.view(), &mut rng).unwrap();
        assert_eq!(model.classes(), &[2]);
        let probabilities = model.predict_proba(x.view()).unwrap();
        assert!((probabilities[[0, 0]] - 1.0).abs() < 1e-12);
    }
}
