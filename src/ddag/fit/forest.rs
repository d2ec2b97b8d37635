//! Bagged classification trees over categorical features.
//!
//! Splits test a single feature for equality with one code, so every tree is a
//! sequence of "is parent j equal to v" questions.

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::seq::index::sample;
use rand::{Rng, RngCore};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::fit::classifier::{Classifier, encode_labels};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForestConfig {
    pub n_trees: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Features considered per split; all of them when `None`.
    pub max_features: Option<usize>,
}

impl Default for ForestConfig {
    fn default() -> Self {
        ForestConfig {
            n_trees: 50,
            max_depth: 8,
            min_samples_split: 2,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone)]
enum TreeNode {
    Leaf(Array1<f64>),
    Split {
        feature: usize,
        value: usize,
        equal: Box<TreeNode>,
        other: Box<TreeNode>,
    },
}

impl TreeNode {
    fn predict(&self, row: ArrayView1<usize>) -> &Array1<f64> {
        match self {
            TreeNode::Leaf(distribution) => distribution,
            TreeNode::Split {
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

fn class_distribution(labels: &[usize], rows: &[usize], n_classes: usize) -> Array1<f64> {
    let mut counts = Array1::<f64>::zeros(n_classes);
    for &row in rows {
        counts[labels[row]] += 1.0;
    }
    let total = counts.sum();
    if total > 0.0 { counts / total } else { counts }
}

fn gini(distribution: &Array1<f64>) -> f64 {
    1.0 - distribution.iter().map(|p| p * p).sum::<f64>()
}

struct TreeBuilder<'a, 'l> {
    x: ArrayView2<'a, usize>,
    labels: &'l [usize],
    n_classes: usize,
    config: ForestConfig,
}

impl TreeBuilder<'_, '_> {
    fn build(&self, rows: &[usize], depth: usize, rng: &mut dyn RngCore) -> TreeNode {
        let distribution = class_distribution(self.labels, rows, self.n_classes);
        let impurity = gini(&distribution);
        if depth >= self.config.max_depth || rows.len() < self.config.min_samples_split || impurity == 0.0 {
            return TreeNode::Leaf(distribution);
        }

        let n_features = self.x.ncols();
        let considered = self.config.max_features.unwrap_or(n_features).clamp(1, n_features.max(1));
        let features: Vec<usize> = if n_features == 0 {
            Vec::new()
        } else {
            sample(rng, n_features, considered.min(n_features)).into_vec()
        };

        let mut best: Option<(f64, usize, usize)> = None;
        for feature in features {
            let mut values: Vec<usize> = rows.iter().map(|&r| self.x[[r, feature]]).collect();
            values.sort_unstable();
            values.dedup();
            for value in values {
                let (equal, other): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&r| self.x[[r, feature]] == value);
                if equal.is_empty() || other.is_empty() {
                    continue;
                }
                let weighted = (equal.len() as f64
                    * gini(&class_distribution(self.labels, &equal, self.n_classes))
                    + other.len() as f64 * gini(&class_distribution(self.labels, &other, self.n_classes)))
                    / rows.len() as f64;
                let gain = impurity - weighted;
                if gain > 1e-12 && best.is_none_or(|(g, _, _)| gain > g) {
                    best = Some((gain, feature, value));
                }
            }
        }

        match best {
            None => TreeNode::Leaf(distribution),
            Some((_, feature, value)) => {
                let (equal, other): (Vec<usize>, Vec<usize>) =
                    rows.iter().partition(|&&r| self.x[[r, feature]] == value);
                TreeNode::Split {
                    feature,
                    value,
                    equal: Box::new(self.build(&equal, depth + 1, rng)),
                    other: Box::new(self.build(&other, depth + 1, rng)),
                }
            }
        }
    }
}

/// Random forest: bootstrap-resampled trees whose leaf distributions are averaged.
#[derive(Debug, Clone)]
pub struct RandomForestClassifier {
    config: ForestConfig,
    classes: Vec<usize>,
    trees: Vec<TreeNode>,
}

impl RandomForestClassifier {
    pub fn new(config: ForestConfig) -> Self {
        RandomForestClassifier {
            config,
            classes: Vec::new(),
            trees: Vec::new(),
        }
    }
}

impl Classifier for RandomForestClassifier {
    fn fit(&mut self, x: ArrayView2<usize>, y: ArrayView1<usize>, rng: &mut dyn RngCore) -> Result<()> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(DagError::InvalidData(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let (classes, labels) = encode_labels(y);
        let builder = TreeBuilder {
            x,
            labels: &labels,
            n_classes: classes.len(),
            config: self.config,
        };
        let n = x.nrows();
        self.trees = (0..self.config.n_trees.max(1))
            .map(|_| {
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                builder.build(&rows, 0, rng)
            })
            .collect();
        self.classes = classes;
        debug!(
            "fitted random forest with {} trees over {} classes",
            self.trees.len(),
            self.classes.len()
        );
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<usize>) -> Result<Array2<f64>> {
        let mut result = Array2::zeros((x.nrows(), self.classes.len()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            let mut total = result.row_mut(i);
            for tree in &self.trees {
                total += tree.predict(row);
            }
            total /= self.trees.len().max(1) as f64;
        }
        Ok(result)
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
    fn test_forest_follows_informative_feature() {
        let x = arr2(&[[0, 0], [0, 1], [1, 0], [1, 1], [0, 2], [1, 2]]);
        let x = ndarray::concatenate(Axis(0), &[x.view(), x.view(), x.view()]).unwrap();
        let y: Array1<usize> = x.axis_iter(Axis(0)).map(|r| r[0]).collect();
        let mut rng = StdRng::seed_from_u64(21);
        let mut forest = RandomForestClassifier::new(ForestConfig::default());
        forest.fit(x.view(), y.view(), &mut rng).unwrap();
        let probabilities = forest.predict_proba(arr2(&[[0, 1], [1, 2]]).view()).unwrap();
        assert!(probabilities[[0, 0]] > 0.9);
        assert!(probabilities[[1, 1]] > 0.9);
    }

    #[test]
    fn test_predictions_are_distributions() {
        let x = arr2(&[[0], [1], [2], [0], [1]]);
        let y = arr1(&[0, 1, 1, 0, 0]);
        let mut rng = StdRng::seed_from_u64(9);
        let mut forest = RandomForestClassifier::new(ForestConfig {
            n_trees: 5,
            ..ForestConfig::default()
        });
        forest.fit(x.view(), y.view(), &mut rng).unwrap();
        let probabilities = forest.predict_proba(arr2(&[[0], [1], [2]]).view()).unwrap();
        for row in probabilities.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
        }
    }
}
