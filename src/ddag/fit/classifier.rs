use std::collections::HashMap;

use log::{debug, trace};
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};
use rand::RngCore;
use rand::seq::SliceRandom;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::inference::factor::assignments;

/// Supervised model mapping parent codes to a distribution over a node's codes.
pub trait Classifier {
    fn fit(&mut self, x: ArrayView2<usize>, y: ArrayView1<usize>, rng: &mut dyn RngCore) -> Result<()>;

    /// One row per input row, one column per entry of [`Classifier::classes`].
    fn predict_proba(&self, x: ArrayView2<usize>) -> Result<Array2<f64>>;

    /// Codes seen during training, ascending.
    fn classes(&self) -> &[usize];
}

/// Sorted distinct labels and, for each row, the index of its label.
pub(crate) fn encode_labels(y: ArrayView1<usize>) -> (Vec<usize>, Vec<usize>) {
    let mut classes: Vec<usize> = y.to_vec();
    classes.sort_unstable();
    classes.dedup();
    let encoded = y
        .iter()
        .map(|label| classes.binary_search(label).unwrap_or(0))
        .collect();
    (classes, encoded)
}

/// Tabulate a fitted classifier over every parent assignment into a CPT. Columns
/// for codes never seen in training are zero.
pub fn extract_conditional(model: &dyn Classifier, parent_dims: &[usize], dim: usize) -> Result<ArrayD<f64>> {
    let rows = assignments(parent_dims);
    let mut x = Array2::<usize>::zeros((rows.len(), parent_dims.len()));
    for (i, row) in rows.iter().enumerate() {
        for (j, &code) in row.iter().enumerate() {
            x[[i, j]] = code;
        }
    }
    let probabilities = model.predict_proba(x.view())?;
    let mut flat = Array2::<f64>::zeros((rows.len(), dim));
    for (k, &class) in model.classes().iter().enumerate() {
        if class >= dim {
            return Err(DagError::InvalidData(format!(
                "class {} outside an alphabet of {} values",
                class, dim
            )));
        }
        flat.column_mut(class).assign(&probabilities.column(k));
    }
    let mut shape = parent_dims.to_vec();
    shape.push(dim);
    Ok(flat.into_shape_with_order(IxDyn(&shape))?)
}

/// Multinomial log-linear model over one-hot parent features, trained by SGD.
#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    learning_rate: f64,
    epochs: usize,
    l2: f64,
    classes: Vec<usize>,
    weights: Vec<HashMap<String, f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticConfig {
    pub learning_rate: f64,
    pub epochs: usize,
    pub l2: f64,
}

impl Default for LogisticConfig {
    fn default() -> Self {
        LogisticConfig {
            learning_rate: 0.05,
            epochs: 200,
            l2: 0.0,
        }
    }
}

fn features(row: ArrayView1<usize>) -> HashMap<String, f64> {
    let mut result = HashMap::with_capacity(row.len() + 1);
    result.insert("bias".to_string(), 1.0);
    for (j, code) in row.iter().enumerate() {
        result.insert(format!("p{}={}", j, code), 1.0);
    }
    result
}

fn dot_product(weights: &HashMap<String, f64>, features: &HashMap<String, f64>) -> f64 {
    features
        .iter()
        .filter_map(|(key, value)| weights.get(key).map(|w| w * value))
        .sum()
}

impl LogisticClassifier {
    pub fn new(config: LogisticConfig) -> Self {
        LogisticClassifier {
            learning_rate: config.learning_rate,
            epochs: config.epochs,
            l2: config.l2,
            classes: Vec::new(),
            weights: Vec::new(),
        }
    }

    fn softmax(&self, features: &HashMap<String, f64>) -> Vec<f64> {
        let scores: Vec<f64> = self.weights.iter().map(|w| dot_product(w, features)).collect();
        let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let potentials: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
        let total: f64 = potentials.iter().sum();
        potentials.into_iter().map(|p| p / total).collect()
    }
}

impl Classifier for LogisticClassifier {
    fn fit(&mut self, x: ArrayView2<usize>, y: ArrayView1<usize>, rng: &mut dyn RngCore) -> Result<()> {
        if x.nrows() != y.len() || x.nrows() == 0 {
            return Err(DagError::InvalidData(format!(
                "{} feature rows for {} labels",
                x.nrows(),
                y.len()
            )));
        }
        let (classes, encoded) = encode_labels(y);
        let rows: Vec<HashMap<String, f64>> = x.axis_iter(Axis(0)).map(features).collect();
        self.weights = vec![HashMap::new(); classes.len()];
        for weights in &mut self.weights {
            for row in &rows {
                for key in row.keys() {
                    weights.entry(key.clone()).or_insert(0.0);
                }
            }
        }
        self.classes = classes;

        let mut order: Vec<usize> = (0..rows.len()).collect();
        for epoch in 0..self.epochs {
            order.shuffle(rng);
            let mut loss = 0.0;
            for &i in &order {
                let probabilities = self.softmax(&rows[i]);
                loss -= probabilities[encoded[i]].max(f64::MIN_POSITIVE).ln();
                for (k, weights) in self.weights.iter_mut().enumerate() {
                    let target = if encoded[i] == k { 1.0 } else { 0.0 };
                    let gradient = target - probabilities[k];
                    for (feature, value) in &rows[i] {
                        if let Some(w) = weights.get_mut(feature) {
                            *w += self.learning_rate * (gradient * value - self.l2 * *w);
                        }
                    }
                }
            }
            trace!("logistic epoch {} loss {}", epoch, loss / rows.len() as f64);
        }
        debug!("fitted logistic classifier with {} classes", self.classes.len());
        Ok(())
    }

    fn predict_proba(&self, x: ArrayView2<usize>) -> Result<Array2<f64>> {
        let mut result = Array2::zeros((x.nrows(), self.classes.len()));
        for (i, row) in x.axis_iter(Axis(0)).enumerate() {
            for (k, p) in self.softmax(&features(row)).into_iter().enumerate() {
                result[[i, k]] = p;
            }
        }
        Ok(result)
    }

    fn classes(&self) -> &[usize] {
        &self.classes
    }
}
