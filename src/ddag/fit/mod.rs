//! Estimating conditionals from data for a fixed graph.

pub mod boosting;
pub mod classifier;
pub mod counts;
pub mod forest;

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use log::{debug, info};
use ndarray::{ArrayD, ArrayView2, Axis};
use rand::{Rng, RngCore};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::DiscreteDag;
use crate::graph::dag::{Dag, Node};

pub use boosting::{BoostingConfig, GradientBoostingClassifier};
pub use classifier::{Classifier, LogisticClassifier, LogisticConfig, extract_conditional};
pub use counts::{conditional_frequencies, indicator_conditional, marginal_frequencies};
pub use forest::{ForestConfig, RandomForestClassifier};

/// Supervised back-end used for nodes with parents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClassifierKind {
    Logistic(LogisticConfig),
    RandomForest(ForestConfig),
    GradientBoosting(BoostingConfig),
}

impl ClassifierKind {
    pub fn build(&self) -> Box<dyn Classifier> {
        match self {
            ClassifierKind::Logistic(config) => Box::new(LogisticClassifier::new(*config)),
            ClassifierKind::RandomForest(config) => Box::new(RandomForestClassifier::new(*config)),
            ClassifierKind::GradientBoosting(config) => {
                Box::new(GradientBoostingClassifier::new(*config))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum FitMethod {
    /// Relative frequencies.
    #[default]
    Mle,
    /// Relative frequencies with `alpha` added to every count.
    AddOneMle { alpha: f64 },
    /// Classifier probabilities for nodes with parents, unsmoothed frequencies for roots.
    Supervised(ClassifierKind),
}

impl FromStr for FitMethod {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mle" => Ok(FitMethod::Mle),
            "add_one_mle" => Ok(FitMethod::AddOneMle { alpha: 1.0 }),
            "logistic" => Ok(FitMethod::Supervised(ClassifierKind::Logistic(
                LogisticConfig::default(),
            ))),
            "random_forest" => Ok(FitMethod::Supervised(ClassifierKind::RandomForest(
                ForestConfig::default(),
            ))),
            "xgboost" => Ok(FitMethod::Supervised(ClassifierKind::GradientBoosting(
                BoostingConfig::default(),
            ))),
            other => Err(DagError::UnsupportedMethod(other.to_string())),
        }
    }
}

impl DiscreteDag {
    /// Estimate every conditional of `dag` from `data`.
    ///
    /// `data` holds one row per observation and one column per node in ascending node
    /// order; entries are codes into the node alphabets. Without explicit alphabets a
    /// node's alphabet is `0..=max code observed`.
    pub fn fit<R: Rng + ?Sized>(
        dag: &Dag,
        data: ArrayView2<usize>,
        method: &FitMethod,
        node_alphabets: Option<BTreeMap<Node, Vec<i64>>>,
        rng: &mut R,
    ) -> Result<DiscreteDag> {
        if data.nrows() == 0 {
            return Err(DagError::InvalidData("cannot fit to an empty dataset".to_string()));
        }
        if data.ncols() != dag.nnodes() {
            return Err(DagError::InvalidData(format!(
                "data has {} columns for {} nodes",
                data.ncols(),
                dag.nnodes()
            )));
        }
        let columns: BTreeMap<Node, usize> =
            dag.nodes().iter().enumerate().map(|(ix, &n)| (n, ix)).collect();

        let node_alphabets = match node_alphabets {
            Some(alphabets) => alphabets,
            None => columns
                .iter()
                .map(|(&node, &column)| {
                    let max = data.column(column).iter().copied().max().unwrap_or(0);
                    (node, (0..=max as i64).collect())
                })
                .collect(),
        };
        let dims: BTreeMap<Node, usize> = dag
            .nodes()
            .iter()
            .map(|&n| {
                node_alphabets
                    .get(&n)
                    .map(|alphabet| (n, alphabet.len()))
                    .ok_or(DagError::UnknownNode(n))
            })
            .collect::<Result<_>>()?;
        for (&node, &column) in &columns {
            if data.column(column).iter().any(|&code| code >= dims[&node]) {
                return Err(DagError::InvalidData(format!(
                    "column {} has codes outside the {} values of node {}",
                    column, dims[&node], node
                )));
            }
        }

        info!("fitting {} nodes to {} rows with {:?}", dag.nnodes(), data.nrows(), method);
        let mut rng_ref = rng;
        let mut node2parents = BTreeMap::new();
        let mut conditionals = BTreeMap::new();
        for node in dag.topological_sort()? {
            let parents: Vec<Node> = dag.parents_of(node)?.iter().copied().collect();
            let column = columns[&node];
            let dim = dims[&node];
            let parent_columns: Vec<usize> = parents.iter().map(|p| columns[p]).collect();
            let parent_dims: Vec<usize> = parents.iter().map(|p| dims[p]).collect();

            let conditional = fit_node(
                data,
                column,
                &parent_columns,
                &parent_dims,
                dim,
                method,
                &mut rng_ref,
            )?;
            debug!("fitted node {} with parents {:?}", node, parents);
            node2parents.insert(node, parents);
            conditionals.insert(node, Arc::new(conditional));
        }

        let nodes: BTreeSet<Node> = dag.nodes().clone();
        DiscreteDag::from_parts(nodes, node2parents, node_alphabets, conditionals)
    }
}

fn fit_node(
    data: ArrayView2<usize>,
    column: usize,
    parent_columns: &[usize],
    parent_dims: &[usize],
    dim: usize,
    method: &FitMethod,
    rng: &mut dyn RngCore,
) -> Result<ArrayD<f64>> {
    let alpha = match method {
        FitMethod::AddOneMle { alpha } => Some(*alpha),
        _ => None,
    };
    if parent_columns.is_empty() {
        return Ok(marginal_frequencies(data.column(column), dim, alpha).into_dyn());
    }
    match method {
        FitMethod::Mle | FitMethod::AddOneMle { .. } => Ok(conditional_frequencies(
            data,
            column,
            parent_columns,
            parent_dims,
            dim,
            alpha,
        )),
        FitMethod::Supervised(kind) => {
            let y = data.column(column);
            let first = y[0];
            if y.iter().all(|&code| code == first) {
                return Ok(indicator_conditional(parent_dims, dim, first));
            }
            let x = data.select(Axis(1), parent_columns);
            let mut model = kind.build();
            model.fit(x.view(), y, rng)?;
            extract_conditional(model.as_ref(), parent_dims, dim)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_tags() {
        assert_eq!("mle".parse::<FitMethod>().unwrap(), FitMethod::Mle);
        assert_eq!(
            "add_one_mle".parse::<FitMethod>().unwrap(),
            FitMethod::AddOneMle { alpha: 1.0 }
        );
        assert!(matches!(
            "xgboost".parse::<FitMethod>().unwrap(),
            FitMethod::Supervised(ClassifierKind::GradientBoosting(_))
        ));
        assert!(matches!(
            "ridge".parse::<FitMethod>(),
            Err(DagError::UnsupportedMethod(_))
        ));
    }
}
