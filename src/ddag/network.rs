use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use log::debug;
use ndarray::{Array2, ArrayD, ArrayView2, ArrayViewD, Axis};

use crate::ddag::common::error::{DagError, Result};
use crate::graph::dag::{Dag, Node};

/// Discrete Bayesian network: a DAG with an alphabet and a CPT per node.
///
/// CPTs are stored behind `Arc` and never mutated in place, so cloning a network or
/// deriving a new one from it shares every table that did not change.
/// `set_conditional` swaps the shared pointer rather than writing through it.
#[derive(Debug, Clone)]
pub struct DiscreteDag {
    pub(crate) dag: Dag,
    pub(crate) node2parents: BTreeMap<Node, Vec<Node>>,
    pub(crate) node_alphabets: BTreeMap<Node, Vec<i64>>,
    pub(crate) conditionals: BTreeMap<Node, Arc<ArrayD<f64>>>,
    node2ix: HashMap<Node, usize>,
}

fn expected_shape(
    node: Node,
    parents: &[Node],
    alphabets: &BTreeMap<Node, Vec<i64>>,
) -> Result<Vec<usize>> {
    parents
        .iter()
        .chain(std::iter::once(&node))
        .map(|n| {
            alphabets
                .get(n)
                .map(|alphabet| alphabet.len())
                .ok_or(DagError::UnknownNode(*n))
        })
        .collect()
}

impl DiscreteDag {
    /// Build a network, checking that `arcs` is exactly the arc set implied by
    /// `node2parents` and that every CPT has shape `dims(parents) + (dim(node),)`.
    pub fn new(
        nodes: impl IntoIterator<Item = Node>,
        arcs: impl IntoIterator<Item = (Node, Node)>,
        conditionals: BTreeMap<Node, ArrayD<f64>>,
        node2parents: BTreeMap<Node, Vec<Node>>,
        node_alphabets: BTreeMap<Node, Vec<i64>>,
    ) -> Result<Self> {
        let nodes: BTreeSet<Node> = nodes.into_iter().collect();
        let arcs: BTreeSet<(Node, Node)> = arcs.into_iter().collect();
        let derived: BTreeSet<(Node, Node)> = node2parents
            .iter()
            .flat_map(|(&node, parents)| parents.iter().map(move |&p| (p, node)))
            .collect();
        if arcs != derived {
            let extra: Vec<_> = arcs.difference(&derived).collect();
            let missing: Vec<_> = derived.difference(&arcs).collect();
            return Err(DagError::ArcMismatch(format!(
                "arcs without a parent entry {:?}, parent entries without an arc {:?}",
                extra, missing
            )));
        }
        let conditionals = conditionals
            .into_iter()
            .map(|(node, table)| (node, Arc::new(table)))
            .collect();
        Self::from_parts(nodes, node2parents, node_alphabets, conditionals)
    }

    /// Build a network whose arc set is derived from the parent lists.
    pub fn from_parents(
        node2parents: BTreeMap<Node, Vec<Node>>,
        conditionals: BTreeMap<Node, ArrayD<f64>>,
        node_alphabets: BTreeMap<Node, Vec<i64>>,
    ) -> Result<Self> {
        let nodes: BTreeSet<Node> = node2parents.keys().copied().collect();
        let conditionals = conditionals
            .into_iter()
            .map(|(node, table)| (node, Arc::new(table)))
            .collect();
        Self::from_parts(nodes, node2parents, node_alphabets, conditionals)
    }

    pub(crate) fn from_parts(
        nodes: BTreeSet<Node>,
        node2parents: BTreeMap<Node, Vec<Node>>,
        node_alphabets: BTreeMap<Node, Vec<i64>>,
        conditionals: BTreeMap<Node, Arc<ArrayD<f64>>>,
    ) -> Result<Self> {
        for node in &nodes {
            if !node2parents.contains_key(node) {
                return Err(DagError::ArcMismatch(format!("node {} has no parent list", node)));
            }
        }
        if let Some(node) = node2parents.keys().find(|n| !nodes.contains(n)) {
            return Err(DagError::UnknownNode(*node));
        }
        let arcs: Vec<(Node, Node)> = node2parents
            .iter()
            .flat_map(|(&node, parents)| parents.iter().map(move |&p| (p, node)))
            .collect();
        let dag = Dag::new(nodes.iter().copied(), arcs)?;

        for (&node, parents) in &node2parents {
            let unique: BTreeSet<&Node> = parents.iter().collect();
            if unique.len() != parents.len() {
                return Err(DagError::DuplicateNode(node));
            }
            let expected = expected_shape(node, parents, &node_alphabets)?;
            let table = conditionals.get(&node).ok_or_else(|| DagError::ShapeMismatch {
                node,
                expected: expected.clone(),
                got: vec![],
            })?;
            if table.shape() != expected.as_slice() {
                return Err(DagError::ShapeMismatch {
                    node,
                    expected,
                    got: table.shape().to_vec(),
                });
            }
        }

        let node2ix = nodes.iter().enumerate().map(|(ix, &node)| (node, ix)).collect();
        debug!("built network with {} nodes and {} arcs", nodes.len(), dag.arcs().len());
        Ok(DiscreteDag {
            dag,
            node2parents,
            node_alphabets,
            conditionals,
            node2ix,
        })
    }

    /// Independent copy. Tables are shared until one side replaces them.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        self.dag.nodes()
    }

    pub fn nnodes(&self) -> usize {
        self.dag.nnodes()
    }

    pub fn arcs(&self) -> &BTreeSet<(Node, Node)> {
        self.dag.arcs()
    }

    pub fn parents(&self, node: Node) -> Result<&[Node]> {
        self.node2parents
            .get(&node)
            .map(Vec::as_slice)
            .ok_or(DagError::UnknownNode(node))
    }

    pub fn node2parents(&self) -> &BTreeMap<Node, Vec<Node>> {
        &self.node2parents
    }

    pub fn children_of(&self, node: Node) -> Result<&BTreeSet<Node>> {
        self.dag.children_of(node)
    }

    pub fn topological_sort(&self) -> Result<Vec<Node>> {
        self.dag.topological_sort()
    }

    pub fn alphabet(&self, node: Node) -> Result<&[i64]> {
        self.node_alphabets
            .get(&node)
            .map(Vec::as_slice)
            .ok_or(DagError::UnknownNode(node))
    }

    pub fn node_alphabets(&self) -> &BTreeMap<Node, Vec<i64>> {
        &self.node_alphabets
    }

    /// Alphabet size of a node.
    pub fn dim(&self, node: Node) -> Result<usize> {
        self.alphabet(node).map(|alphabet| alphabet.len())
    }

    /// Alphabet size lookup for nodes already known to be in the network.
    pub(crate) fn dim_of(&self, node: Node) -> usize {
        self.node_alphabets.get(&node).map_or(0, Vec::len)
    }

    pub fn conditional(&self, node: Node) -> Result<&ArrayD<f64>> {
        self.conditionals
            .get(&node)
            .map(|table| table.as_ref())
            .ok_or(DagError::UnknownNode(node))
    }

    /// Replace the CPT of `node` in place. The shape invariant is still enforced.
    pub fn set_conditional(&mut self, node: Node, cpt: ArrayD<f64>) -> Result<()> {
        let expected = expected_shape(node, self.parents(node)?, &self.node_alphabets)?;
        if cpt.shape() != expected.as_slice() {
            return Err(DagError::ShapeMismatch {
                node,
                expected,
                got: cpt.shape().to_vec(),
            });
        }
        self.conditionals.insert(node, Arc::new(cpt));
        Ok(())
    }

    /// Column of `node` in sample and data matrices.
    pub fn column_of(&self, node: Node) -> Result<usize> {
        self.node2ix.get(&node).copied().ok_or(DagError::UnknownNode(node))
    }

    /// Integer code of `value` in the alphabet of `node`.
    pub fn code_of(&self, node: Node, value: i64) -> Result<usize> {
        self.alphabet(node)?
            .iter()
            .position(|&v| v == value)
            .ok_or(DagError::UnknownValue { node, value })
    }

    /// Reject unknown or repeated nodes in a query list.
    pub(crate) fn check_query(&self, nodes: &[Node]) -> Result<()> {
        for (i, node) in nodes.iter().enumerate() {
            if !self.dag.contains(*node) {
                return Err(DagError::UnknownNode(*node));
            }
            if nodes[..i].contains(node) {
                return Err(DagError::DuplicateNode(*node));
            }
        }
        Ok(())
    }

    /// Distributions of `node` for each row of parent codes (one column per parent,
    /// in declared parent order).
    pub fn predict_from_parents(
        &self,
        node: Node,
        parent_values: ArrayView2<usize>,
    ) -> Result<Array2<f64>> {
        let parents = self.parents(node)?;
        if parent_values.ncols() != parents.len() {
            return Err(DagError::InvalidData(format!(
                "node {} has {} parents but {} parent columns were given",
                node,
                parents.len(),
                parent_values.ncols()
            )));
        }
        let conditional = self.conditional(node)?;
        let mut result = Array2::zeros((parent_values.nrows(), self.dim_of(node)));
        for (row, codes) in parent_values.axis_iter(Axis(0)).enumerate() {
            let codes: Vec<usize> = codes.to_vec();
            let distribution = conditional_row(conditional, &codes)?;
            result.row_mut(row).assign(&distribution);
        }
        Ok(result)
    }

    /// Mean and variance of a node's alphabet values under its marginal.
    pub fn get_mean_and_variance(&self, node: Node) -> Result<(f64, f64)> {
        let alphabet = self.alphabet(node)?;
        let marginal = self.get_marginal(node)?;
        let mean: f64 = alphabet
            .iter()
            .zip(marginal.iter())
            .map(|(&value, &p)| value as f64 * p)
            .sum();
        let variance: f64 = alphabet
            .iter()
            .zip(marginal.iter())
            .map(|(&value, &p)| (value as f64 - mean).powi(2) * p)
            .sum();
        Ok((mean, variance))
    }

    /// Log-likelihood of samples. Not provided; use the marginal queries instead.
    pub fn log_probability(&self, _samples: ArrayView2<usize>) -> Result<ndarray::Array1<f64>> {
        Err(DagError::NotImplemented("log_probability".to_string()))
    }
}

/// Distribution over a node's alphabet for one assignment of its parents.
pub(crate) fn conditional_row<'a>(
    conditional: &'a ArrayD<f64>,
    parent_codes: &[usize],
) -> Result<ArrayViewD<'a, f64>> {
    if parent_codes.len() + 1 != conditional.ndim() {
        return Err(DagError::LabelMismatch(format!(
            "{} parent codes for a table of rank {}",
            parent_codes.len(),
            conditional.ndim()
        )));
    }
    let mut view = conditional.view();
    for &code in parent_codes {
        if code >= view.shape()[0] {
            return Err(DagError::InvalidData(format!(
                "parent code {} out of range {}",
                code,
                view.shape()[0]
            )));
        }
        view = view.index_axis_move(Axis(0), code);
    }
    Ok(view)
}
