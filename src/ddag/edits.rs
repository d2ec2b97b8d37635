//! Structural edits that derive a new network from an existing one.
//!
//! Derived networks share every conditional that the edit leaves untouched.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use log::{debug, info};
use ndarray::{Array1, ArrayD};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::DiscreteDag;
use crate::ddag::table::{contract, normalize_last_axis};
use crate::graph::dag::Node;

/// Old node id to new node id, for the nodes that survive an edit.
pub type Relabeling = BTreeMap<Node, Node>;

impl DiscreteDag {
    /// Network where `node` is forced to `value` and cut off from its parents.
    pub fn get_hard_interventional_dag(&self, node: Node, value: i64) -> Result<DiscreteDag> {
        let code = self.code_of(node, value)?;
        let dim = self.dim(node)?;
        let mut node2parents = self.node2parents.clone();
        node2parents.insert(node, Vec::new());
        let mut conditionals = self.conditionals.clone();
        let point_mass: ArrayD<f64> =
            Array1::from_shape_fn(dim, |v| if v == code { 1.0 } else { 0.0 }).into_dyn();
        conditionals.insert(node, Arc::new(point_mass));
        info!("intervened on node {} with value {}", node, value);
        DiscreteDag::from_parts(
            self.nodes().clone(),
            node2parents,
            self.node_alphabets.clone(),
            conditionals,
        )
    }

    /// Remove `node` by summing it out of each child's conditional.
    ///
    /// A child keeps its other parents in order and gains the removed node's parents
    /// it did not already have. With `relabel`, nodes above `node` shift down by one.
    pub fn marginal_dag_node(&self, node: Node, relabel: bool) -> Result<(DiscreteDag, Relabeling)> {
        let node_parents = self.parents(node)?.to_vec();
        let node_conditional = self.conditional(node)?;
        let mut node_labels = node_parents.clone();
        node_labels.push(node);

        let mut node2parents = self.node2parents.clone();
        let mut conditionals = self.conditionals.clone();
        for &child in self.children_of(node)? {
            let old_parents = self.parents(child)?;
            let mut new_parents: Vec<Node> =
                old_parents.iter().copied().filter(|&p| p != node).collect();
            for &p in &node_parents {
                if !new_parents.contains(&p) {
                    new_parents.push(p);
                }
            }
            let mut old_labels = old_parents.to_vec();
            old_labels.push(child);
            let mut new_labels = new_parents.clone();
            new_labels.push(child);

            let summed = contract(
                self.conditional(child)?,
                &old_labels,
                node_conditional,
                &node_labels,
                &new_labels,
                |n| self.dim_of(n),
            )?;
            debug!("child {} of {} now has parents {:?}", child, node, new_parents);
            conditionals.insert(child, Arc::new(normalize_last_axis(&summed)));
            node2parents.insert(child, new_parents);
        }
        node2parents.remove(&node);
        conditionals.remove(&node);
        let mut alphabets = self.node_alphabets.clone();
        alphabets.remove(&node);

        let relabeling: Relabeling = self
            .nodes()
            .iter()
            .filter(|&&n| n != node)
            .map(|&n| (n, if relabel && n > node { n - 1 } else { n }))
            .collect();
        let rename = |n: &Node| relabeling.get(n).copied().ok_or(DagError::UnknownNode(*n));

        let node2parents = node2parents
            .into_iter()
            .map(|(n, parents)| {
                let parents = parents.iter().map(rename).collect::<Result<Vec<_>>>()?;
                Ok((rename(&n)?, parents))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;
        let conditionals = conditionals
            .into_iter()
            .map(|(n, table)| Ok((rename(&n)?, table)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let alphabets = alphabets
            .into_iter()
            .map(|(n, alphabet)| Ok((rename(&n)?, alphabet)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let nodes: BTreeSet<Node> = relabeling.values().copied().collect();

        let marginal = DiscreteDag::from_parts(nodes, node2parents, alphabets, conditionals)?;
        Ok((marginal, relabeling))
    }

    /// Remove several nodes one at a time, last listed first. The returned map takes
    /// original ids of surviving nodes to their final ids.
    pub fn get_marginal_dag(&self, nodes: &[Node], relabel: bool) -> Result<(DiscreteDag, Relabeling)> {
        self.check_query(nodes)?;
        let mut relabeling: Relabeling = self.nodes().iter().map(|&n| (n, n)).collect();
        let mut current = self.clone();
        let mut remaining = nodes.to_vec();
        while let Some(node) = remaining.pop() {
            let current_id = *relabeling.get(&node).ok_or(DagError::UnknownNode(node))?;
            let (next, step) = current.marginal_dag_node(current_id, relabel)?;
            relabeling = relabeling
                .into_iter()
                .filter_map(|(original, id)| step.get(&id).map(|&new| (original, new)))
                .collect();
            current = next;
        }
        info!("marginalized {:?}, {} nodes remain", nodes, current.nnodes());
        Ok((current, relabeling))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn chain() -> DiscreteDag {
        DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![1])]),
            BTreeMap::from([
                (0, arr1(&[0.3, 0.7]).into_dyn()),
                (1, arr2(&[[0.2, 0.8], [0.6, 0.4]]).into_dyn()),
                (2, arr2(&[[0.5, 0.5], [0.1, 0.9]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![10, 20]), (2, vec![0, 1])]),
        )
        .unwrap()
    }

    #[test]
    fn test_intervention_cuts_parents() {
        let ddag = chain();
        let intervened = ddag.get_hard_interventional_dag(1, 20).unwrap();
        assert!(intervened.parents(1).unwrap().is_empty());
        assert!(!intervened.arcs().contains(&(0, 1)));
        assert_eq!(intervened.conditional(1).unwrap(), &arr1(&[0.0, 1.0]).into_dyn());
        assert!(Arc::ptr_eq(&ddag.conditionals[&2], &intervened.conditionals[&2]));
    }

    #[test]
    fn test_intervention_rejects_unknown_value() {
        let result = chain().get_hard_interventional_dag(1, 1);
        assert!(matches!(result, Err(DagError::UnknownValue { node: 1, value: 1 })));
    }

    #[test]
    fn test_marginalize_middle_with_relabel() {
        let (marginal, relabeling) = chain().marginal_dag_node(1, true).unwrap();
        assert_eq!(relabeling, BTreeMap::from([(0, 0), (2, 1)]));
        assert_eq!(marginal.parents(1).unwrap(), &[0]);
        let cpt = marginal.conditional(1).unwrap();
        assert!((cpt[[0, 0]] - (0.2 * 0.5 + 0.8 * 0.1)).abs() < 1e-12);
        assert!((cpt[[1, 0]] - (0.6 * 0.5 + 0.4 * 0.1)).abs() < 1e-12);
    }

    #[test]
    fn test_relabeling_composes() {
        let ddag = chain();
        let (marginal, relabeling) = ddag.get_marginal_dag(&[0, 1], true).unwrap();
        assert_eq!(relabeling, BTreeMap::from([(2, 0)]));
        assert_eq!(marginal.nodes(), &BTreeSet::from([0]));
        let expected = ddag.get_marginal(2).unwrap();
        let got = marginal.get_marginal(0).unwrap();
        assert!((&expected - &got).mapv(f64::abs).sum() < 1e-12);
    }

    #[test]
    fn test_no_relabel_keeps_ids() {
        let (marginal, relabeling) = chain().get_marginal_dag(&[1], false).unwrap();
        assert_eq!(relabeling, BTreeMap::from([(0, 0), (2, 2)]));
        assert_eq!(marginal.parents(2).unwrap(), &[0]);
    }
}
