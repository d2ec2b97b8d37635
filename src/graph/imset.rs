use std::collections::{BTreeMap, BTreeSet};

use super::dag::{Dag, Node};
use crate::ddag::common::error::Result;

/// Signed integer set function over node subsets.
pub type Imset = BTreeMap<BTreeSet<Node>, i64>;

impl Dag {
    /// Standard imset of the DAG restricted to the nodes outside `ignored_nodes`:
    /// `δ_N − δ_∅ + Σ_i (δ_pa(i) − δ_pa(i)∪{i})`, with zero entries dropped.
    pub fn standard_imset(&self, ignored_nodes: &BTreeSet<Node>) -> Result<Imset> {
        let active: BTreeSet<Node> = self.nodes().difference(ignored_nodes).copied().collect();
        let mut imset = Imset::new();
        *imset.entry(active.clone()).or_default() += 1;
        *imset.entry(BTreeSet::new()).or_default() -= 1;
        for &node in &active {
            let parents: BTreeSet<Node> = self
                .parents_of(node)?
                .difference(ignored_nodes)
                .copied()
                .collect();
            let mut family = parents.clone();
            family.insert(node);
            *imset.entry(parents).or_default() += 1;
            *imset.entry(family).or_default() -= 1;
        }
        imset.retain(|_, count| *count != 0);
        Ok(imset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_imset() {
        let dag = Dag::new(0..3, [(0, 1), (1, 2)]).unwrap();
        let imset = dag.standard_imset(&BTreeSet::new()).unwrap();
        let expected = Imset::from([
            (BTreeSet::from([0, 1, 2]), 1),
            (BTreeSet::from([0, 1]), -1),
            (BTreeSet::from([1]), 1),
            (BTreeSet::from([1, 2]), -1),
        ]);
        assert_eq!(imset, expected);
    }

    #[test]
    fn test_complete_graph_imset_is_zero() {
        let dag = Dag::new(0..3, [(0, 1), (0, 2), (1, 2)]).unwrap();
        assert!(dag.standard_imset(&BTreeSet::new()).unwrap().is_empty());
    }

    #[test]
    fn test_ignored_nodes_are_dropped() {
        let dag = Dag::new(0..3, [(0, 1), (1, 2)]).unwrap();
        let imset = dag.standard_imset(&BTreeSet::from([2])).unwrap();
        assert!(imset.is_empty());
        let total: i64 = dag.standard_imset(&BTreeSet::new()).unwrap().values().sum();
        assert_eq!(total, 0);
    }
}
