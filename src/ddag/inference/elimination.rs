//! Variable elimination over the ancestral subgraph of a target set.
//!
//! The running table is kept in the log domain. Nodes are folded in along a
//! topological order of the ancestral subgraph and summed out as soon as every
//! one of their children in that subgraph has been folded in.

use std::collections::BTreeSet;
use std::str::FromStr;

use log::{debug, trace};
use ndarray::{Array1, ArrayD, Dimension, IxDyn};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::DiscreteDag;
use crate::ddag::table::{add_repeated_nodes_conditional, add_variable, marginalize, repeat_dimensions};
use crate::graph::dag::{Dag, Node};

/// How joins and eliminations are interleaved. Both schedules give the same tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EliminationSchedule {
    /// Fold in each node of the order, then sum out whatever became eligible.
    #[default]
    PerInsertion,
    /// At each node of the order, also fold in every child whose parents are all
    /// present before summing out.
    PerEliminationNode,
}

impl FromStr for EliminationSchedule {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "insertion" | "per_insertion" => Ok(EliminationSchedule::PerInsertion),
            "node" | "per_node" | "new" => Ok(EliminationSchedule::PerEliminationNode),
            other => Err(DagError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Transient log-joint table and the ordered nodes indexing its axes.
struct EliminationState<'a> {
    ddag: &'a DiscreteDag,
    subgraph: Dag,
    targets: BTreeSet<Node>,
    log_table: ArrayD<f64>,
    current_nodes: Vec<Node>,
    added_nodes: BTreeSet<Node>,
}

impl<'a> EliminationState<'a> {
    fn start(ddag: &'a DiscreteDag, targets: &[Node]) -> Result<Self> {
        let targets: BTreeSet<Node> = targets.iter().copied().collect();
        let subgraph = ddag.dag.ancestral_subgraph(&targets)?;
        Ok(EliminationState {
            ddag,
            subgraph,
            targets,
            log_table: ArrayD::zeros(IxDyn(&[])),
            current_nodes: Vec::new(),
            added_nodes: BTreeSet::new(),
        })
    }

    fn join(&mut self, node: Node) -> Result<()> {
        let ddag = self.ddag;
        let parents = ddag.parents(node)?;
        self.log_table = add_variable(
            &self.log_table,
            &self.current_nodes,
            ddag.conditional(node)?,
            |n| ddag.dim_of(n),
            parents,
        )?;
        self.current_nodes.push(node);
        self.added_nodes.insert(node);
        trace!("joined {}, table over {:?}", node, self.current_nodes);
        Ok(())
    }

    fn can_join(&self, node: Node) -> Result<bool> {
        Ok(!self.added_nodes.contains(&node)
            && self
                .ddag
                .parents(node)?
                .iter()
                .all(|p| self.added_nodes.contains(p)))
    }

    fn eliminate_ready(&mut self) -> Result<()> {
        let mut axes = Vec::new();
        for (axis, node) in self.current_nodes.iter().enumerate() {
            if self.targets.contains(node) {
                continue;
            }
            let children = self.subgraph.children_of(*node)?;
            if children.iter().all(|c| self.added_nodes.contains(c)) {
                axes.push(axis);
            }
        }
        if axes.is_empty() {
            return Ok(());
        }
        self.log_table = marginalize(&self.log_table, &axes);
        let mut axis = 0;
        self.current_nodes.retain(|_| {
            let keep = !axes.contains(&axis);
            axis += 1;
            keep
        });
        trace!("eliminated axes {:?}, table over {:?}", axes, self.current_nodes);
        Ok(())
    }

    fn run(mut self, schedule: EliminationSchedule) -> Result<(ArrayD<f64>, Vec<Node>)> {
        let order = self.subgraph.topological_sort()?;
        for &node in &order {
            match schedule {
                EliminationSchedule::PerInsertion => {
                    self.join(node)?;
                }
                EliminationSchedule::PerEliminationNode => {
                    if !self.added_nodes.contains(&node) {
                        self.join(node)?;
                    }
                    let children: Vec<Node> =
                        self.subgraph.children_of(node)?.iter().copied().collect();
                    for child in children {
                        if self.can_join(child)? {
                            self.join(child)?;
                        }
                    }
                }
            }
            self.eliminate_ready()?;
        }
        Ok((self.log_table, self.current_nodes))
    }
}

impl DiscreteDag {
    /// Joint marginal over `marginal_nodes`, axes in the order given.
    pub fn get_marginals(&self, marginal_nodes: &[Node], log: bool) -> Result<ArrayD<f64>> {
        self.get_marginals_with(marginal_nodes, log, EliminationSchedule::PerInsertion)
    }

    /// Same as [`DiscreteDag::get_marginals`], with joins scheduled per elimination node.
    pub fn get_marginals_new(&self, marginal_nodes: &[Node], log: bool) -> Result<ArrayD<f64>> {
        self.get_marginals_with(marginal_nodes, log, EliminationSchedule::PerEliminationNode)
    }

    pub fn get_marginals_with(
        &self,
        marginal_nodes: &[Node],
        log: bool,
        schedule: EliminationSchedule,
    ) -> Result<ArrayD<f64>> {
        self.check_query(marginal_nodes)?;
        debug!("marginal over {:?} ({:?})", marginal_nodes, schedule);
        let state = EliminationState::start(self, marginal_nodes)?;
        let (log_table, current_nodes) = state.run(schedule)?;
        let log_table = repeat_dimensions(
            &log_table,
            &current_nodes,
            marginal_nodes,
            |n| self.dim_of(n),
            false,
        )?;
        Ok(if log { log_table } else { log_table.mapv(f64::exp) })
    }

    /// Marginal distribution of a single node.
    pub fn get_marginal(&self, node: Node) -> Result<Array1<f64>> {
        let table = self.get_marginals(&[node], false)?;
        Ok(table.into_dimensionality()?)
    }

    /// `P(marginal_nodes | cond_nodes)` with axes `marginal_nodes ++ cond_nodes`.
    ///
    /// Conditioning assignments of probability zero get a uniform distribution over the
    /// marginal alphabet. A node listed in both sets gets an identity slice.
    pub fn get_conditional(&self, marginal_nodes: &[Node], cond_nodes: &[Node]) -> Result<ArrayD<f64>> {
        self.check_query(marginal_nodes)?;
        self.check_query(cond_nodes)?;
        let repeats = marginal_nodes.iter().filter(|n| cond_nodes.contains(n)).count();
        if repeats > 1 {
            return Err(DagError::NotImplemented(format!(
                "{} nodes shared between {:?} and {:?}",
                repeats, marginal_nodes, cond_nodes
            )));
        }

        let no_repeats: Vec<Node> = marginal_nodes
            .iter()
            .copied()
            .filter(|n| !cond_nodes.contains(n))
            .collect();
        let all_nodes: Vec<Node> = no_repeats.iter().chain(cond_nodes).copied().collect();
        let k = no_repeats.len();

        let log_joint = self.get_marginals(&all_nodes, true)?;
        let axes: Vec<usize> = (0..k).collect();
        let cond_log = marginalize(&log_joint, &axes);
        let uniform = 1.0 / no_repeats.iter().map(|&n| self.dim_of(n)).product::<usize>() as f64;

        let conditional = ArrayD::from_shape_fn(log_joint.raw_dim(), |index| {
            let index = index.slice();
            let denominator = cond_log[&index[k..]];
            if denominator == f64::NEG_INFINITY {
                uniform
            } else {
                (log_joint[index] - denominator).exp()
            }
        });
        if repeats == 0 {
            return Ok(conditional);
        }
        add_repeated_nodes_conditional(&conditional, marginal_nodes, cond_nodes, |n| self.dim_of(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2, arr3};
    use std::collections::BTreeMap;

    fn chain() -> DiscreteDag {
        DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![1])]),
            BTreeMap::from([
                (0, arr1(&[0.3, 0.7]).into_dyn()),
                (1, arr2(&[[0.2, 0.8], [0.6, 0.4]]).into_dyn()),
                (2, arr2(&[[0.5, 0.5], [0.1, 0.9]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
        )
        .unwrap()
    }

    #[test]
    fn test_schedule_from_str() {
        assert_eq!(
            "new".parse::<EliminationSchedule>().unwrap(),
            EliminationSchedule::PerEliminationNode
        );
        assert!("greedy".parse::<EliminationSchedule>().is_err());
    }

    #[test]
    fn test_marginal_of_chain_end() {
        let ddag = chain();
        let p1 = [0.3 * 0.2 + 0.7 * 0.6, 0.3 * 0.8 + 0.7 * 0.4];
        let p2_0 = p1[0] * 0.5 + p1[1] * 0.1;
        let marginal = ddag.get_marginal(2).unwrap();
        assert!((marginal[0] - p2_0).abs() < 1e-12);
        assert!((marginal[1] - (1.0 - p2_0)).abs() < 1e-12);
    }

    #[test]
    fn test_requested_order_is_respected() {
        let ddag = chain();
        let forward = ddag.get_marginals(&[0, 1], false).unwrap();
        let backward = ddag.get_marginals(&[1, 0], false).unwrap();
        assert_eq!(backward, forward.t().to_owned());
        assert!((forward[[1, 0]] - 0.7 * 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_empty_target_is_scalar_one() {
        let table = chain().get_marginals(&[], false).unwrap();
        assert_eq!(table.ndim(), 0);
        assert!((table[[]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_duplicate_target_rejected() {
        assert!(matches!(
            chain().get_marginals(&[1, 1], false),
            Err(DagError::DuplicateNode(1))
        ));
    }

    #[test]
    fn test_conditional_of_child_given_parent_is_cpt() {
        let ddag = chain();
        let conditional = ddag.get_conditional(&[1], &[0]).unwrap();
        assert!((&conditional - &ddag.conditional(1).unwrap().t()).mapv(f64::abs).sum() < 1e-12);
    }

    #[test]
    fn test_zero_probability_conditioning_is_uniform() {
        let ddag = DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0])]),
            BTreeMap::from([
                (0, arr1(&[1.0, 0.0]).into_dyn()),
                (1, arr2(&[[0.2, 0.8], [0.6, 0.4]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1])]),
        )
        .unwrap();
        let conditional = ddag.get_conditional(&[1], &[0]).unwrap();
        assert!((conditional[[0, 1]] - 0.5).abs() < 1e-12);
        assert!((conditional[[1, 1]] - 0.5).abs() < 1e-12);
        assert!((conditional[[0, 0]] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_two_repeats_not_implemented() {
        let result = chain().get_conditional(&[0, 1], &[0, 1]);
        assert!(matches!(result, Err(DagError::NotImplemented(_))));
    }

    #[test]
    fn test_schedules_agree_on_collider() {
        let ddag = DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![]), (2, vec![0, 1])]),
            BTreeMap::from([
                (0, arr1(&[0.3, 0.7]).into_dyn()),
                (1, arr1(&[0.6, 0.4]).into_dyn()),
                (2, arr3(&[[[0.1, 0.9], [0.5, 0.5]], [[0.7, 0.3], [0.2, 0.8]]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
        )
        .unwrap();
        for targets in [vec![2], vec![0, 2], vec![2, 1], vec![1, 0]] {
            let a = ddag.get_marginals(&targets, false).unwrap();
            let b = ddag.get_marginals_new(&targets, false).unwrap();
            assert!((&a - &b).mapv(f64::abs).sum() < 1e-12);
        }
    }
}
