use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use log::{debug, trace};
use ndarray::{ArrayD, Axis, IxDyn};
use priority_queue::PriorityQueue;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::DiscreteDag;
use crate::ddag::table::{add_repeated_nodes_conditional, add_repeated_nodes_marginal, contract};
use crate::graph::dag::Node;

/// Exact posterior queries with full evidence assignments.
pub trait ExactInference {
    /// Distribution over `variables` (axes in the order given) given `evidence`,
    /// a list of `(node, code)` pairs.
    fn query(&self, variables: &[Node], evidence: &[(Node, usize)]) -> Result<ArrayD<f64>>;
}

#[derive(Debug, Clone)]
struct Factor {
    table: ArrayD<f64>,
    scope: Vec<Node>,
}

impl Factor {
    fn reduce(mut self, node: Node, code: usize) -> Self {
        if let Some(axis) = self.scope.iter().position(|&n| n == node) {
            self.table = self.table.index_axis_move(Axis(axis), code);
            self.scope.remove(axis);
        }
        self
    }
}

/// Factor-product variable elimination with evidence reduction, run on the
/// ancestral set of the query and evidence nodes in min-degree order.
pub struct FactorElimination<'a> {
    ddag: &'a DiscreteDag,
}

impl<'a> FactorElimination<'a> {
    pub fn new(ddag: &'a DiscreteDag) -> Self {
        FactorElimination { ddag }
    }

    fn product(&self, factors: &[Factor], output: &[Node]) -> Result<ArrayD<f64>> {
        let size_of = |n: Node| self.ddag.dim_of(n);
        let mut table = ArrayD::from_elem(IxDyn(&[]), 1.0);
        let mut scope: Vec<Node> = Vec::new();
        for (i, factor) in factors.iter().enumerate() {
            // Keep every label still needed by a later factor or by the output.
            let next_scope: Vec<Node> = scope
                .iter()
                .chain(&factor.scope)
                .copied()
                .filter(|n| output.contains(n) || factors[i + 1..].iter().any(|f| f.scope.contains(n)))
                .fold(Vec::new(), |mut acc, n| {
                    if !acc.contains(&n) {
                        acc.push(n);
                    }
                    acc
                });
            table = contract(&table, &scope, &factor.table, &factor.scope, &next_scope, size_of)?;
            scope = next_scope;
        }
        if scope.as_slice() != output {
            table = contract(
                &table,
                &scope,
                &ArrayD::from_elem(IxDyn(&[]), 1.0),
                &[],
                output,
                size_of,
            )?;
        }
        Ok(table)
    }

    /// Min-degree ordering over the interaction graph of the given factors.
    fn elimination_order(&self, factors: &[Factor], hidden: &BTreeSet<Node>) -> Vec<Node> {
        let mut adjacency: BTreeMap<Node, BTreeSet<Node>> =
            hidden.iter().map(|&n| (n, BTreeSet::new())).collect();
        for factor in factors {
            for &a in &factor.scope {
                if let Some(neighbors) = adjacency.get_mut(&a) {
                    neighbors.extend(factor.scope.iter().copied().filter(|&b| b != a));
                }
            }
        }
        let mut queue: PriorityQueue<Node, Reverse<(usize, Node)>> = adjacency
            .iter()
            .map(|(&n, neighbors)| (n, Reverse((neighbors.len(), n))))
            .collect();
        let mut order = Vec::with_capacity(hidden.len());
        while let Some((node, _)) = queue.pop() {
            order.push(node);
            let neighbors = adjacency.remove(&node).unwrap_or_default();
            for &a in &neighbors {
                if let Some(adjacent) = adjacency.get_mut(&a) {
                    adjacent.remove(&node);
                    adjacent.extend(neighbors.iter().copied().filter(|&b| b != a));
                    queue.change_priority(&a, Reverse((adjacent.len(), a)));
                }
            }
        }
        order
    }
}

impl ExactInference for FactorElimination<'_> {
    fn query(&self, variables: &[Node], evidence: &[(Node, usize)]) -> Result<ArrayD<f64>> {
        self.ddag.check_query(variables)?;
        let evidence_nodes: Vec<Node> = evidence.iter().map(|&(n, _)| n).collect();
        self.ddag.check_query(&evidence_nodes)?;
        for &(node, code) in evidence {
            if variables.contains(&node) {
                return Err(DagError::LabelMismatch(format!(
                    "node {} is both queried and observed",
                    node
                )));
            }
            if code >= self.ddag.dim_of(node) {
                return Err(DagError::InvalidData(format!(
                    "code {} out of range for node {}",
                    code, node
                )));
            }
        }

        let relevant_roots: BTreeSet<Node> =
            variables.iter().chain(&evidence_nodes).copied().collect();
        let relevant = self.ddag.dag.ancestral_subgraph(&relevant_roots)?;
        let mut factors = Vec::with_capacity(relevant.nnodes());
        for &node in relevant.nodes() {
            let mut scope = self.ddag.parents(node)?.to_vec();
            scope.push(node);
            let mut factor = Factor {
                table: self.ddag.conditional(node)?.clone(),
                scope,
            };
            for &(observed, code) in evidence {
                factor = factor.reduce(observed, code);
            }
            factors.push(factor);
        }

        let hidden: BTreeSet<Node> = relevant
            .nodes()
            .iter()
            .copied()
            .filter(|n| !relevant_roots.contains(n))
            .collect();
        let order = self.elimination_order(&factors, &hidden);
        debug!("query {:?} given {:?}, elimination order {:?}", variables, evidence, order);

        for node in order {
            let (touching, rest): (Vec<Factor>, Vec<Factor>) =
                factors.into_iter().partition(|f| f.scope.contains(&node));
            let mut scope: Vec<Node> = Vec::new();
            for n in touching.iter().flat_map(|f| f.scope.iter()) {
                if *n != node && !scope.contains(n) {
                    scope.push(*n);
                }
            }
            trace!("eliminating {} from {} factors into {:?}", node, touching.len(), scope);
            let table = self.product(&touching, &scope)?;
            factors = rest;
            factors.push(Factor { table, scope });
        }

        let joint = self.product(&factors, variables)?;
        let total = joint.sum();
        if total > 0.0 {
            Ok(joint / total)
        } else {
            let size = joint.len().max(1) as f64;
            Ok(ArrayD::from_elem(joint.raw_dim(), 1.0 / size))
        }
    }
}

/// Every code assignment over `nodes`, last node fastest.
pub fn assignments(dims: &[usize]) -> Vec<Vec<usize>> {
    let mut result = vec![Vec::with_capacity(dims.len())];
    for &dim in dims {
        result = result
            .into_iter()
            .flat_map(|prefix| {
                (0..dim).map(move |code| {
                    let mut next = prefix.clone();
                    next.push(code);
                    next
                })
            })
            .collect();
    }
    result
}

impl DiscreteDag {
    /// `P(marginal_nodes | cond_nodes)` assembled from one exact query per conditioning
    /// assignment. Same layout as [`DiscreteDag::get_conditional`].
    pub fn get_conditional_query(
        &self,
        engine: &impl ExactInference,
        marginal_nodes: &[Node],
        cond_nodes: &[Node],
    ) -> Result<ArrayD<f64>> {
        let no_repeats: Vec<Node> = marginal_nodes
            .iter()
            .copied()
            .filter(|n| !cond_nodes.contains(n))
            .collect();
        let k = no_repeats.len();
        let cond_dims: Vec<usize> = cond_nodes.iter().map(|&n| self.dim_of(n)).collect();
        let shape: Vec<usize> = no_repeats
            .iter()
            .map(|&n| self.dim_of(n))
            .chain(cond_dims.iter().copied())
            .collect();
        let mut conditional = ArrayD::zeros(IxDyn(&shape));
        for codes in assignments(&cond_dims) {
            let evidence: Vec<(Node, usize)> =
                cond_nodes.iter().copied().zip(codes.iter().copied()).collect();
            let probabilities = engine.query(&no_repeats, &evidence)?;
            let mut slot = conditional.view_mut();
            for &code in &codes {
                slot = slot.index_axis_move(Axis(k), code);
            }
            slot.assign(&probabilities);
        }
        add_repeated_nodes_conditional(&conditional, marginal_nodes, cond_nodes, |n| self.dim_of(n))
    }

    /// One distribution over `marginal_nodes` per conditioning assignment, keyed by the
    /// assignment's codes in `cond_nodes` order.
    pub fn get_conditional_query_map(
        &self,
        engine: &impl ExactInference,
        marginal_nodes: &[Node],
        cond_nodes: &[Node],
    ) -> Result<HashMap<Vec<usize>, ArrayD<f64>>> {
        let no_repeats: Vec<Node> = marginal_nodes
            .iter()
            .copied()
            .filter(|n| !cond_nodes.contains(n))
            .collect();
        let cond_dims: Vec<usize> = cond_nodes.iter().map(|&n| self.dim_of(n)).collect();
        assignments(&cond_dims)
            .into_iter()
            .map(|codes| {
                let evidence: Vec<(Node, usize)> =
                    cond_nodes.iter().copied().zip(codes.iter().copied()).collect();
                let probabilities = engine.query(&no_repeats, &evidence)?;
                let expanded = add_repeated_nodes_marginal(
                    &probabilities,
                    marginal_nodes,
                    cond_nodes,
                    |n| self.dim_of(n),
                    &codes,
                )?;
                Ok((codes, expanded))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    fn collider() -> DiscreteDag {
        DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![]), (2, vec![0, 1])]),
            BTreeMap::from([
                (0, arr1(&[0.3, 0.7]).into_dyn()),
                (1, arr1(&[0.6, 0.4]).into_dyn()),
                (
                    2,
                    ndarray::arr3(&[[[0.1, 0.9], [0.5, 0.5]], [[0.7, 0.3], [0.2, 0.8]]]).into_dyn(),
                ),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
        )
        .unwrap()
    }

    #[test]
    fn test_assignments_last_fastest() {
        assert_eq!(
            assignments(&[2, 3]),
            vec![vec![0, 0], vec![0, 1], vec![0, 2], vec![1, 0], vec![1, 1], vec![1, 2]]
        );
        assert_eq!(assignments(&[]), vec![Vec::<usize>::new()]);
    }

    #[test]
    fn test_query_without_evidence_matches_elimination() {
        let ddag = collider();
        let engine = FactorElimination::new(&ddag);
        let from_query = engine.query(&[2, 0], &[]).unwrap();
        let from_elimination = ddag.get_marginals(&[2, 0], false).unwrap();
        assert!((&from_query - &from_elimination).mapv(f64::abs).sum() < 1e-12);
    }

    #[test]
    fn test_explaining_away() {
        let ddag = collider();
        let engine = FactorElimination::new(&ddag);
        let posterior = engine.query(&[0], &[(2, 1), (1, 1)]).unwrap();
        let unnormalized = [0.3 * 0.5, 0.7 * 0.8];
        let z = unnormalized[0] + unnormalized[1];
        assert!((posterior[[0]] - unnormalized[0] / z).abs() < 1e-12);
    }

    #[test]
    fn test_query_rejects_observed_target() {
        let ddag = collider();
        let engine = FactorElimination::new(&ddag);
        assert!(engine.query(&[0], &[(0, 1)]).is_err());
    }

    #[test]
    fn test_query_conditional_matches_elimination_conditional() {
        let ddag = collider();
        let engine = FactorElimination::new(&ddag);
        let a = ddag.get_conditional_query(&engine, &[0], &[2, 1]).unwrap();
        let b = ddag.get_conditional(&[0], &[2, 1]).unwrap();
        assert!((&a - &b).mapv(f64::abs).sum() < 1e-10);
    }

    #[test]
    fn test_query_map_places_indicator_for_repeat() {
        let ddag = DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0])]),
            BTreeMap::from([
                (0, arr1(&[0.5, 0.5]).into_dyn()),
                (1, arr2(&[[0.9, 0.1], [0.2, 0.8]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1])]),
        )
        .unwrap();
        let engine = FactorElimination::new(&ddag);
        let map = ddag.get_conditional_query_map(&engine, &[0, 1], &[1]).unwrap();
        let given_one = &map[&vec![1]];
        assert_eq!(given_one.shape(), &[2, 2]);
        assert_eq!(given_one[[0, 0]], 0.0);
        assert!((given_one[[0, 1]] - 0.1 / 0.9).abs() < 1e-12);
        assert!((given_one[[1, 1]] - 0.8 / 0.9).abs() < 1e-12);
    }
}
