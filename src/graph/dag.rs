use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::ddag::common::error::{DagError, Result};

/// Node identifier. Sample and data matrices order their columns by ascending node id.
pub type Node = usize;

/// Directed acyclic graph over integer node ids.
///
/// Parent and child sets are kept in ordered sets so every traversal, and therefore
/// every elimination ordering built on top of it, is deterministic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dag {
    nodes: BTreeSet<Node>,
    arcs: BTreeSet<(Node, Node)>,
    parents: BTreeMap<Node, BTreeSet<Node>>,
    children: BTreeMap<Node, BTreeSet<Node>>,
}

impl Dag {
    /// Create a DAG, rejecting arcs between unknown nodes and cycles.
    pub fn new(
        nodes: impl IntoIterator<Item = Node>,
        arcs: impl IntoIterator<Item = (Node, Node)>,
    ) -> Result<Self> {
        let nodes: BTreeSet<Node> = nodes.into_iter().collect();
        let mut parents: BTreeMap<Node, BTreeSet<Node>> =
            nodes.iter().map(|&n| (n, BTreeSet::new())).collect();
        let mut children = parents.clone();
        let mut arc_set = BTreeSet::new();
        for (i, j) in arcs {
            if !nodes.contains(&i) {
                return Err(DagError::UnknownNode(i));
            }
            if !nodes.contains(&j) {
                return Err(DagError::UnknownNode(j));
            }
            if i == j {
                return Err(DagError::Cycle(vec![i]));
            }
            parents.entry(j).or_default().insert(i);
            children.entry(i).or_default().insert(j);
            arc_set.insert((i, j));
        }
        let dag = Dag {
            nodes,
            arcs: arc_set,
            parents,
            children,
        };
        dag.topological_sort()?;
        Ok(dag)
    }

    pub fn nodes(&self) -> &BTreeSet<Node> {
        &self.nodes
    }

    pub fn nnodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn arcs(&self) -> &BTreeSet<(Node, Node)> {
        &self.arcs
    }

    pub fn contains(&self, node: Node) -> bool {
        self.nodes.contains(&node)
    }

    pub fn parents_of(&self, node: Node) -> Result<&BTreeSet<Node>> {
        self.parents.get(&node).ok_or(DagError::UnknownNode(node))
    }

    pub fn children_of(&self, node: Node) -> Result<&BTreeSet<Node>> {
        self.children.get(&node).ok_or(DagError::UnknownNode(node))
    }

    /// Kahn's algorithm, always releasing the smallest ready node first.
    pub fn topological_sort(&self) -> Result<Vec<Node>> {
        let mut in_degree: BTreeMap<Node, usize> = self
            .parents
            .iter()
            .map(|(&node, parents)| (node, parents.len()))
            .collect();
        let mut ready: BTreeSet<Node> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(&node, _)| node)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(node) = ready.pop_first() {
            order.push(node);
            for child in &self.children[&node] {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*child);
                    }
                }
            }
        }
        if order.len() != self.nodes.len() {
            let placed: BTreeSet<Node> = order.iter().copied().collect();
            let stuck: Vec<Node> = self.nodes.difference(&placed).copied().collect();
            return Err(DagError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Strict ancestors of `node`.
    pub fn ancestors_of(&self, node: Node) -> Result<BTreeSet<Node>> {
        let mut ancestors = BTreeSet::new();
        let mut stack: Vec<Node> = self.parents_of(node)?.iter().copied().collect();
        while let Some(current) = stack.pop() {
            if ancestors.insert(current) {
                stack.extend(self.parents[&current].iter().copied());
            }
        }
        Ok(ancestors)
    }

    /// Strict descendants of `node`.
    pub fn descendants_of(&self, node: Node) -> Result<BTreeSet<Node>> {
        let mut descendants = BTreeSet::new();
        let mut stack: Vec<Node> = self.children_of(node)?.iter().copied().collect();
        while let Some(current) = stack.pop() {
            if descendants.insert(current) {
                stack.extend(self.children[&current].iter().copied());
            }
        }
        Ok(descendants)
    }

    /// Sub-DAG induced by `nodes` and all of their ancestors.
    pub fn ancestral_subgraph(&self, nodes: &BTreeSet<Node>) -> Result<Dag> {
        let mut keep = nodes.clone();
        for &node in nodes {
            keep.extend(self.ancestors_of(node)?);
        }
        trace!("ancestral subgraph of {:?} has nodes {:?}", nodes, keep);
        let arcs: Vec<(Node, Node)> = self
            .arcs
            .iter()
            .filter(|(i, j)| keep.contains(i) && keep.contains(j))
            .copied()
            .collect();
        Dag::new(keep, arcs)
    }
}
