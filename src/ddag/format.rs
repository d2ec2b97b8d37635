//! Conversion to and from a tabular-CPD network description, and a versioned JSON
//! file wrapping it.
//!
//! In the tabular layout a CPD's values are a matrix with one row per value of the
//! variable and one column per evidence assignment (last evidence variable fastest),
//! the transpose of the node-last layout used by [`DiscreteDag`].

use std::collections::{BTreeMap, HashMap};
use std::fs;

use chrono::{DateTime, Utc};
use log::info;
use ndarray::{Array2, IxDyn};
use serde::{Deserialize, Serialize};

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::DiscreteDag;
use crate::graph::dag::Node;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TabularCpd {
    pub variable: String,
    pub variable_card: usize,
    pub evidence: Vec<String>,
    pub evidence_card: Vec<usize>,
    pub values: Vec<Vec<f64>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TabularNetwork {
    pub cpds: Vec<TabularCpd>,
}

impl DiscreteDag {
    /// Tabular description with nodes named by their ids. Alphabets become `0..card`.
    pub fn to_tabular(&self) -> Result<TabularNetwork> {
        let mut cpds = Vec::with_capacity(self.nnodes());
        for &node in self.nodes() {
            let parents = self.parents(node)?;
            let card = self.dim(node)?;
            let conditional = self.conditional(node)?;
            let flat: Vec<f64> = conditional.iter().copied().collect();
            let columns = flat.len() / card.max(1);
            let values = (0..card)
                .map(|v| (0..columns).map(|j| flat[j * card + v]).collect())
                .collect();
            cpds.push(TabularCpd {
                variable: node.to_string(),
                variable_card: card,
                evidence: parents.iter().map(|p| p.to_string()).collect(),
                evidence_card: parents.iter().map(|&p| self.dim_of(p)).collect(),
                values,
            });
        }
        Ok(TabularNetwork { cpds })
    }

    /// Network from a tabular description. Nodes are numbered `0..n` in the order the
    /// CPDs are listed; the returned names give the original label of each id.
    pub fn from_tabular(network: &TabularNetwork) -> Result<(DiscreteDag, Vec<String>)> {
        let names: Vec<String> = network.cpds.iter().map(|cpd| cpd.variable.clone()).collect();
        let mut labels2ixs: HashMap<&str, Node> = HashMap::with_capacity(names.len());
        for (ix, name) in names.iter().enumerate() {
            if labels2ixs.insert(name.as_str(), ix).is_some() {
                return Err(DagError::InvalidData(format!("variable '{}' listed twice", name)));
            }
        }
        let cards: Vec<usize> = network.cpds.iter().map(|cpd| cpd.variable_card).collect();

        let mut node2parents = BTreeMap::new();
        let mut conditionals = BTreeMap::new();
        let mut node_alphabets = BTreeMap::new();
        for (node, cpd) in network.cpds.iter().enumerate() {
            let parents: Vec<Node> = cpd
                .evidence
                .iter()
                .map(|name| {
                    labels2ixs.get(name.as_str()).copied().ok_or_else(|| {
                        DagError::InvalidData(format!("unknown evidence variable '{}'", name))
                    })
                })
                .collect::<Result<_>>()?;
            let parent_cards: Vec<usize> = parents.iter().map(|&p| cards[p]).collect();
            if parent_cards != cpd.evidence_card {
                return Err(DagError::ShapeMismatch {
                    node,
                    expected: parent_cards,
                    got: cpd.evidence_card.clone(),
                });
            }
            let columns: usize = parent_cards.iter().product();
            let well_formed = cpd.values.len() == cpd.variable_card
                && cpd.values.iter().all(|row| row.len() == columns);
            if !well_formed {
                return Err(DagError::ShapeMismatch {
                    node,
                    expected: vec![cpd.variable_card, columns],
                    got: vec![
                        cpd.values.len(),
                        cpd.values.first().map_or(0, Vec::len),
                    ],
                });
            }
            let node_last = Array2::from_shape_fn((columns, cpd.variable_card), |(j, v)| cpd.values[v][j]);
            let mut shape = parent_cards.clone();
            shape.push(cpd.variable_card);
            conditionals.insert(node, node_last.into_shape_with_order(IxDyn(&shape))?);
            node2parents.insert(node, parents);
            node_alphabets.insert(node, (0..cpd.variable_card as i64).collect());
        }
        let ddag = DiscreteDag::from_parents(node2parents, conditionals, node_alphabets)?;
        Ok((ddag, names))
    }
}

/// Versioned on-disk form of a network.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NetworkFile {
    pub version: u32,
    pub timestamp: DateTime<Utc>,
    /// Alphabet values by variable name; variables not listed use `0..card`.
    #[serde(default)]
    pub alphabets: BTreeMap<String, Vec<i64>>,
    pub network: TabularNetwork,
}

impl NetworkFile {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(ddag: &DiscreteDag) -> Result<Self> {
        let alphabets = ddag
            .node_alphabets()
            .iter()
            .map(|(node, alphabet)| (node.to_string(), alphabet.clone()))
            .collect();
        Ok(NetworkFile {
            version: Self::CURRENT_VERSION,
            timestamp: Utc::now(),
            alphabets,
            network: ddag.to_tabular()?,
        })
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        info!("Saving network to file: {}", path);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn load_from_file(path: &str) -> Result<Self> {
        info!("Loading network from file: {}", path);
        let json = fs::read_to_string(path)?;
        let file: NetworkFile = serde_json::from_str(&json)?;
        if file.version > Self::CURRENT_VERSION {
            return Err(DagError::Version {
                found: file.version,
                supported: Self::CURRENT_VERSION,
            });
        }
        Ok(file)
    }

    /// The network, with stored alphabets applied, and the variable name of each id.
    pub fn to_ddag(&self) -> Result<(DiscreteDag, Vec<String>)> {
        let (ddag, names) = DiscreteDag::from_tabular(&self.network)?;
        if self.alphabets.is_empty() {
            return Ok((ddag, names));
        }
        let mut node_alphabets = ddag.node_alphabets().clone();
        for (node, name) in names.iter().enumerate() {
            if let Some(alphabet) = self.alphabets.get(name) {
                node_alphabets.insert(node, alphabet.clone());
            }
        }
        let conditionals = ddag
            .nodes()
            .iter()
            .map(|&n| Ok((n, ddag.conditional(n)?.clone())))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let ddag = DiscreteDag::from_parents(ddag.node2parents().clone(), conditionals, node_alphabets)?;
        Ok((ddag, names))
    }
}
