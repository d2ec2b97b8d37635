use std::collections::HashMap;

use log::{debug, warn};
use ndarray::{Array2, ArrayD, Axis, IxDyn};
use rand::Rng;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::inference::factor::assignments;
use crate::ddag::network::DiscreteDag;
use crate::ddag::table::add_repeated_nodes_marginal;
use crate::graph::dag::Node;

/// Monte Carlo estimates keyed by conditioning codes (in `cond_nodes` order).
#[derive(Debug, Clone)]
pub struct ImportanceEstimate {
    /// Distribution over the marginal nodes for each conditioning assignment.
    pub conditionals: HashMap<Vec<usize>, ArrayD<f64>>,
    /// Estimated probability of each conditioning assignment (mean importance weight).
    pub marginals: HashMap<Vec<usize>, f64>,
}

impl DiscreteDag {
    /// Self-normalized importance sampling of `P(marginal_nodes | cond_nodes = c)` for
    /// each assignment `c` in `cond_values` (every assignment when `None`), using
    /// `nparticles` clamped forward samples per assignment.
    pub fn get_conditional_importance_sampling<R: Rng + ?Sized>(
        &self,
        marginal_nodes: &[Node],
        cond_nodes: &[Node],
        cond_values: Option<&[Vec<usize>]>,
        nparticles: usize,
        rng: &mut R,
    ) -> Result<ImportanceEstimate> {
        self.check_query(marginal_nodes)?;
        self.check_query(cond_nodes)?;
        if nparticles == 0 {
            return Err(DagError::InvalidData("nparticles must be positive".to_string()));
        }
        let no_repeats: Vec<Node> = marginal_nodes
            .iter()
            .copied()
            .filter(|n| !cond_nodes.contains(n))
            .collect();
        let columns: Vec<usize> = no_repeats
            .iter()
            .map(|&n| self.column_of(n))
            .collect::<Result<_>>()?;
        let shape: Vec<usize> = no_repeats.iter().map(|&n| self.dim_of(n)).collect();
        let cond_dims: Vec<usize> = cond_nodes.iter().map(|&n| self.dim_of(n)).collect();
        let requested = match cond_values {
            Some(values) => values.to_vec(),
            None => assignments(&cond_dims),
        };
        debug!(
            "importance sampling {:?} given {:?} for {} assignments, {} particles each",
            marginal_nodes,
            cond_nodes,
            requested.len(),
            nparticles
        );

        let mut estimate = ImportanceEstimate {
            conditionals: HashMap::with_capacity(requested.len()),
            marginals: HashMap::with_capacity(requested.len()),
        };
        for codes in requested {
            if codes.len() != cond_nodes.len() {
                return Err(DagError::InvalidData(format!(
                    "assignment {:?} does not match conditioning nodes {:?}",
                    codes, cond_nodes
                )));
            }
            let values = Array2::from_shape_fn((nparticles, codes.len()), |(_, j)| codes[j]);
            let (samples, weights) = self.weighted_samples(cond_nodes, &values, rng)?;
            let weights = weights.map_axis(Axis(1), |row| row.product());

            let mut table = ArrayD::<f64>::zeros(IxDyn(&shape));
            for (sample, &weight) in samples.rows().into_iter().zip(weights.iter()) {
                let index: Vec<usize> = columns.iter().map(|&c| sample[c]).collect();
                table[index.as_slice()] += weight;
            }
            let total = weights.sum();
            if total > 0.0 {
                table /= total;
            } else {
                warn!("all importance weights are zero for assignment {:?}", codes);
                let size = table.len().max(1) as f64;
                table.fill(1.0 / size);
            }
            let table = add_repeated_nodes_marginal(
                &table,
                marginal_nodes,
                cond_nodes,
                |n| self.dim_of(n),
                &codes,
            )?;
            estimate.marginals.insert(codes.clone(), total / nparticles as f64);
            estimate.conditionals.insert(codes, table);
        }
        Ok(estimate)
    }
}
