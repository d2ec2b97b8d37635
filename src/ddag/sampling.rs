//! Ancestral, interventional and importance-weighted sampling.
//!
//! Samples are integer codes into each node's alphabet, one column per node in
//! ascending node order.

use std::collections::BTreeMap;

use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewD};
use rand::Rng;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::network::{DiscreteDag, conditional_row};
use crate::graph::dag::Node;

/// Inverse-CDF draw: the first index whose cumulative mass exceeds a uniform draw.
pub(crate) fn draw_code<R: Rng + ?Sized>(distribution: &ArrayViewD<f64>, rng: &mut R) -> usize {
    let u: f64 = rng.r#gen::<f64>();
    let mut cumulative = 0.0;
    for (code, &p) in distribution.iter().enumerate() {
        cumulative += p;
        if cumulative > u {
            return code;
        }
    }
    distribution.len().saturating_sub(1)
}

impl DiscreteDag {
    /// Shared ancestral pass. Clamped nodes take their supplied codes; when
    /// `record_weights` is set, column `j` of the weight matrix holds the probability
    /// the model assigns to the `j`-th clamped code given its sampled parents.
    fn forward_pass<R: Rng + ?Sized>(
        &self,
        nsamples: usize,
        clamped: &[(Node, ArrayView1<usize>)],
        record_weights: bool,
        rng: &mut R,
    ) -> Result<(Array2<usize>, Array2<f64>)> {
        for (node, codes) in clamped {
            if codes.len() != nsamples {
                return Err(DagError::InvalidData(format!(
                    "{} values supplied for node {}, expected {}",
                    codes.len(),
                    node,
                    nsamples
                )));
            }
            let dim = self.dim(*node)?;
            if let Some(bad) = codes.iter().find(|&&code| code >= dim) {
                return Err(DagError::InvalidData(format!(
                    "code {} out of range for node {} with {} values",
                    bad, node, dim
                )));
            }
        }

        let mut samples = Array2::<usize>::zeros((nsamples, self.nnodes()));
        let weight_columns = if record_weights { clamped.len() } else { 0 };
        let mut weights = Array2::<f64>::ones((nsamples, weight_columns));

        for node in self.topological_sort()? {
            let column = self.column_of(node)?;
            let parent_columns: Vec<usize> = self
                .parents(node)?
                .iter()
                .map(|&p| self.column_of(p))
                .collect::<Result<_>>()?;
            let conditional = self.conditional(node)?;
            let clamp = clamped.iter().position(|(n, _)| *n == node);

            for row in 0..nsamples {
                let parent_codes: Vec<usize> =
                    parent_columns.iter().map(|&c| samples[[row, c]]).collect();
                match clamp {
                    Some(j) => {
                        let code = clamped[j].1[row];
                        samples[[row, column]] = code;
                        if record_weights {
                            weights[[row, j]] = conditional_row(conditional, &parent_codes)?[[code]];
                        }
                    }
                    None => {
                        let distribution = conditional_row(conditional, &parent_codes)?;
                        samples[[row, column]] = draw_code(&distribution, rng);
                    }
                }
            }
        }
        Ok((samples, weights))
    }

    /// `nsamples` ancestral draws from the joint distribution.
    pub fn sample<R: Rng + ?Sized>(&self, nsamples: usize, rng: &mut R) -> Result<Array2<usize>> {
        debug!("drawing {} ancestral samples", nsamples);
        Ok(self.forward_pass(nsamples, &[], false, rng)?.0)
    }

    /// Ancestral draws with the listed nodes set to the supplied codes; their own
    /// conditionals are never consulted. One sample per supplied value.
    pub fn sample_interventional<R: Rng + ?Sized>(
        &self,
        nodes2intervened_values: &BTreeMap<Node, Array1<usize>>,
        rng: &mut R,
    ) -> Result<Array2<usize>> {
        let nsamples = nodes2intervened_values
            .values()
            .next()
            .map(|values| values.len())
            .ok_or_else(|| DagError::InvalidData("no intervened nodes given".to_string()))?;
        let clamped: Vec<(Node, ArrayView1<usize>)> = nodes2intervened_values
            .iter()
            .map(|(&node, values)| (node, values.view()))
            .collect();
        debug!(
            "drawing {} interventional samples on {:?}",
            nsamples,
            nodes2intervened_values.keys().collect::<Vec<_>>()
        );
        Ok(self.forward_pass(nsamples, &clamped, false, rng)?.0)
    }

    /// Ancestral draws with `nodes` set to the columns of `values`, plus one weight
    /// column per clamped node. The row product of the weights is the importance
    /// weight of the sample against the model's own distribution.
    pub fn weighted_samples<R: Rng + ?Sized>(
        &self,
        nodes: &[Node],
        values: &Array2<usize>,
        rng: &mut R,
    ) -> Result<(Array2<usize>, Array2<f64>)> {
        self.check_query(nodes)?;
        if values.ncols() != nodes.len() {
            return Err(DagError::InvalidData(format!(
                "{} value columns for {} clamped nodes",
                values.ncols(),
                nodes.len()
            )));
        }
        let clamped: Vec<(Node, ArrayView1<usize>)> = nodes
            .iter()
            .enumerate()
            .map(|(j, &node)| (node, values.column(j)))
            .collect();
        self.forward_pass(values.nrows(), &clamped, true, rng)
    }
}
