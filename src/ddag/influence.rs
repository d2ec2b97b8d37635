//! Efficient influence function of the treated mean `E[1[A = a] Y]`.
//!
//! The estimand is split along the standard imset of the graph: every conditioning
//! set `S` with a non-zero coefficient contributes `count(S) * E[1[A = a] Y | S]`.
//! Evaluating the function on a sample adds these terms up and divides by the
//! propensity `P(A = a)`.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::str::FromStr;

use log::{debug, info};
use ndarray::{Array1, ArrayD, ArrayView2, ArrayViewD, Axis, Dimension, IxDyn};
use rand::Rng;
use rayon::prelude::*;

use crate::ddag::common::error::{DagError, Result};
use crate::ddag::inference::factor::{ExactInference, FactorElimination, assignments};
use crate::ddag::network::DiscreteDag;
use crate::graph::dag::Node;

/// Backend for the conditional expectations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InferenceMethod {
    #[default]
    VariableElimination,
    FactorQuery,
    ImportanceSampling { nparticles: usize },
}

impl FromStr for InferenceMethod {
    type Err = DagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "variable_elimination" => Ok(InferenceMethod::VariableElimination),
            "factor_query" | "exact" => Ok(InferenceMethod::FactorQuery),
            "importance_reweighting" | "importance_sampling" => {
                Ok(InferenceMethod::ImportanceSampling { nparticles: 1000 })
            }
            other => Err(DagError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// Which conditioning assignments get an expectation.
#[derive(Debug, Clone, Copy)]
pub enum EvaluationMode<'a> {
    /// Every assignment of every conditioning set.
    Full,
    /// Only assignments that occur in `sampled_values` (rows are samples, columns
    /// nodes in ascending order).
    Partial { sampled_values: ArrayView2<'a, usize> },
}

/// Conditional expectation of one term, indexed by codes of its conditioning set.
#[derive(Debug, Clone)]
pub enum ConditionalMean {
    Scalar(f64),
    Table(ArrayD<f64>),
    Partial(HashMap<Vec<usize>, f64>),
}

impl ConditionalMean {
    pub fn lookup(&self, codes: &[usize]) -> Result<f64> {
        match self {
            ConditionalMean::Scalar(mean) => Ok(*mean),
            ConditionalMean::Table(table) => table
                .get(codes)
                .copied()
                .ok_or_else(|| DagError::UnseenAssignment(codes.to_vec())),
            ConditionalMean::Partial(means) => means
                .get(codes)
                .copied()
                .ok_or_else(|| DagError::UnseenAssignment(codes.to_vec())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InfluenceTerm {
    pub cond_set: Vec<Node>,
    pub count: i64,
    pub mean: ConditionalMean,
}

/// Everything that defines an influence function besides the network.
#[derive(Debug, Clone)]
pub struct InfluenceQuery<'a> {
    pub target: Node,
    pub treatment: Node,
    pub treatment_value: i64,
    pub ignored_nodes: BTreeSet<Node>,
    /// `P(treatment = treatment_value)`; computed from the network when `None`.
    pub propensity: Option<f64>,
    pub method: InferenceMethod,
    pub mode: EvaluationMode<'a>,
}

impl<'a> InfluenceQuery<'a> {
    pub fn new(target: Node, treatment: Node, treatment_value: i64) -> Self {
        InfluenceQuery {
            target,
            treatment,
            treatment_value,
            ignored_nodes: BTreeSet::new(),
            propensity: None,
            method: InferenceMethod::default(),
            mode: EvaluationMode::Full,
        }
    }

    pub fn with_ignored_nodes(mut self, ignored_nodes: BTreeSet<Node>) -> Self {
        self.ignored_nodes = ignored_nodes;
        self
    }

    pub fn with_propensity(mut self, propensity: f64) -> Self {
        self.propensity = Some(propensity);
        self
    }

    pub fn with_method(mut self, method: InferenceMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_mode(mut self, mode: EvaluationMode<'a>) -> Self {
        self.mode = mode;
        self
    }
}

/// `f(a, y) = 1[a = treatment code] * value(y)` over codes.
struct Contrast {
    treatment: Node,
    treatment_code: usize,
    target: Node,
    target_values: Vec<f64>,
}

impl Contrast {
    fn value(&self, treatment_code: usize, target_code: usize) -> f64 {
        if treatment_code == self.treatment_code {
            self.target_values[target_code]
        } else {
            0.0
        }
    }

    fn code_of(node: Node, free: &[Node], free_codes: &[usize], cond_set: &[Node], cond_codes: &[usize]) -> usize {
        match free.iter().position(|&n| n == node) {
            Some(ix) => free_codes[ix],
            None => cond_set
                .iter()
                .position(|&n| n == node)
                .map_or(0, |ix| cond_codes[ix]),
        }
    }

    /// `E[f | cond_set = cond_codes]` given the distribution of the free nodes.
    fn mean(&self, free: &[Node], distribution: &ArrayViewD<f64>, cond_set: &[Node], cond_codes: &[usize]) -> f64 {
        distribution
            .indexed_iter()
            .map(|(index, &p)| {
                let index = index.slice();
                let a = Self::code_of(self.treatment, free, index, cond_set, cond_codes);
                let y = Self::code_of(self.target, free, index, cond_set, cond_codes);
                p * self.value(a, y)
            })
            .sum()
    }
}

fn slice_assignment<'t>(table: &'t ArrayD<f64>, leading: usize, codes: &[usize]) -> ArrayViewD<'t, f64> {
    let mut view = table.view();
    for &code in codes {
        view = view.index_axis_move(Axis(leading), code);
    }
    view
}

impl DiscreteDag {
    /// Imset coefficients and conditional expectations of every term.
    pub fn influence_function_terms<R: Rng + ?Sized>(
        &self,
        query: &InfluenceQuery,
        rng: &mut R,
    ) -> Result<Vec<InfluenceTerm>> {
        if query.target == query.treatment {
            return Err(DagError::DuplicateNode(query.target));
        }
        let contrast = Contrast {
            treatment: query.treatment,
            treatment_code: self.code_of(query.treatment, query.treatment_value)?,
            target: query.target,
            target_values: self.alphabet(query.target)?.iter().map(|&v| v as f64).collect(),
        };
        let imset = self.dag.standard_imset(&query.ignored_nodes)?;
        info!(
            "influence function of node {} under {} = {}: {} terms",
            query.target,
            query.treatment,
            query.treatment_value,
            imset.len()
        );

        let mut terms = Vec::with_capacity(imset.len());
        for (cond_set, &count) in &imset {
            let cond_set: Vec<Node> = cond_set.iter().copied().collect();
            let mean = self.conditional_mean(&contrast, &cond_set, query, rng)?;
            debug!("term {:?} with count {}", cond_set, count);
            terms.push(InfluenceTerm {
                cond_set,
                count,
                mean,
            });
        }
        Ok(terms)
    }

    fn conditional_mean<R: Rng + ?Sized>(
        &self,
        contrast: &Contrast,
        cond_set: &[Node],
        query: &InfluenceQuery,
        rng: &mut R,
    ) -> Result<ConditionalMean> {
        let free: Vec<Node> = [contrast.treatment, contrast.target]
            .into_iter()
            .filter(|n| !cond_set.contains(n))
            .collect();
        if cond_set.is_empty() {
            let joint = self.get_marginals(&free, false)?;
            return Ok(ConditionalMean::Scalar(contrast.mean(&free, &joint.view(), &[], &[])));
        }

        let cond_dims: Vec<usize> = cond_set.iter().map(|&n| self.dim_of(n)).collect();
        let requested: Vec<Vec<usize>> = match query.mode {
            EvaluationMode::Full => assignments(&cond_dims),
            EvaluationMode::Partial { sampled_values } => {
                let columns: Vec<usize> = cond_set
                    .iter()
                    .map(|&n| self.column_of(n))
                    .collect::<Result<_>>()?;
                let observed: HashSet<Vec<usize>> = sampled_values
                    .axis_iter(Axis(0))
                    .map(|row| columns.iter().map(|&c| row[c]).collect())
                    .collect();
                let mut observed: Vec<Vec<usize>> = observed.into_iter().collect();
                observed.sort();
                observed
            }
        };

        let means: Vec<(Vec<usize>, f64)> = match query.method {
            InferenceMethod::VariableElimination => {
                let conditional = self.get_conditional(&free, cond_set)?;
                requested
                    .into_iter()
                    .map(|codes| {
                        let distribution = slice_assignment(&conditional, free.len(), &codes);
                        let mean = contrast.mean(&free, &distribution, cond_set, &codes);
                        (codes, mean)
                    })
                    .collect()
            }
            InferenceMethod::FactorQuery => {
                let engine = FactorElimination::new(self);
                requested
                    .into_iter()
                    .map(|codes| {
                        let evidence: Vec<(Node, usize)> =
                            cond_set.iter().copied().zip(codes.iter().copied()).collect();
                        let distribution = engine.query(&free, &evidence)?;
                        let mean = contrast.mean(&free, &distribution.view(), cond_set, &codes);
                        Ok((codes, mean))
                    })
                    .collect::<Result<_>>()?
            }
            InferenceMethod::ImportanceSampling { nparticles } => {
                let estimate = self.get_conditional_importance_sampling(
                    &free,
                    cond_set,
                    Some(requested.as_slice()),
                    nparticles,
                    rng,
                )?;
                requested
                    .into_iter()
                    .map(|codes| {
                        let distribution = estimate
                            .conditionals
                            .get(&codes)
                            .ok_or_else(|| DagError::UnseenAssignment(codes.clone()))?;
                        let mean = contrast.mean(&free, &distribution.view(), cond_set, &codes);
                        Ok((codes, mean))
                    })
                    .collect::<Result<_>>()?
            }
        };

        Ok(match query.mode {
            EvaluationMode::Full => {
                let mut table = ArrayD::zeros(IxDyn(&cond_dims));
                for (codes, mean) in means {
                    table[codes.as_slice()] = mean;
                }
                ConditionalMean::Table(table)
            }
            EvaluationMode::Partial { .. } => ConditionalMean::Partial(means.into_iter().collect()),
        })
    }

    /// Build the influence function for `query`.
    pub fn get_efficient_influence_function<R: Rng + ?Sized>(
        &self,
        query: &InfluenceQuery,
        rng: &mut R,
    ) -> Result<EfficientInfluenceFunction> {
        let propensity = match query.propensity {
            Some(propensity) => propensity,
            None => {
                let code = self.code_of(query.treatment, query.treatment_value)?;
                self.get_marginal(query.treatment)?[code]
            }
        };
        if propensity <= 0.0 {
            return Err(DagError::ZeroPropensity(propensity));
        }
        let terms = self.influence_function_terms(query, rng)?;
        let columns = terms
            .iter()
            .map(|term| {
                term.cond_set
                    .iter()
                    .map(|&n| self.column_of(n))
                    .collect::<Result<Vec<_>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EfficientInfluenceFunction {
            terms,
            columns,
            propensity,
            nnodes: self.nnodes(),
        })
    }
}

/// Per-sample score `Σ count(S) E[1[A = a] Y | S = s] / P(A = a)`.
#[derive(Debug, Clone)]
pub struct EfficientInfluenceFunction {
    terms: Vec<InfluenceTerm>,
    columns: Vec<Vec<usize>>,
    propensity: f64,
    nnodes: usize,
}

impl EfficientInfluenceFunction {
    pub fn terms(&self) -> &[InfluenceTerm] {
        &self.terms
    }

    pub fn propensity(&self) -> f64 {
        self.propensity
    }

    /// Score every row of `samples` (columns are nodes in ascending order).
    pub fn evaluate(&self, samples: ArrayView2<usize>) -> Result<Array1<f64>> {
        if samples.ncols() != self.nnodes {
            return Err(DagError::InvalidData(format!(
                "samples have {} columns for {} nodes",
                samples.ncols(),
                self.nnodes
            )));
        }
        let scores = (0..samples.nrows())
            .into_par_iter()
            .map(|i| {
                let row = samples.row(i);
                let mut total = 0.0;
                for (term, columns) in self.terms.iter().zip(&self.columns) {
                    let codes: Vec<usize> = columns.iter().map(|&c| row[c]).collect();
                    total += term.count as f64 * term.mean.lookup(&codes)?;
                }
                Ok(total / self.propensity)
            })
            .collect::<Result<Vec<f64>>>()?;
        Ok(Array1::from(scores))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::BTreeMap;

    fn confounded() -> DiscreteDag {
        // 0 confounds treatment 1 and outcome 2
        DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![0, 1])]),
            BTreeMap::from([
                (0, arr1(&[0.4, 0.6]).into_dyn()),
                (1, arr2(&[[0.7, 0.3], [0.2, 0.8]]).into_dyn()),
                (
                    2,
                    ndarray::arr3(&[[[0.9, 0.1], [0.5, 0.5]], [[0.6, 0.4], [0.1, 0.9]]]).into_dyn(),
                ),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
        )
        .unwrap()
    }

    #[test]
    fn test_inference_method_tags() {
        assert_eq!(
            "variable_elimination".parse::<InferenceMethod>().unwrap(),
            InferenceMethod::VariableElimination
        );
        assert!(matches!(
            "importance_reweighting".parse::<InferenceMethod>().unwrap(),
            InferenceMethod::ImportanceSampling { .. }
        ));
        assert!("mcmc".parse::<InferenceMethod>().is_err());
    }

    #[test]
    fn test_score_of_complete_graph_is_zero() {
        let ddag = confounded();
        let mut rng = StdRng::seed_from_u64(0);
        let query = InfluenceQuery::new(2, 1, 1);
        let function = ddag.get_efficient_influence_function(&query, &mut rng).unwrap();
        assert!(function.terms().is_empty());
        let samples = ddag.sample(10, &mut rng).unwrap();
        assert!(function.evaluate(samples.view()).unwrap().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_same_treatment_and_target_rejected() {
        let ddag = confounded();
        let mut rng = StdRng::seed_from_u64(0);
        let query = InfluenceQuery::new(1, 1, 1);
        assert!(ddag.influence_function_terms(&query, &mut rng).is_err());
    }

    #[test]
    fn test_zero_propensity_rejected() {
        let ddag = confounded();
        let mut rng = StdRng::seed_from_u64(0);
        let query = InfluenceQuery::new(2, 1, 1).with_propensity(0.0);
        assert!(matches!(
            ddag.get_efficient_influence_function(&query, &mut rng),
            Err(DagError::ZeroPropensity(_))
        ));
    }

    #[test]
    fn test_partial_mode_rejects_unseen_assignment() {
        let ddag = DiscreteDag::from_parents(
            BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![1])]),
            BTreeMap::from([
                (0, arr1(&[0.4, 0.6]).into_dyn()),
                (1, arr2(&[[0.7, 0.3], [0.2, 0.8]]).into_dyn()),
                (2, arr2(&[[0.9, 0.1], [0.3, 0.7]]).into_dyn()),
            ]),
            BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let seen = arr2(&[[0, 0, 0]]);
        let query = InfluenceQuery::new(2, 0, 1).with_mode(EvaluationMode::Partial {
            sampled_values: seen.view(),
        });
        let function = ddag.get_efficient_influence_function(&query, &mut rng).unwrap();
        assert!(function.evaluate(seen.view()).is_ok());
        let unseen = arr2(&[[1, 1, 1]]);
        assert!(matches!(
            function.evaluate(unseen.view()),
            Err(DagError::UnseenAssignment(_))
        ));
    }
}
