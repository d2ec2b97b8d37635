//! Dense probability-table algebra over labelled axes.
//!
//! Every table is an `ArrayD<f64>` paired with an ordered list of axis labels held by
//! the caller. Log-domain tables use `-inf` for exact zeros.

use std::fmt::Debug;

use log::trace;
use ndarray::{Array1, Array2, ArrayD, ArrayView1, Axis, IxDyn};

use crate::ddag::common::error::{DagError, Result};
use crate::graph::dag::Node;

/// Axis label used when a variable occurs both in a marginal and a conditioning set:
/// the marginal copy gets `Copy`, every other axis `Var`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AxisLabel {
    Var(Node),
    Copy(Node),
}

impl AxisLabel {
    pub fn node(self) -> Node {
        match self {
            AxisLabel::Var(node) | AxisLabel::Copy(node) => node,
        }
    }
}

/// Natural log with exact zeros mapped to `-inf`.
pub fn no_warn_log(table: &ArrayD<f64>) -> ArrayD<f64> {
    table.mapv(|x| if x > 0.0 { x.ln() } else { f64::NEG_INFINITY })
}

/// `log Σ exp(x)` over one lane, `-inf` when every entry is `-inf`.
pub fn logsumexp(lane: ArrayView1<f64>) -> f64 {
    let max = lane.fold(f64::NEG_INFINITY, |acc, &x| acc.max(x));
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    let sum = lane.fold(0.0, |acc, &x| acc + (x - max).exp());
    max + sum.ln()
}

/// Sum out `axes` of a log-domain table. Positions refer to the table as passed in;
/// the caller drops the matching labels.
pub fn marginalize(table: &ArrayD<f64>, axes: &[usize]) -> ArrayD<f64> {
    let mut axes = axes.to_vec();
    axes.sort_unstable();
    axes.dedup();
    let mut result = table.clone();
    for &axis in axes.iter().rev() {
        result = result.map_axis(Axis(axis), logsumexp);
    }
    result
}

fn check_unique<L: Copy + Eq + Debug>(labels: &[L]) -> Result<()> {
    for (i, label) in labels.iter().enumerate() {
        if labels[..i].contains(label) {
            return Err(DagError::LabelMismatch(format!(
                "label {:?} repeated in {:?}",
                label, labels
            )));
        }
    }
    Ok(())
}

/// Broadcast a table indexed by `curr` into one indexed by `new`.
///
/// Axes of `curr` are permuted into their order in `new`; labels missing from `curr`
/// are repeated to `size_of(label)`. With `add_new` the trailing axis of `tensor` is
/// carried through unchanged as the trailing axis of the result.
pub fn repeat_dimensions<L, F>(
    tensor: &ArrayD<f64>,
    curr: &[L],
    new: &[L],
    size_of: F,
    add_new: bool,
) -> Result<ArrayD<f64>>
where
    L: Copy + Eq + Debug,
    F: Fn(L) -> usize,
{
    let extra = usize::from(add_new);
    if tensor.ndim() != curr.len() + extra {
        return Err(DagError::LabelMismatch(format!(
            "table of rank {} cannot be indexed by {:?} (extra axis: {})",
            tensor.ndim(),
            curr,
            add_new
        )));
    }
    check_unique(curr)?;
    check_unique(new)?;
    if let Some(missing) = curr.iter().find(|label| !new.contains(label)) {
        return Err(DagError::LabelMismatch(format!(
            "label {:?} of {:?} is absent from {:?}",
            missing, curr, new
        )));
    }

    let mut permutation: Vec<usize> = new
        .iter()
        .filter_map(|label| curr.iter().position(|c| c == label))
        .collect();
    if add_new {
        permutation.push(curr.len());
    }
    let mut view = tensor.view().permuted_axes(IxDyn(&permutation));
    for (position, label) in new.iter().enumerate() {
        if !curr.contains(label) {
            view = view.insert_axis(Axis(position));
        }
    }

    let mut shape: Vec<usize> = new.iter().map(|&label| size_of(label)).collect();
    if add_new {
        shape.push(tensor.shape()[curr.len()]);
    }
    let broadcast = view.broadcast(IxDyn(&shape)).ok_or_else(|| {
        DagError::LabelMismatch(format!(
            "cannot broadcast {:?} over {:?} to {:?}",
            tensor.shape(),
            curr,
            shape
        ))
    })?;
    Ok(broadcast.to_owned())
}

/// Fold a node's CPT into a running log-joint table.
///
/// `table` is indexed by `current`; `conditional` by `parents` followed by the node.
/// The node's axis is appended last and `current` keeps its order.
pub fn add_variable<F>(
    table: &ArrayD<f64>,
    current: &[Node],
    conditional: &ArrayD<f64>,
    size_of: F,
    parents: &[Node],
) -> Result<ArrayD<f64>>
where
    F: Fn(Node) -> usize,
{
    let log_conditional = no_warn_log(conditional);
    let aligned = repeat_dimensions(&log_conditional, parents, current, size_of, true)?;
    let expanded = table.view().insert_axis(Axis(table.ndim()));
    Ok(aligned + &expanded)
}

/// Two-operand contraction in the probability domain.
///
/// Both operands are aligned on the union of their labels, multiplied, and every
/// label absent from `output` is summed out. The result is indexed by `output`.
pub fn contract<L, F>(
    lhs: &ArrayD<f64>,
    lhs_labels: &[L],
    rhs: &ArrayD<f64>,
    rhs_labels: &[L],
    output: &[L],
    size_of: F,
) -> Result<ArrayD<f64>>
where
    L: Copy + Eq + Debug,
    F: Fn(L) -> usize,
{
    check_unique(output)?;
    let mut all_labels = output.to_vec();
    for label in lhs_labels.iter().chain(rhs_labels) {
        if !all_labels.contains(label) {
            all_labels.push(*label);
        }
    }
    if let Some(missing) = output
        .iter()
        .find(|label| !lhs_labels.contains(label) && !rhs_labels.contains(label))
    {
        return Err(DagError::LabelMismatch(format!(
            "output label {:?} is absent from {:?} and {:?}",
            missing, lhs_labels, rhs_labels
        )));
    }
    trace!(
        "contract {:?}, {:?} -> {:?}",
        lhs_labels, rhs_labels, output
    );
    let left = repeat_dimensions(lhs, lhs_labels, &all_labels, &size_of, false)?;
    let right = repeat_dimensions(rhs, rhs_labels, &all_labels, &size_of, false)?;
    let mut product = left * &right;
    for axis in (output.len()..all_labels.len()).rev() {
        product = product.sum_axis(Axis(axis));
    }
    Ok(product)
}

/// Rescale the trailing axis of a table so every row sums to one. Rows summing to
/// zero are left untouched.
pub fn normalize_last_axis(table: &ArrayD<f64>) -> ArrayD<f64> {
    let last = Axis(table.ndim() - 1);
    let sums = table
        .sum_axis(last)
        .mapv(|s| if s > 0.0 { s } else { 1.0 })
        .insert_axis(last);
    table / &sums
}

fn single_repeat(marginal: &[Node], cond: &[Node]) -> Result<Option<Node>> {
    let repeats: Vec<Node> = marginal
        .iter()
        .copied()
        .filter(|node| cond.contains(node))
        .collect();
    match repeats.as_slice() {
        [] => Ok(None),
        [node] => Ok(Some(*node)),
        _ => Err(DagError::NotImplemented(format!(
            "nodes {:?} appear in both the marginal and the conditioning set; only one is supported",
            repeats
        ))),
    }
}

fn marginal_labels(marginal: &[Node], repeated: Node) -> Vec<AxisLabel> {
    marginal
        .iter()
        .map(|&node| {
            if node == repeated {
                AxisLabel::Copy(node)
            } else {
                AxisLabel::Var(node)
            }
        })
        .collect()
}

/// Expand a conditional over `marginal \ cond` followed by `cond` into one over
/// `marginal` followed by `cond`, where the single node shared by both sets is
/// forced to agree with its conditioning value (identity broadcast).
pub fn add_repeated_nodes_conditional<F>(
    conditional: &ArrayD<f64>,
    marginal: &[Node],
    cond: &[Node],
    size_of: F,
) -> Result<ArrayD<f64>>
where
    F: Fn(Node) -> usize,
{
    let Some(repeated) = single_repeat(marginal, cond)? else {
        return Ok(conditional.clone());
    };
    let label_size = |label: AxisLabel| size_of(label.node());

    let start: Vec<AxisLabel> = marginal
        .iter()
        .filter(|node| !cond.contains(node))
        .chain(cond)
        .map(|&node| AxisLabel::Var(node))
        .collect();
    let mut end = marginal_labels(marginal, repeated);
    end.extend(cond.iter().map(|&node| AxisLabel::Var(node)));

    let expanded = repeat_dimensions(conditional, &start, &end, label_size, false)?;
    let eye: ArrayD<f64> = Array2::eye(size_of(repeated)).into_dyn();
    let mask = repeat_dimensions(
        &eye,
        &[AxisLabel::Var(repeated), AxisLabel::Copy(repeated)],
        &end,
        label_size,
        false,
    )?;
    Ok(expanded * &mask)
}

/// Expand a distribution over `marginal \ cond` into one over `marginal` for a
/// single conditioning assignment: the shared node becomes an indicator at its
/// conditioning value.
pub fn add_repeated_nodes_marginal<F>(
    probabilities: &ArrayD<f64>,
    marginal: &[Node],
    cond: &[Node],
    size_of: F,
    cond_values: &[usize],
) -> Result<ArrayD<f64>>
where
    F: Fn(Node) -> usize,
{
    let Some(repeated) = single_repeat(marginal, cond)? else {
        return Ok(probabilities.clone());
    };
    let label_size = |label: AxisLabel| size_of(label.node());

    let start: Vec<AxisLabel> = marginal
        .iter()
        .filter(|node| !cond.contains(node))
        .map(|&node| AxisLabel::Var(node))
        .collect();
    let end = marginal_labels(marginal, repeated);
    let expanded = repeat_dimensions(probabilities, &start, &end, label_size, false)?;

    let position = cond
        .iter()
        .position(|&node| node == repeated)
        .ok_or(DagError::UnknownNode(repeated))?;
    let value = *cond_values.get(position).ok_or_else(|| {
        DagError::LabelMismatch(format!(
            "{} conditioning values given for {:?}",
            cond_values.len(),
            cond
        ))
    })?;
    let ones: ArrayD<f64> =
        Array1::from_shape_fn(size_of(repeated), |v| if v == value { 1.0 } else { 0.0 })
            .into_dyn();
    let mask = repeat_dimensions(&ones, &[AxisLabel::Copy(repeated)], &end, label_size, false)?;
    Ok(expanded * &mask)
}
