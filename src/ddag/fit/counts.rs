use std::collections::BTreeMap;

use ndarray::{Array1, ArrayD, ArrayView1, ArrayView2, Axis, IxDyn};

/// Relative frequencies of the codes `0..dim` in `column`, with `alpha` added to
/// every count when smoothing.
pub fn marginal_frequencies(column: ArrayView1<usize>, dim: usize, alpha: Option<f64>) -> Array1<f64> {
    let mut counts = Array1::<f64>::zeros(dim);
    for &code in column {
        if code < dim {
            counts[code] += 1.0;
        }
    }
    if let Some(alpha) = alpha {
        counts += alpha;
    }
    let total = counts.sum();
    if total > 0.0 {
        counts / total
    } else {
        Array1::from_elem(dim, 1.0 / dim as f64)
    }
}

/// Frequency estimate of a CPT: the data is stratified by parent codes and each
/// observed stratum gets its own (smoothed) frequencies. Parent assignments never
/// observed keep a uniform row.
pub fn conditional_frequencies(
    data: ArrayView2<usize>,
    column: usize,
    parent_columns: &[usize],
    parent_dims: &[usize],
    dim: usize,
    alpha: Option<f64>,
) -> ArrayD<f64> {
    let mut shape = parent_dims.to_vec();
    shape.push(dim);
    let mut conditional = ArrayD::from_elem(IxDyn(&shape), 1.0 / dim as f64);

    let mut strata: BTreeMap<Vec<usize>, Vec<usize>> = BTreeMap::new();
    for (row, values) in data.axis_iter(Axis(0)).enumerate() {
        let key: Vec<usize> = parent_columns.iter().map(|&c| values[c]).collect();
        strata.entry(key).or_default().push(row);
    }
    for (parent_codes, rows) in strata {
        if parent_codes.iter().zip(parent_dims).any(|(&code, &d)| code >= d) {
            continue;
        }
        let subset = data.select(Axis(0), &rows);
        let frequencies = marginal_frequencies(subset.column(column), dim, alpha);
        let mut slot = conditional.view_mut();
        for &code in &parent_codes {
            slot = slot.index_axis_move(Axis(0), code);
        }
        slot.assign(&frequencies);
    }
    conditional
}

/// CPT that puts all mass on `code` for every parent assignment.
pub fn indicator_conditional(parent_dims: &[usize], dim: usize, code: usize) -> ArrayD<f64> {
    let mut shape = parent_dims.to_vec();
    shape.push(dim);
    let mut conditional = ArrayD::zeros(IxDyn(&shape));
    conditional
        .index_axis_mut(Axis(parent_dims.len()), code)
        .fill(1.0);
    conditional
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, arr2};

    #[test]
    fn test_marginal_frequencies_smoothing() {
        let column = arr1(&[0, 0, 1]);
        let mle = marginal_frequencies(column.view(), 3, None);
        assert_eq!(mle, arr1(&[2.0 / 3.0, 1.0 / 3.0, 0.0]));
        let smoothed = marginal_frequencies(column.view(), 3, Some(1.0));
        assert_eq!(smoothed, arr1(&[0.5, 1.0 / 3.0, 1.0 / 6.0]));
    }

    #[test]
    fn test_unseen_parent_row_is_uniform() {
        let data = arr2(&[[0, 1], [0, 1], [0, 0]]);
        let conditional = conditional_frequencies(data.view(), 1, &[0], &[2], 2, None);
        assert!((conditional[[0, 1]] - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(conditional[[1, 0]], 0.5);
        assert_eq!(conditional[[1, 1]], 0.5);
    }

    #[test]
    fn test_indicator_conditional() {
        let conditional = indicator_conditional(&[2, 3], 2, 1);
        assert_eq!(conditional.shape(), &[2, 3, 2]);
        assert_eq!(conditional.sum(), 6.0);
        assert_eq!(conditional[[1, 2, 1]], 1.0);
        assert_eq!(conditional[[1, 2, 0]], 0.0);
    }
}
