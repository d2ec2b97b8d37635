use bayesdag::{DagError, DiscreteDag, EliminationSchedule, ExactInference, FactorElimination};
use ndarray::{ArrayD, arr1, arr2, arr3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

const CPT1: [[f64; 2]; 2] = [[0.1, 0.9], [0.9, 0.1]];
const CPT2: [[[f64; 2]; 2]; 2] = [[[0.1, 0.9], [0.9, 0.1]], [[0.8, 0.2], [0.2, 0.8]]];

fn network() -> DiscreteDag {
    DiscreteDag::new(
        [0, 1, 2],
        [(0, 1), (0, 2), (1, 2)],
        BTreeMap::from([
            (0, arr1(&[0.5, 0.5]).into_dyn()),
            (1, arr2(&CPT1).into_dyn()),
            (2, arr3(&CPT2).into_dyn()),
        ]),
        BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![0, 1])]),
        BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
    )
    .unwrap()
}

fn joint(a: usize, b: usize, c: usize) -> f64 {
    0.5 * CPT1[a][b] * CPT2[a][b][c]
}

fn assert_close(lhs: &ArrayD<f64>, rhs: &ArrayD<f64>, tolerance: f64) {
    assert_eq!(lhs.shape(), rhs.shape());
    for (l, r) in lhs.iter().zip(rhs.iter()) {
        assert!((l - r).abs() < tolerance, "{} vs {}", l, r);
    }
}

#[test]
fn test_joint_matches_chain_rule() {
    let ddag = network();
    let table = ddag.get_marginals(&[0, 1, 2], false).unwrap();
    for ((a, b, c), p) in table.clone().into_dimensionality::<ndarray::Ix3>().unwrap().indexed_iter() {
        assert!((p - joint(a, b, c)).abs() < 1e-12);
    }
    assert!((table.sum() - 1.0).abs() < 1e-12);
}

#[test]
fn test_schedules_agree() {
    let ddag = network();
    for nodes in [vec![0], vec![1], vec![2], vec![0, 2], vec![2, 0], vec![2, 1, 0]] {
        let insertion = ddag
            .get_marginals_with(&nodes, false, EliminationSchedule::PerInsertion)
            .unwrap();
        let per_node = ddag
            .get_marginals_with(&nodes, false, EliminationSchedule::PerEliminationNode)
            .unwrap();
        assert_close(&insertion, &per_node, 1e-12);
        assert_close(&ddag.get_marginals_new(&nodes, false).unwrap(), &per_node, 1e-12);
    }
}

#[test]
fn test_log_marginals_exponentiate_to_marginals() {
    let ddag = network();
    let log = ddag.get_marginals(&[2, 0], true).unwrap();
    let plain = ddag.get_marginals(&[2, 0], false).unwrap();
    assert_close(&log.mapv(f64::exp), &plain, 1e-12);
}

#[test]
fn test_conditional_times_marginal_is_joint() {
    let ddag = network();
    let conditional = ddag.get_conditional(&[2], &[0, 1]).unwrap();
    let marginal = ddag.get_marginals(&[0, 1], false).unwrap();
    for a in 0..2 {
        for b in 0..2 {
            for c in 0..2 {
                let p = conditional[[c, a, b]] * marginal[[a, b]];
                assert!((p - joint(a, b, c)).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn test_conditional_given_own_parents_is_cpt() {
    let ddag = network();
    let conditional = ddag.get_conditional(&[1], &[0]).unwrap();
    for a in 0..2 {
        for b in 0..2 {
            assert!((conditional[[b, a]] - CPT1[a][b]).abs() < 1e-12);
        }
    }
}

#[test]
fn test_repeated_node_is_an_indicator() {
    let ddag = network();
    let conditional = ddag.get_conditional(&[0, 1], &[1]).unwrap();
    assert_eq!(conditional.shape(), &[2, 2, 2]);
    // P(0 = a | 1 = c) with a uniform root is CPT1[a][c] normalized over a
    for a in 0..2 {
        for b in 0..2 {
            for c in 0..2 {
                let expected = if b == c {
                    CPT1[a][c] / (CPT1[0][c] + CPT1[1][c])
                } else {
                    0.0
                };
                assert!((conditional[[a, b, c]] - expected).abs() < 1e-12);
            }
        }
    }
}

#[test]
fn test_factor_elimination_matches_variable_elimination() {
    let ddag = network();
    let engine = FactorElimination::new(&ddag);
    let expected = ddag.get_conditional(&[2], &[0]).unwrap();
    for a in 0..2 {
        let result = engine.query(&[2], &[(0, a)]).unwrap();
        for c in 0..2 {
            assert!((result[[c]] - expected[[c, a]]).abs() < 1e-12);
        }
    }
    let dense = ddag.get_conditional_query(&engine, &[0, 2], &[1]).unwrap();
    assert_close(&dense, &ddag.get_conditional(&[0, 2], &[1]).unwrap(), 1e-12);
}

#[test]
fn test_importance_sampling_converges() {
    let ddag = network();
    let mut rng = StdRng::seed_from_u64(3);
    let estimate = ddag
        .get_conditional_importance_sampling(&[2], &[1], None, 20000, &mut rng)
        .unwrap();
    let exact = ddag.get_conditional(&[2], &[1]).unwrap();
    let marginal = ddag.get_marginal(1).unwrap();
    for b in 0..2 {
        let conditional = &estimate.conditionals[&vec![b]];
        for c in 0..2 {
            assert!((conditional[[c]] - exact[[c, b]]).abs() < 0.02);
        }
        assert!((estimate.marginals[&vec![b]] - marginal[b]).abs() < 0.02);
    }
}

#[test]
fn test_unknown_node_rejected() {
    let ddag = network();
    assert!(matches!(ddag.get_marginals(&[7], false), Err(DagError::UnknownNode(7))));
}

#[test]
fn test_cpts_are_distributions() {
    let ddag = network();
    for &node in ddag.nodes() {
        let cpt = ddag.conditional(node).unwrap();
        let last = cpt.ndim() - 1;
        for total in cpt.sum_axis(ndarray::Axis(last)).iter() {
            assert!((total - 1.0).abs() < 1e-12);
        }
    }
}

#[test]
fn test_marginal_from_conditional_and_marginal() {
    let ddag = network();
    for (x, y) in [(0, 1), (1, 0), (2, 0), (0, 2), (2, 1)] {
        let conditional = ddag.get_conditional(&[x], &[y]).unwrap();
        let marginal_y = ddag.get_marginal(y).unwrap();
        let marginal_x = ddag.get_marginal(x).unwrap();
        for vx in 0..2 {
            let total: f64 = (0..2).map(|vy| conditional[[vx, vy]] * marginal_y[vy]).sum();
            assert!((total - marginal_x[vx]).abs() < 1e-12);
        }
    }
}

#[test]
fn test_zero_probability_conditioning_is_uniform() {
    let mut ddag = network();
    ddag.set_conditional(0, arr1(&[1.0, 0.0]).into_dyn()).unwrap();
    let conditional = ddag.get_conditional(&[2], &[0]).unwrap();
    assert!((conditional[[0, 1]] - 0.5).abs() < 1e-12);
    assert!((conditional[[1, 1]] - 0.5).abs() < 1e-12);
    assert!(matches!(
        ddag.get_conditional(&[0, 1], &[0, 1]),
        Err(DagError::NotImplemented(_))
    ));
}
