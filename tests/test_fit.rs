use bayesdag::{ClassifierKind, Dag, DagError, DiscreteDag, FitConfig, FitMethod};
use ndarray::{Array2, Axis, arr1, arr2, arr3};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::BTreeMap;

fn network() -> DiscreteDag {
    DiscreteDag::from_parents(
        BTreeMap::from([(0, vec![]), (1, vec![0]), (2, vec![0, 1])]),
        BTreeMap::from([
            (0, arr1(&[0.3, 0.7]).into_dyn()),
            (1, arr2(&[[0.2, 0.8], [0.9, 0.1]]).into_dyn()),
            (
                2,
                arr3(&[[[0.1, 0.9], [0.7, 0.3]], [[0.8, 0.2], [0.4, 0.6]]]).into_dyn(),
            ),
        ]),
        BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]),
    )
    .unwrap()
}

fn training_data(n: usize, seed: u64) -> Array2<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    network().sample(n, &mut rng).unwrap()
}

fn assert_valid_cpts(ddag: &DiscreteDag) {
    for &node in ddag.nodes() {
        let cpt = ddag.conditional(node).unwrap();
        let last = cpt.ndim() - 1;
        assert!(cpt.iter().all(|&p| (0.0..=1.0).contains(&p)));
        for total in cpt.sum_axis(Axis(last)).iter() {
            assert!((total - 1.0).abs() < 1e-9, "node {} sums to {}", node, total);
        }
    }
}

#[test]
fn test_mle_recovers_conditionals() {
    let truth = network();
    let data = training_data(20000, 42);
    let mut rng = StdRng::seed_from_u64(0);
    let fitted = DiscreteDag::fit(truth.dag(), data.view(), &FitMethod::Mle, None, &mut rng).unwrap();
    assert_valid_cpts(&fitted);
    for &node in truth.nodes() {
        assert_eq!(fitted.parents(node).unwrap(), truth.parents(node).unwrap());
        let expected = truth.conditional(node).unwrap();
        let got = fitted.conditional(node).unwrap();
        for (e, g) in expected.iter().zip(got.iter()) {
            assert!((e - g).abs() < 0.03, "node {}: {} vs {}", node, e, g);
        }
    }
}

#[test]
fn test_add_one_smoothing_keeps_unseen_values_possible() {
    let truth = network();
    // node 2 is never 1 in this data
    let data = arr2(&[[0, 0, 0], [1, 0, 0], [0, 1, 0], [1, 1, 0]]);
    let mut rng = StdRng::seed_from_u64(0);
    let node_alphabets = BTreeMap::from([(0, vec![0, 1]), (1, vec![0, 1]), (2, vec![0, 1])]);
    let fitted = DiscreteDag::fit(
        truth.dag(),
        data.view(),
        &FitMethod::AddOneMle { alpha: 1.0 },
        Some(node_alphabets),
        &mut rng,
    )
    .unwrap();
    assert_valid_cpts(&fitted);
    let cpt = fitted.conditional(2).unwrap();
    assert!((cpt[[0, 0, 1]] - 1.0 / 3.0).abs() < 1e-12);
}

#[test]
fn test_supervised_methods_give_valid_conditionals() {
    let truth = network();
    let data = training_data(400, 7);
    for tag in ["logistic", "random_forest", "xgboost"] {
        let mut rng = StdRng::seed_from_u64(1);
        let method: FitMethod = tag.parse().unwrap();
        assert!(matches!(method, FitMethod::Supervised(_)));
        let fitted = DiscreteDag::fit(truth.dag(), data.view(), &method, None, &mut rng).unwrap();
        assert_valid_cpts(&fitted);
        assert_eq!(fitted.conditional(2).unwrap().shape(), &[2, 2, 2]);
    }
}

#[test]
fn test_constant_child_gets_indicator_for_every_classifier() {
    let dag = Dag::new([0, 1], [(0, 1)]).unwrap();
    // node 1 only ever takes the code 1 of its three values
    let data = arr2(&[[0, 1], [1, 1], [0, 1], [1, 1], [1, 1]]);
    let node_alphabets = BTreeMap::from([(0, vec![0, 1]), (1, vec![5, 6, 7])]);
    for tag in ["logistic", "random_forest", "xgboost"] {
        let method: FitMethod = tag.parse().unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let fitted = DiscreteDag::fit(
            &dag,
            data.view(),
            &method,
            Some(node_alphabets.clone()),
            &mut rng,
        )
        .unwrap();
        let cpt = fitted.conditional(1).unwrap();
        assert_eq!(cpt.shape(), &[2, 3], "{}", tag);
        assert_eq!(
            cpt.iter().copied().collect::<Vec<f64>>(),
            vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            "{}",
            tag
        );
        assert_valid_cpts(&fitted);
    }
}

#[test]
fn test_forest_from_config_tracks_strong_dependence() {
    let truth = network();
    let data = training_data(3000, 9);
    let mut config = FitConfig {
        method: "random_forest".to_string(),
        ..FitConfig::default()
    };
    config.forest.n_trees = 20;
    let method = config.fit_method().unwrap();
    assert!(matches!(method, FitMethod::Supervised(ClassifierKind::RandomForest(_))));
    let mut rng = StdRng::seed_from_u64(2);
    let fitted = DiscreteDag::fit(truth.dag(), data.view(), &method, None, &mut rng).unwrap();
    let cpt = fitted.conditional(1).unwrap();
    assert!((cpt[[0, 1]] - 0.8).abs() < 0.1);
    assert!((cpt[[1, 0]] - 0.9).abs() < 0.1);
}

#[test]
fn test_unsupported_method_rejected() {
    assert!(matches!(
        "svm".parse::<FitMethod>(),
        Err(DagError::UnsupportedMethod(tag)) if tag == "svm"
    ));
}

#[test]
fn test_data_shape_checked() {
    let truth = network();
    let mut rng = StdRng::seed_from_u64(0);
    let narrow = arr2(&[[0, 1]]);
    assert!(matches!(
        DiscreteDag::fit(truth.dag(), narrow.view(), &FitMethod::Mle, None, &mut rng),
        Err(DagError::InvalidData(_))
    ));
    let empty = Array2::<usize>::zeros((0, 3));
    assert!(matches!(
        DiscreteDag::fit(truth.dag(), empty.view(), &FitMethod::Mle, None, &mut rng),
        Err(DagError::InvalidData(_))
    ));
}
