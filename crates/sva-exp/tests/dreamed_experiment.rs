use nalgebra::DMatrix;
use sva_core::Domain;
use sva_exp::{dreamed_experiment, PointsPerDim};

fn observations() -> (DMatrix<f64>, DMatrix<f64>) {
    let x = DMatrix::<f64>::from_row_slice(6, 1, &[0.0, 0.2, 0.4, 0.6, 0.8, 1.0]);
    let y = DMatrix::from_fn(6, 1, |i, _| (5.0 * x[(i, 0)]).sin());
    (x, y)
}

#[test]
fn dreamed_experiment_starts_from_the_observations() {
    let (x, y) = observations();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let experiment =
        dreamed_experiment(&x, &y, domain, "mll", &PointsPerDim::Uniform(12), 5).unwrap();
    assert_eq!(experiment.data().x(), Some(&x));
    assert_eq!(experiment.data().y(), Some(&y));
    assert_eq!(experiment.truth_function().name(), "dreamed");

    let optima = &experiment.metadata()["optima"];
    let argmax = optima["x"].as_array().unwrap();
    assert_eq!(argmax.len(), 1);
    let location = argmax[0].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&location));

    let grid = DMatrix::from_fn(21, 1, |i, _| i as f64 / 20.0);
    let values = experiment.truth(&grid).unwrap();
    let best = optima["value"].as_f64().unwrap();
    assert!(values.iter().all(|v| *v <= best + 1e-3));
}

#[test]
fn dreams_follow_the_seed() {
    let (x, y) = observations();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let ppd = PointsPerDim::Uniform(10);
    let a = dreamed_experiment(&x, &y, domain.clone(), "mll", &ppd, 1).unwrap();
    let b = dreamed_experiment(&x, &y, domain, "mll", &ppd, 1).unwrap();
    let probe = DMatrix::from_row_slice(2, 1, &[0.3, 0.7]);
    assert_eq!(a.truth(&probe).unwrap(), b.truth(&probe).unwrap());
    assert_eq!(a.metadata(), b.metadata());
}

#[test]
fn unknown_train_protocol_is_rejected() {
    let (x, y) = observations();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let err = dreamed_experiment(&x, &y, domain, "sgd", &PointsPerDim::Uniform(5), 0).unwrap_err();
    assert_eq!(err.code(), "unknown-train-protocol");
}

#[test]
fn dreamed_experiment_needs_one_output() {
    let (x, _) = observations();
    let y = DMatrix::zeros(6, 2);
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let err = dreamed_experiment(&x, &y, domain, "mll", &PointsPerDim::Uniform(5), 0).unwrap_err();
    assert_eq!(err.code(), "dream-output-width");
}
