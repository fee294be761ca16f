use std::sync::Arc;

use nalgebra::DMatrix;
use serde_json::{json, Value};
use sva_core::{Domain, SvaError};
use sva_exp::{
    Experiment, ExperimentProperties, LinearTruth, Modality, MultiFidelitySinusoid,
    NegatedSphereTruth, NoiseModel, PointsPerDim, Truth,
};

#[derive(Debug)]
struct TwoOutputs;

impl Truth for TwoOutputs {
    fn name(&self) -> &str {
        "two-outputs"
    }

    fn params(&self) -> Result<Value, SvaError> {
        Ok(json!({}))
    }

    fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
        Ok(DMatrix::from_fn(x.nrows(), 2, |i, j| x[(i, 0)] + j as f64))
    }
}

fn unit_properties(n_input_dim: usize, n_output_dim: usize) -> Arc<ExperimentProperties> {
    let domain = Domain::uniform(n_input_dim, 0.0, 1.0).unwrap();
    Arc::new(ExperimentProperties::new(n_input_dim, n_output_dim, Some(domain.clone()), domain).unwrap())
}

fn linear_experiment() -> Experiment {
    Experiment::new(unit_properties(1, 1), Arc::new(LinearTruth::new(vec![2.0], 1.0)))
}

fn column(values: &[f64]) -> DMatrix<f64> {
    DMatrix::from_column_slice(values.len(), 1, values)
}

#[test]
fn properties_reject_mismatched_domains() {
    let err = ExperimentProperties::new(2, 1, None, Domain::uniform(1, 0.0, 1.0).unwrap())
        .unwrap_err();
    assert_eq!(err.code(), "domain-width");
    assert!(matches!(err, SvaError::Config(_)));

    let err = Domain::new(vec![1.0], vec![0.0]).unwrap_err();
    assert_eq!(err.code(), "domain-bounds");
}

#[test]
fn extent_is_defined_for_two_dimensional_inputs() {
    let domain = Domain::new(vec![0.0, -1.0], vec![2.0, 1.0]).unwrap();
    let properties = ExperimentProperties::new(2, 1, None, domain).unwrap();
    assert_eq!(properties.experimental_domain_extent().unwrap(), [0.0, 2.0, -1.0, 1.0]);

    let err = unit_properties(1, 1).experimental_domain_extent().unwrap_err();
    assert_eq!(err.code(), "extent-dimension");
}

#[test]
fn truth_accepts_inputs_on_the_boundary() {
    let experiment = linear_experiment();
    let y = experiment.truth(&column(&[0.0, 0.5, 1.0])).unwrap();
    assert_eq!(y.as_slice(), &[1.0, 2.0, 3.0]);
}

#[test]
fn truth_rejects_inputs_outside_the_valid_domain() {
    let experiment = linear_experiment();
    let err = experiment.truth(&column(&[0.5, 1.5])).unwrap_err();
    assert!(matches!(err, SvaError::Domain(_)));
    assert_eq!(err.code(), "outside-valid-domain");

    let err = experiment.truth(&column(&[f64::NAN])).unwrap_err();
    assert!(matches!(err, SvaError::Domain(_)));
}

#[test]
fn truth_rejects_wrong_input_width() {
    let experiment = linear_experiment();
    let err = experiment.truth(&DMatrix::zeros(2, 2)).unwrap_err();
    assert!(matches!(err, SvaError::Shape(_)));
    assert_eq!(err.code(), "input-width");
}

#[test]
fn derivative_is_flattened_jacobian() {
    let domain = Domain::uniform(2, -1.0, 1.0).unwrap();
    let properties = Arc::new(ExperimentProperties::new(2, 1, None, domain).unwrap());
    let experiment = Experiment::new(properties, Arc::new(NegatedSphereTruth::new(vec![0.0, 0.5])));
    let x = DMatrix::from_row_slice(1, 2, &[1.0, 0.0]);
    let jacobian = experiment.dtruth(&x).unwrap();
    assert_eq!(jacobian.shape(), (1, 2));
    assert_eq!(jacobian[(0, 0)], -2.0);
    assert_eq!(jacobian[(0, 1)], 1.0);
}

#[test]
fn derivative_unsupported_is_a_config_error() {
    let properties = unit_properties(1, 1);
    let experiment = Experiment::new(properties, Arc::new(MultiFidelitySinusoid::new(1, 2, 3.0)))
        .with_modality(Modality::multi(2).unwrap())
        .unwrap();
    let err = experiment
        .dtruth(&DMatrix::from_row_slice(1, 2, &[0.5, 1.0]))
        .unwrap_err();
    assert!(matches!(err, SvaError::Config(_)));
    assert_eq!(err.code(), "derivative-unsupported");
}

#[test]
fn noise_free_observation_is_bit_identical() {
    let experiment = linear_experiment();
    let x = column(&[0.1, 0.2, 0.3]);
    assert_eq!(experiment.observe(&x, 9).unwrap(), experiment.truth(&x).unwrap());
}

#[test]
fn scalar_noise_follows_the_seed() {
    let experiment = linear_experiment().with_noise(NoiseModel::Scalar(0.1)).unwrap();
    let x = DMatrix::from_element(2000, 1, 0.25);
    let a = experiment.observe(&x, 1).unwrap();
    let b = experiment.observe(&x, 1).unwrap();
    let c = experiment.observe(&x, 2).unwrap();
    assert_eq!(a, b);
    assert_ne!(a, c);

    let truth = 1.5;
    let mean_a = a.iter().sum::<f64>() / 2000.0;
    let mean_c = c.iter().sum::<f64>() / 2000.0;
    assert!((mean_a - truth).abs() < 0.01);
    assert!((mean_c - truth).abs() < 0.01);
}

#[test]
fn per_output_noise_scales_each_column() {
    let experiment = Experiment::new(unit_properties(1, 2), Arc::new(TwoOutputs))
        .with_noise(NoiseModel::PerOutput(vec![0.0, 0.5]))
        .unwrap();
    let x = DMatrix::from_element(50, 1, 0.5);
    let noisy = experiment.observe(&x, 4).unwrap();
    let clean = experiment.truth(&x).unwrap();
    assert_eq!(noisy.column(0), clean.column(0));
    assert_ne!(noisy.column(1), clean.column(1));

    let err = Experiment::new(unit_properties(1, 2), Arc::new(TwoOutputs))
        .with_noise(NoiseModel::PerOutput(vec![0.1]))
        .unwrap_err();
    assert_eq!(err.code(), "noise-length");
}

#[test]
fn invalid_noise_scales_are_config_errors() {
    let err = linear_experiment()
        .with_noise(NoiseModel::Scalar(-1.0))
        .unwrap_err();
    assert!(matches!(err, SvaError::Config(_)));
    assert_eq!(err.code(), "noise-scale");
}

#[test]
fn callable_noise_broadcasts_single_column() {
    let experiment = Experiment::new(unit_properties(1, 2), Arc::new(TwoOutputs))
        .with_noise(NoiseModel::callable(|x| Ok(DMatrix::from_element(x.nrows(), 1, 0.0))))
        .unwrap();
    let x = column(&[0.2, 0.4]);
    assert_eq!(experiment.observe(&x, 0).unwrap(), experiment.truth(&x).unwrap());

    let bad = Experiment::new(unit_properties(1, 2), Arc::new(TwoOutputs))
        .with_noise(NoiseModel::callable(|x| Ok(DMatrix::from_element(x.nrows(), 3, 0.1))))
        .unwrap();
    assert_eq!(bad.observe(&x, 0).unwrap_err().code(), "noise-shape");
}

#[test]
fn update_data_keeps_rows_aligned() {
    let mut experiment = linear_experiment().with_noise(NoiseModel::Scalar(0.05)).unwrap();
    experiment.update_data(&column(&[0.1, 0.2])).unwrap();
    experiment.update_data(&column(&[0.3])).unwrap();
    assert_eq!(experiment.data().n(), 3);
    assert_eq!(experiment.data().y().unwrap().nrows(), 3);

    let err = experiment.update_data(&column(&[0.4, 2.0])).unwrap_err();
    assert_eq!(err.code(), "outside-valid-domain");
    assert_eq!(experiment.data().n(), 3);
    assert_eq!(experiment.data().y().unwrap().nrows(), 3);
}

#[test]
fn update_data_fills_outputs_of_pending_inputs() {
    let mut experiment = linear_experiment();
    experiment.data_mut().update_x(&column(&[0.1, 0.2])).unwrap();
    assert_eq!(experiment.data().pending(), 2);

    let err = experiment.update_data(&column(&[1.5])).unwrap_err();
    assert_eq!(err.code(), "outside-valid-domain");
    assert_eq!(experiment.data().n(), 2);
    assert!(experiment.data().y().is_none());

    experiment.update_data(&column(&[0.3])).unwrap();
    assert_eq!(experiment.data().n(), 3);
    assert_eq!(experiment.data().pending(), 0);
    let expected = experiment.truth(&column(&[0.1, 0.2, 0.3])).unwrap();
    assert_eq!(experiment.data().y().unwrap(), &expected);
}

#[test]
fn update_data_noise_depends_on_stored_rows() {
    let make = || {
        linear_experiment()
            .with_noise(NoiseModel::Scalar(0.1))
            .unwrap()
            .with_noise_seed(11)
    };
    let mut a = make();
    let mut b = make();
    a.update_data(&column(&[0.5])).unwrap();
    b.update_data(&column(&[0.5])).unwrap();
    assert_eq!(a.data(), b.data());

    a.update_data(&column(&[0.5])).unwrap();
    let y = a.data().y().unwrap();
    assert_ne!(y[(0, 0)], y[(1, 0)]);
}

#[test]
fn random_coordinates_are_seeded_and_bounded() {
    let domain = Domain::new(vec![-2.0, 10.0], vec![2.0, 11.0]).unwrap();
    let properties = Arc::new(ExperimentProperties::new(2, 1, None, domain.clone()).unwrap());
    let experiment = Experiment::new(properties, Arc::new(LinearTruth::new(vec![1.0, 1.0], 0.0)));
    let a = experiment.get_random_coordinates(20, 5).unwrap();
    let b = experiment.get_random_coordinates(20, 5).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.shape(), (20, 2));
    assert!(domain.first_violation(&a).is_none());
    assert_ne!(a, experiment.get_random_coordinates(20, 6).unwrap());
}

#[test]
fn dense_coordinates_vary_first_dimension_slowest() {
    let domain = Domain::new(vec![0.0, 0.0], vec![1.0, 2.0]).unwrap();
    let properties = Arc::new(ExperimentProperties::new(2, 1, None, domain).unwrap());
    let experiment = Experiment::new(properties, Arc::new(LinearTruth::new(vec![1.0, 1.0], 0.0)));

    let grid = experiment.get_dense_coordinates(&PointsPerDim::Uniform(3)).unwrap();
    assert_eq!(grid.shape(), (9, 2));
    assert_eq!(grid.row(0).iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0]);
    assert_eq!(grid.row(1).iter().copied().collect::<Vec<_>>(), vec![0.0, 1.0]);
    assert_eq!(grid.row(3).iter().copied().collect::<Vec<_>>(), vec![0.5, 0.0]);
    assert_eq!(grid.row(8).iter().copied().collect::<Vec<_>>(), vec![1.0, 2.0]);

    let per_dim = experiment
        .get_dense_coordinates(&PointsPerDim::PerDim(vec![2, 3]))
        .unwrap();
    assert_eq!(per_dim.shape(), (6, 2));

    let err = experiment
        .get_dense_coordinates(&PointsPerDim::PerDim(vec![2]))
        .unwrap_err();
    assert_eq!(err.code(), "ppd-length");
}

#[test]
fn initialize_data_rejects_unknown_protocols() {
    let mut experiment = linear_experiment();
    let err = experiment.initialize_data(4, 0, "sobol").unwrap_err();
    assert!(matches!(err, SvaError::Config(_)));
    assert!(!experiment.data().is_initialized());

    experiment.initialize_data(4, 0, "random").unwrap();
    assert_eq!(experiment.data().n(), 4);
    assert_eq!(experiment.data().pending(), 0);
}

#[test]
fn multi_modal_inputs_carry_a_modality_column() {
    let mut experiment = Experiment::new(unit_properties(1, 1), Arc::new(MultiFidelitySinusoid::new(1, 2, 3.0)))
        .with_modality(Modality::multi(2).unwrap())
        .unwrap();

    let err = experiment.truth(&column(&[0.5])).unwrap_err();
    assert_eq!(err.code(), "input-width");

    // modality values are never range checked by validation
    experiment
        .validate_input(&DMatrix::from_row_slice(1, 2, &[0.5, 7.0]))
        .unwrap();

    let points = experiment.get_random_coordinates_at(3, 1, 1).unwrap();
    assert_eq!(points.ncols(), 2);
    assert!(points.column(1).iter().all(|m| *m == 1.0));
    let grid = experiment.get_dense_coordinates(&PointsPerDim::Uniform(4)).unwrap();
    assert!(grid.column(1).iter().all(|m| *m == 0.0));

    experiment.initialize_data_at(3, 1, 2, "random").unwrap();
    let x = experiment.data().x().unwrap();
    assert_eq!(x.shape(), (3, 2));
    assert!(x.column(1).iter().all(|m| *m == 1.0));

    let err = experiment.get_random_coordinates_at(1, 0, 2).unwrap_err();
    assert_eq!(err.code(), "modality-out-of-range");
}

#[test]
fn single_modality_ignores_the_modality_argument() {
    let experiment = linear_experiment();
    let points = experiment.get_random_coordinates_at(2, 0, 3).unwrap();
    assert_eq!(points.ncols(), 1);
}
