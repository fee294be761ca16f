use std::sync::Arc;

use nalgebra::DMatrix;
use sva_core::{Domain, SvaError};
use sva_exp::{
    select_target, Experiment, ExperimentProperties, LinearTruth, LoopConfig, LoopHooks,
    Modality, MultiFidelitySinusoid, NegatedSphereTruth, Scalarizer,
};
use sva_models::{AcquisitionFamily, OptimizerSettings};

fn quick_config(budget: usize) -> LoopConfig {
    let mut config = LoopConfig::with_budget(budget);
    config.optimizer = OptimizerSettings {
        q: 1,
        num_restarts: 4,
        raw_samples: 32,
    };
    config.progress = false;
    config
}

fn unit_properties(n_input_dim: usize, n_output_dim: usize) -> Arc<ExperimentProperties> {
    let domain = Domain::uniform(n_input_dim, 0.0, 1.0).unwrap();
    Arc::new(ExperimentProperties::new(n_input_dim, n_output_dim, Some(domain.clone()), domain).unwrap())
}

fn linear_experiment(seed: u64) -> Experiment {
    let mut experiment =
        Experiment::new(unit_properties(1, 1), Arc::new(LinearTruth::new(vec![1.0], 0.0)));
    experiment.initialize_data(5, seed, "random").unwrap();
    experiment
}

fn multi_modal_experiment() -> Experiment {
    let mut experiment = Experiment::new(
        unit_properties(1, 1),
        Arc::new(MultiFidelitySinusoid::new(1, 2, 4.0)),
    )
    .with_modality(Modality::multi(2).unwrap())
    .unwrap();
    experiment.initialize_data_at(4, 0, 1, "random").unwrap();
    experiment.initialize_data_at(4, 1, 2, "random").unwrap();
    experiment
}

#[test]
fn single_iteration_appends_one_point_and_one_record() {
    let mut experiment = linear_experiment(0);
    let summary = experiment
        .run_gp_experiment_default(&LoopConfig::with_budget(1), &LoopHooks::default())
        .unwrap();

    assert_eq!(experiment.data().x().unwrap().nrows(), 6);
    assert_eq!(experiment.data().y().unwrap().nrows(), 6);
    assert_eq!(experiment.history().len(), 1);
    let record = &experiment.history().records()[0];
    assert_eq!(record.iteration, 0);
    assert_eq!(record.n_observations, 5);
    assert_eq!(record.next_points.shape(), (1, 1));
    assert_eq!(record.acquisition_function.family, AcquisitionFamily::Ucb);
    assert_eq!(summary.first_iteration, 0);
    assert_eq!(summary.last_iteration, Some(0));
    assert_eq!(summary.iterations_run, 1);
    assert_eq!(summary.n_observations, 6);
}

#[test]
fn invocations_continue_the_iteration_count() {
    let mut experiment = linear_experiment(3);
    let hooks = LoopHooks::default();
    let first = experiment.run_gp_experiment_default(&quick_config(3), &hooks).unwrap();
    let second = experiment.run_gp_experiment_default(&quick_config(3), &hooks).unwrap();

    assert_eq!(first.first_iteration, 0);
    assert_eq!(second.first_iteration, 3);
    assert_eq!(second.last_iteration, Some(5));
    let iterations: Vec<usize> = experiment
        .history()
        .records()
        .iter()
        .map(|record| record.iteration)
        .collect();
    assert_eq!(iterations, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(experiment.data().n(), 11);
}

#[test]
fn loop_is_reproducible_for_a_seed() {
    let mut a = linear_experiment(8);
    let mut b = linear_experiment(8);
    let hooks = LoopHooks::default();
    a.run_gp_experiment_default(&quick_config(2), &hooks).unwrap();
    b.run_gp_experiment_default(&quick_config(2), &hooks).unwrap();
    assert_eq!(a.data(), b.data());
    assert_eq!(a.history(), b.history());
}

#[test]
fn batch_acquisition_spends_the_budget_in_points() {
    let mut experiment = linear_experiment(1);
    let mut config = quick_config(3);
    config.acquisition.family = AcquisitionFamily::QUcb;
    config.optimizer.q = 2;
    let summary = experiment
        .run_gp_experiment_default(&config, &LoopHooks::default())
        .unwrap();
    assert_eq!(summary.iterations_run, 2);
    assert_eq!(summary.points_acquired, 4);
    assert_eq!(experiment.data().n(), 9);
    assert_eq!(experiment.history().records()[0].next_points.nrows(), 2);
}

#[test]
fn expected_improvement_uses_the_best_observed_target() {
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let properties = Arc::new(ExperimentProperties::new(1, 1, None, domain).unwrap());
    let mut experiment =
        Experiment::new(properties, Arc::new(NegatedSphereTruth::new(vec![0.4])));
    experiment.initialize_data(6, 2, "random").unwrap();
    let best = experiment
        .data()
        .y()
        .unwrap()
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);

    let mut config = quick_config(1);
    config.acquisition.family = AcquisitionFamily::Ei;
    experiment
        .run_gp_experiment_default(&config, &LoopHooks::default())
        .unwrap();
    let record = &experiment.history().records()[0];
    assert_eq!(record.acquisition_function.hyperparameters["best_f"], best);
}

#[test]
fn identity_scalarization_reproduces_outputs() {
    let experiment = multi_modal_experiment();
    let x = experiment.data().x().unwrap();
    let y = experiment.data().y().unwrap();
    let identity: &Scalarizer = &|_, y| Ok(y.column(0).iter().copied().collect());
    let targets = select_target(x, y, Some(1), 2, Some(identity)).unwrap();
    let expected: Vec<Option<f64>> = y.column(0).iter().map(|v| Some(*v)).collect();
    assert_eq!(targets, expected);
}

#[test]
fn rows_of_unknown_modalities_have_no_target() {
    let x = DMatrix::from_row_slice(3, 2, &[0.1, 0.0, 0.2, 5.0, 0.3, 1.0]);
    let y = DMatrix::from_row_slice(3, 1, &[1.0, 2.0, 3.0]);
    let identity: &Scalarizer = &|_, y| Ok(y.column(0).iter().copied().collect());
    let targets = select_target(&x, &y, Some(1), 2, Some(identity)).unwrap();
    assert_eq!(targets, vec![Some(1.0), None, Some(3.0)]);
}

#[test]
fn scalarization_must_return_one_value_per_row() {
    let x = DMatrix::from_row_slice(2, 1, &[0.1, 0.2]);
    let y = DMatrix::from_row_slice(2, 1, &[1.0, 2.0]);
    let short: &Scalarizer = &|_, _| Ok(vec![1.0]);
    let err = select_target(&x, &y, None, 1, Some(short)).unwrap_err();
    assert!(matches!(err, SvaError::Shape(_)));
    assert_eq!(err.code(), "scalarization-length");
}

#[test]
fn multi_modal_loop_appends_the_selected_modality() {
    let mut experiment = multi_modal_experiment();
    let hooks = LoopHooks::default()
        .with_modality(|ii| ii % 2)
        .with_scalarizer(|_, y| Ok(y.column(0).iter().copied().collect()));
    experiment.run_gp_experiment_default(&quick_config(2), &hooks).unwrap();

    let records = experiment.history().records();
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.next_points.ncols(), 2);
        assert_eq!(record.next_points[(0, 1)], record.modality as f64);
        assert_eq!(record.acquisition_function.weights.len(), 2);
    }
    assert_eq!(records[0].modality, 0);
    assert_eq!(records[1].modality, 1);
    assert_eq!(experiment.data().n(), 10);
}

#[test]
fn multi_output_data_needs_scalarization() {
    #[derive(Debug)]
    struct Pair;
    impl sva_exp::Truth for Pair {
        fn name(&self) -> &str {
            "pair"
        }
        fn params(&self) -> Result<serde_json::Value, SvaError> {
            Ok(serde_json::Value::Null)
        }
        fn evaluate(&self, x: &DMatrix<f64>) -> Result<DMatrix<f64>, SvaError> {
            Ok(DMatrix::from_fn(x.nrows(), 2, |i, _| x[(i, 0)]))
        }
    }

    let mut experiment = Experiment::new(unit_properties(1, 2), Arc::new(Pair));
    experiment.initialize_data(4, 0, "random").unwrap();
    let err = experiment
        .run_gp_experiment_default(&quick_config(1), &LoopHooks::default())
        .unwrap_err();
    assert!(matches!(err, SvaError::Config(_)));
    assert_eq!(err.code(), "multi-output-target");
    assert!(experiment.history().is_empty());

    let hooks = LoopHooks::default().with_scalarizer(|_, y| {
        Ok(y.row_iter().map(|row| row.iter().sum::<f64>()).collect())
    });
    experiment.run_gp_experiment_default(&quick_config(1), &hooks).unwrap();
    assert_eq!(experiment.history().len(), 1);
}

#[test]
fn loop_requires_initialized_data() {
    let mut experiment =
        Experiment::new(unit_properties(1, 1), Arc::new(LinearTruth::new(vec![1.0], 0.0)));
    let err = experiment
        .run_gp_experiment_default(&quick_config(1), &LoopHooks::default())
        .unwrap_err();
    assert!(matches!(err, SvaError::Precondition(_)));
    assert_eq!(err.code(), "uninitialized-data");

    experiment
        .data_mut()
        .update_x(&DMatrix::from_row_slice(2, 1, &[0.1, 0.2]))
        .unwrap();
    let err = experiment
        .run_gp_experiment_default(&quick_config(1), &LoopHooks::default())
        .unwrap_err();
    assert_eq!(err.code(), "pending-outputs");
}

#[test]
fn modality_hook_out_of_range_is_a_config_error() {
    let mut experiment = linear_experiment(4);
    let hooks = LoopHooks::default().with_modality(|_| 1);
    let err = experiment
        .run_gp_experiment_default(&quick_config(1), &hooks)
        .unwrap_err();
    assert!(matches!(err, SvaError::Config(_)));
    assert_eq!(err.code(), "modality-out-of-range");
    assert_eq!(experiment.data().n(), 5);
}

#[test]
fn loop_config_fills_defaults() {
    let config: LoopConfig = serde_json::from_str(r#"{ "budget": 4 }"#).unwrap();
    assert_eq!(config, LoopConfig::with_budget(4));
    assert_eq!(config.acquisition.family, AcquisitionFamily::Ucb);
    assert_eq!(config.acquisition.hyperparameters["beta"], 10.0);
    assert_eq!(config.optimizer, OptimizerSettings::default());
    assert!(config.progress);
    assert!(config.task_feature.is_none());
}

#[test]
fn domain_violation_aborts_the_loop_without_partial_commits() {
    let valid = Domain::uniform(1, 0.0, 0.5).unwrap();
    let experimental = Domain::uniform(1, 0.0, 1.0).unwrap();
    let properties =
        Arc::new(ExperimentProperties::new(1, 1, Some(valid), experimental).unwrap());
    let mut experiment = Experiment::new(properties, Arc::new(LinearTruth::new(vec![1.0], 0.0)));
    experiment
        .update_data(&DMatrix::from_column_slice(5, 1, &[0.05, 0.15, 0.25, 0.35, 0.45]))
        .unwrap();
    let before = experiment.data().clone();

    // Exploration weight large enough that the proposal lands far from the data.
    let mut config = quick_config(3);
    config
        .acquisition
        .hyperparameters
        .insert(sva_models::BETA.to_string(), 100.0);
    let err = experiment
        .run_gp_experiment_default(&config, &LoopHooks::default())
        .unwrap_err();

    assert!(matches!(err, SvaError::Domain(_)), "unexpected error: {err}");
    assert_eq!(err.code(), "outside-valid-domain");
    assert_eq!(experiment.data().n(), 5);
    assert_eq!(experiment.data(), &before);
    assert!(experiment.history().is_empty());
}
