use std::collections::BTreeMap;

use nalgebra::DMatrix;
use sva_core::Domain;
use sva_models::{
    AcquisitionFamily, AcquisitionService, AskRequest, GaussianProcess, OptimizeAcqf,
    OptimizerSettings, PosteriorTransform, TaskSpec, TrainProtocol, BEST_F, BETA,
};

fn model() -> GaussianProcess {
    let x = DMatrix::<f64>::from_row_slice(5, 1, &[0.05, 0.3, 0.5, 0.7, 0.95]);
    let y: Vec<f64> = (0..5).map(|i| (4.0 * x[(i, 0)]).sin()).collect();
    GaussianProcess::fit(&x, &y, None, &TrainProtocol::Mll).unwrap()
}

fn hyper(name: &str, value: f64) -> BTreeMap<String, f64> {
    [(name.to_string(), value)].into_iter().collect()
}

fn settings(q: usize) -> OptimizerSettings {
    OptimizerSettings {
        q,
        num_restarts: 4,
        raw_samples: 32,
    }
}

#[test]
fn ucb_proposes_one_point_inside_bounds() {
    let model = model();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let hyperparameters = hyper(BETA, 10.0);
    let transform = PosteriorTransform::single();
    let settings = settings(1);
    let request = AskRequest {
        family: AcquisitionFamily::Ucb,
        hyperparameters: &hyperparameters,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 7,
    };
    let outcome = OptimizeAcqf.ask(&model, &request).unwrap();
    assert_eq!(outcome.next_points.shape(), (1, 1));
    let point = outcome.next_points[(0, 0)];
    assert!((0.0..=1.0).contains(&point));
    assert!(outcome.value.is_finite());
    assert_eq!(outcome.acquisition_function.family, AcquisitionFamily::Ucb);
    assert_eq!(outcome.acquisition_function.weights, vec![1.0]);
    assert_eq!(outcome.acquisition_function.q, 1);

    let again = OptimizeAcqf.ask(&model, &request).unwrap();
    assert_eq!(again, outcome);
}

#[test]
fn batch_ucb_spreads_points() {
    let model = model();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let hyperparameters = hyper(BETA, 10.0);
    let transform = PosteriorTransform::single();
    let settings = settings(3);
    let request = AskRequest {
        family: AcquisitionFamily::QUcb,
        hyperparameters: &hyperparameters,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 1,
    };
    let outcome = OptimizeAcqf.ask(&model, &request).unwrap();
    assert_eq!(outcome.next_points.shape(), (3, 1));
    let first = outcome.next_points[(0, 0)];
    assert_ne!(first, outcome.next_points[(1, 0)]);
    assert_ne!(first, outcome.next_points[(2, 0)]);
}

#[test]
fn analytic_family_rejects_batches() {
    let model = model();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let hyperparameters = hyper(BETA, 10.0);
    let transform = PosteriorTransform::single();
    let settings = settings(2);
    let request = AskRequest {
        family: AcquisitionFamily::Ucb,
        hyperparameters: &hyperparameters,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 1,
    };
    let err = OptimizeAcqf.ask(&model, &request).unwrap_err();
    assert_eq!(err.code(), "batch-requires-q-family");
}

#[test]
fn expected_improvement_needs_an_incumbent() {
    let model = model();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let transform = PosteriorTransform::single();
    let settings = settings(1);
    let missing = hyper(BETA, 10.0);
    let request = AskRequest {
        family: AcquisitionFamily::Ei,
        hyperparameters: &missing,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 1,
    };
    let err = OptimizeAcqf.ask(&model, &request).unwrap_err();
    assert_eq!(err.code(), "missing-hyperparameter");

    let present = hyper(BEST_F, 0.9);
    let request = AskRequest {
        hyperparameters: &present,
        ..request
    };
    let outcome = OptimizeAcqf.ask(&model, &request).unwrap();
    assert!(outcome.value >= 0.0);
    assert_eq!(outcome.acquisition_function.hyperparameters, present);
}

#[test]
fn multi_task_ask_uses_the_transform() {
    let x = DMatrix::from_fn(8, 2, |i, j| {
        if j == 0 {
            (i / 2) as f64 / 3.0
        } else {
            (i % 2) as f64
        }
    });
    let y: Vec<f64> = (0..8).map(|i| x[(i, 0)] - x[(i, 1)]).collect();
    let task = Some(TaskSpec {
        column: 1,
        n_tasks: 2,
    });
    let model = GaussianProcess::fit(&x, &y, task, &TrainProtocol::Mll).unwrap();
    let domain = Domain::uniform(1, 0.0, 1.0).unwrap();
    let hyperparameters = hyper(BETA, 1.0);
    let settings = settings(1);
    let transform = PosteriorTransform::one_hot(2, 1).unwrap();
    let request = AskRequest {
        family: AcquisitionFamily::Ucb,
        hyperparameters: &hyperparameters,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 5,
    };
    let outcome = OptimizeAcqf.ask(&model, &request).unwrap();
    assert_eq!(outcome.next_points.shape(), (1, 1));
    assert_eq!(outcome.acquisition_function.weights, vec![0.0, 1.0]);

    let wrong = PosteriorTransform::single();
    let request = AskRequest {
        transform: &wrong,
        ..request
    };
    let err = OptimizeAcqf.ask(&model, &request).unwrap_err();
    assert_eq!(err.code(), "transform-length");
}

#[test]
fn bounds_must_match_model_features() {
    let model = model();
    let domain = Domain::uniform(2, 0.0, 1.0).unwrap();
    let hyperparameters = hyper(BETA, 10.0);
    let transform = PosteriorTransform::single();
    let settings = settings(1);
    let request = AskRequest {
        family: AcquisitionFamily::Ucb,
        hyperparameters: &hyperparameters,
        transform: &transform,
        bounds: &domain,
        settings: &settings,
        seed: 1,
    };
    let err = OptimizeAcqf.ask(&model, &request).unwrap_err();
    assert_eq!(err.code(), "bounds-width");
}

#[test]
fn family_names_round_trip_through_strings() {
    for name in ["UCB", "EI", "qUCB", "qEI"] {
        let family: AcquisitionFamily = name.parse().unwrap();
        assert_eq!(family.to_string(), name);
    }
    assert_eq!("PI".parse::<AcquisitionFamily>().unwrap_err().code(), "unknown-acquisition");
}
