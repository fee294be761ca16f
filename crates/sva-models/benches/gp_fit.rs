use criterion::{black_box, criterion_group, criterion_main, Criterion};
use nalgebra::DMatrix;
use sva_models::{GaussianProcess, TaskSpec, TrainProtocol};

fn training_set(n: usize) -> (DMatrix<f64>, Vec<f64>) {
    let x = DMatrix::from_fn(n, 2, |i, j| ((i * 7 + j * 3) % n) as f64 / n as f64);
    let y = (0..n)
        .map(|i| (6.0 * x[(i, 0)]).sin() + x[(i, 1)] * x[(i, 1)])
        .collect();
    (x, y)
}

fn multi_task_set(n: usize) -> (DMatrix<f64>, Vec<f64>) {
    let x = DMatrix::from_fn(n, 2, |i, j| {
        if j == 1 {
            (i % 2) as f64
        } else {
            i as f64 / n as f64
        }
    });
    let y = (0..n)
        .map(|i| (6.0 * x[(i, 0)]).sin() - 0.3 * x[(i, 1)])
        .collect();
    (x, y)
}

fn bench_gp_fit(c: &mut Criterion) {
    let (x, y) = training_set(32);
    c.bench_function("gp_fit_mll_32", |b| {
        b.iter(|| {
            let model = GaussianProcess::fit(black_box(&x), black_box(&y), None, &TrainProtocol::Mll)
                .expect("fit");
            black_box(model.log_marginal_likelihood());
        })
    });

    let (x, y) = multi_task_set(24);
    let task = Some(TaskSpec {
        column: 1,
        n_tasks: 2,
    });
    c.bench_function("gp_fit_multi_task_24", |b| {
        b.iter(|| {
            let model = GaussianProcess::fit(black_box(&x), black_box(&y), task, &TrainProtocol::Mll)
                .expect("fit");
            black_box(model.n_train());
        })
    });
}

criterion_group!(benches, bench_gp_fit);
criterion_main!(benches);
