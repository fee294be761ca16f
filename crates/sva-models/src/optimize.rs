//! Seeded multi-start maximization over box domains.

use rand::Rng;
use sva_core::{Domain, ErrorInfo, RngHandle, SvaError};

const MAX_PATTERN_STEPS: usize = 60;
const INITIAL_STEP: f64 = 0.25;
const MIN_STEP: f64 = 1e-6;

/// Maximizes `objective` over `domain`.
///
/// `raw_samples` uniform points are scored, the best `num_restarts` of them
/// seed a compass pattern search whose step halves whenever no axis move
/// improves. Non-finite scores rank below every finite score. Returns the
/// best point and its score.
pub fn maximize<F>(
    mut objective: F,
    domain: &Domain,
    num_restarts: usize,
    raw_samples: usize,
    rng: &mut RngHandle,
) -> Result<(Vec<f64>, f64), SvaError>
where
    F: FnMut(&[f64]) -> Result<f64, SvaError>,
{
    if num_restarts == 0 || raw_samples == 0 {
        return Err(SvaError::Config(
            ErrorInfo::new("optimizer-settings", "restarts and raw samples must be positive")
                .with_context("num_restarts", num_restarts)
                .with_context("raw_samples", raw_samples),
        ));
    }
    let dim = domain.dim();
    let mut candidates = Vec::with_capacity(raw_samples);
    for _ in 0..raw_samples {
        let point: Vec<f64> = (0..dim)
            .map(|j| domain.lower()[j] + rng.gen::<f64>() * domain.span(j))
            .collect();
        let score = rank_score(objective(&point)?);
        candidates.push((point, score));
    }
    candidates.sort_by(|a, b| b.1.total_cmp(&a.1));
    candidates.truncate(num_restarts);

    let mut best: Option<(Vec<f64>, f64)> = None;
    for (start, score) in candidates {
        let (point, value) = pattern_search(&mut objective, domain, start, score)?;
        if best.as_ref().map_or(true, |(_, b)| value > *b) {
            best = Some((point, value));
        }
    }
    best.ok_or_else(|| {
        SvaError::Acquisition(ErrorInfo::new("optimizer-empty", "no candidate was evaluated"))
    })
}

fn pattern_search<F>(
    objective: &mut F,
    domain: &Domain,
    mut point: Vec<f64>,
    mut value: f64,
) -> Result<(Vec<f64>, f64), SvaError>
where
    F: FnMut(&[f64]) -> Result<f64, SvaError>,
{
    let mut steps: Vec<f64> = (0..domain.dim())
        .map(|j| INITIAL_STEP * domain.span(j))
        .collect();
    for _ in 0..MAX_PATTERN_STEPS {
        let mut improved = false;
        for j in 0..domain.dim() {
            if steps[j] <= MIN_STEP * domain.span(j) {
                continue;
            }
            for direction in [1.0, -1.0] {
                let mut trial = point.clone();
                trial[j] = domain.clamp(j, trial[j] + direction * steps[j]);
                if trial[j] == point[j] {
                    continue;
                }
                let score = rank_score(objective(&trial)?);
                if score > value {
                    point = trial;
                    value = score;
                    improved = true;
                    break;
                }
            }
        }
        if !improved {
            let mut active = false;
            for (j, step) in steps.iter_mut().enumerate() {
                *step *= 0.5;
                active |= *step > MIN_STEP * domain.span(j);
            }
            if !active {
                break;
            }
        }
    }
    Ok((point, value))
}

fn rank_score(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::NEG_INFINITY
    }
}
