//! Generalized pattern search (compass search) over a bounded box.
//!
//! Works in coordinates scaled to the unit box so that one mesh size applies
//! to parameters with different units. Polls the ±coordinate directions in a
//! seeded random order and moves to the first improving point.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// A scalar objective to be minimized.
pub trait ScalarObjective {
    fn evaluate(&self, params: &[f64]) -> f64;
}

/// Pattern search settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternSearchConfig {
    /// Initial mesh size as a fraction of each parameter's bound width.
    pub initial_mesh: f64,
    /// Stop once the mesh size falls below this fraction.
    pub mesh_tolerance: f64,
    /// Mesh multiplier after a successful poll.
    pub expansion: f64,
    /// Mesh multiplier after an unsuccessful poll.
    pub contraction: f64,
    /// Stop once the objective is at or below this value.
    pub objective_tolerance: f64,
    /// Maximum objective evaluations.
    pub max_evals: usize,
    /// Seed for the poll order.
    pub seed: u64,
}

impl Default for PatternSearchConfig {
    fn default() -> Self {
        Self {
            initial_mesh: 0.125,
            mesh_tolerance: 1e-4,
            expansion: 2.0,
            contraction: 0.5,
            objective_tolerance: 0.0,
            max_evals: 2000,
            seed: 7,
        }
    }
}

/// Why the search stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSearchStop {
    MeshTolerance,
    ObjectiveTolerance,
    MaxEvaluations,
}

/// Outcome of a pattern search.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternSearchOutcome {
    pub params: Vec<f64>,
    pub objective: f64,
    pub initial_objective: f64,
    pub evaluations: usize,
    pub iterations: usize,
    pub stop: PatternSearchStop,
}

/// Minimize `objective` over the box `[lower, upper]` starting at `x0`.
///
/// Parameters with equal bounds are not polled. The caller validates the
/// bounds; `x0` is clamped into them.
pub fn pattern_search(
    objective: &impl ScalarObjective,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    config: &PatternSearchConfig,
) -> PatternSearchOutcome {
    let n = x0.len();
    let free: Vec<usize> = (0..n).filter(|&i| upper[i] > lower[i]).collect();
    let width: Vec<f64> = (0..n).map(|i| upper[i] - lower[i]).collect();

    let mut x: Vec<f64> = (0..n).map(|i| x0[i].clamp(lower[i], upper[i])).collect();
    let mut fx = sanitize(objective.evaluate(&x));
    let initial_objective = fx;
    let mut evaluations = 1;
    let mut iterations = 0;
    let mut mesh = config.initial_mesh;
    let mut rng = StdRng::seed_from_u64(config.seed);

    let mut directions: Vec<(usize, f64)> = free
        .iter()
        .flat_map(|&i| [(i, 1.0), (i, -1.0)])
        .collect();

    let stop = loop {
        if fx <= config.objective_tolerance {
            break PatternSearchStop::ObjectiveTolerance;
        }
        if mesh < config.mesh_tolerance || directions.is_empty() {
            break PatternSearchStop::MeshTolerance;
        }
        if evaluations >= config.max_evals {
            break PatternSearchStop::MaxEvaluations;
        }
        iterations += 1;

        directions.shuffle(&mut rng);
        let mut improved = false;
        for &(i, sign) in &directions {
            if evaluations >= config.max_evals {
                break;
            }
            let mut candidate = x.clone();
            candidate[i] = (x[i] + sign * mesh * width[i]).clamp(lower[i], upper[i]);
            if candidate[i] == x[i] {
                continue;
            }
            let fc = sanitize(objective.evaluate(&candidate));
            evaluations += 1;
            if fc < fx {
                x = candidate;
                fx = fc;
                improved = true;
                break;
            }
        }

        if improved {
            mesh = (mesh * config.expansion).min(1.0);
        } else {
            mesh *= config.contraction;
        }
        tracing::trace!(iterations, evaluations, mesh, objective = fx, "pattern search poll");
    };

    PatternSearchOutcome {
        params: x,
        objective: fx,
        initial_objective,
        evaluations,
        iterations,
        stop,
    }
}

fn sanitize(v: f64) -> f64 {
    if v.is_nan() {
        f64::INFINITY
    } else {
        v
    }
}
