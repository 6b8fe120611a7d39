//! Box-constrained least squares on top of `levenberg_marquardt`.
//!
//! Free parameters are searched in an unbounded internal coordinate `u`
//! with `x = mid + half·sin(u)`, so every trial point stays inside the box.
//! Parameters whose lower and upper bounds coincide are held fixed and never
//! reach the solver. Jacobians are forward differences in `u`.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Residual magnitude substituted where the model is undefined, so such
/// trial steps are always rejected.
const UNDEFINED_RESIDUAL: f64 = 1e8;

/// Fraction of the box width a start point is kept away from an active
/// bound; `sin` has no slope exactly on the bound.
const BOUND_INSET: f64 = 1e-4;

/// A least-squares problem: a residual vector as a function of the
/// parameters. `None` marks a parameter vector where the model is undefined.
pub trait ResidualModel {
    fn residuals(&self, params: &[f64]) -> Option<Vec<f64>>;
}

/// Levenberg–Marquardt settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LmConfig {
    /// Evaluation budget, in multiples of (free parameters + 1).
    pub patience: usize,
    /// Relative reduction of the sum of squares at which the search stops.
    pub ftol: f64,
    /// Relative step size at which the search stops.
    pub xtol: f64,
    /// Orthogonality of residuals and Jacobian columns at which the search
    /// stops.
    pub gtol: f64,
    /// Initial trust region factor.
    pub step_bound: f64,
    /// Relative forward-difference step.
    pub fd_step: f64,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            patience: 60,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 0.0,
            step_bound: 100.0,
            fd_step: 1e-7,
        }
    }
}

impl LmConfig {
    pub(crate) fn is_valid(&self) -> bool {
        self.patience > 0
            && self.ftol >= 0.0
            && self.xtol >= 0.0
            && self.gtol >= 0.0
            && self.step_bound > 0.0
            && self.fd_step > 0.0
    }

    fn solver(&self) -> LevenbergMarquardt<f64> {
        LevenbergMarquardt::new()
            .with_patience(self.patience)
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .with_stepbound(self.step_bound)
    }
}

/// Outcome of a bounded least-squares run.
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutcome {
    pub params: Vec<f64>,
    /// Half the sum of squared residuals at `params`.
    pub cost: f64,
    /// Residual evaluations spent by the solver.
    pub evaluations: usize,
    pub converged: bool,
}

fn half_sum_sq(r: &[f64]) -> f64 {
    0.5 * r.iter().map(|v| v * v).sum::<f64>()
}

/// The residual model seen through the sine box transform.
struct BoxedProblem<'a, M> {
    model: &'a M,
    full: Vec<f64>,
    free: Vec<usize>,
    mid: Vec<f64>,
    half: Vec<f64>,
    u: DVector<f64>,
    n_residuals: usize,
    fd_step: f64,
}

impl<M: ResidualModel> BoxedProblem<'_, M> {
    fn to_full(&self, u: &DVector<f64>) -> Vec<f64> {
        let mut x = self.full.clone();
        for (k, &i) in self.free.iter().enumerate() {
            x[i] = self.mid[k] + self.half[k] * u[k].sin();
        }
        x
    }

    fn residuals_at(&self, u: &DVector<f64>) -> Option<Vec<f64>> {
        let r = self.model.residuals(&self.to_full(u))?;
        if r.len() != self.n_residuals || r.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(r)
    }
}

impl<M: ResidualModel> LeastSquaresProblem<f64, Dyn, Dyn> for BoxedProblem<'_, M> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, u: &DVector<f64>) {
        self.u.copy_from(u);
    }

    fn params(&self) -> DVector<f64> {
        self.u.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let r = self
            .residuals_at(&self.u)
            .unwrap_or_else(|| vec![UNDEFINED_RESIDUAL; self.n_residuals]);
        Some(DVector::from_vec(r))
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let r0 = self.residuals_at(&self.u)?;
        let mut jac = DMatrix::<f64>::zeros(self.n_residuals, self.free.len());
        let mut shifted = self.u.clone();
        for k in 0..self.free.len() {
            let h = self.fd_step * self.u[k].abs().max(1.0);
            // backward step when the forward one leaves the model's domain
            let column = [h, -h].into_iter().find_map(|step| {
                shifted[k] = self.u[k] + step;
                let r = self.residuals_at(&shifted);
                shifted[k] = self.u[k];
                r.map(|r| (step, r))
            });
            if let Some((step, r)) = column {
                for row in 0..self.n_residuals {
                    jac[(row, k)] = (r[row] - r0[row]) / step;
                }
            }
        }
        Some(jac)
    }
}

/// Minimize ½‖r(x)‖² subject to `lower <= x <= upper`.
///
/// Returns `None` if the model is undefined at the (clamped) start point.
pub fn minimize_bounded(
    model: &impl ResidualModel,
    x0: &[f64],
    lower: &[f64],
    upper: &[f64],
    config: &LmConfig,
) -> Option<LmOutcome> {
    let n = x0.len();
    debug_assert_eq!(lower.len(), n);
    debug_assert_eq!(upper.len(), n);

    let start: Vec<f64> = (0..n).map(|i| x0[i].clamp(lower[i], upper[i])).collect();
    let r_start = model.residuals(&start)?;
    let start_cost = half_sum_sq(&r_start);
    if !start_cost.is_finite() {
        return None;
    }
    let free: Vec<usize> = (0..n).filter(|&i| upper[i] > lower[i]).collect();
    if free.is_empty() {
        return Some(LmOutcome {
            params: start,
            cost: start_cost,
            evaluations: 1,
            converged: true,
        });
    }

    let mid: Vec<f64> = free.iter().map(|&i| 0.5 * (lower[i] + upper[i])).collect();
    let half: Vec<f64> = free.iter().map(|&i| 0.5 * (upper[i] - lower[i])).collect();
    let u0 = DVector::from_iterator(
        free.len(),
        free.iter().enumerate().map(|(k, &i)| {
            let s = (start[i] - mid[k]) / half[k];
            s.clamp(-1.0 + BOUND_INSET, 1.0 - BOUND_INSET).asin()
        }),
    );
    let problem = BoxedProblem {
        model,
        full: start.clone(),
        free,
        mid,
        half,
        u: u0,
        n_residuals: r_start.len(),
        fd_step: config.fd_step,
    };

    let (problem, report) = config.solver().minimize(problem);
    let params = problem.to_full(&problem.u);
    let cost = problem
        .residuals_at(&problem.u)
        .map(|r| half_sum_sq(&r))
        .unwrap_or(f64::INFINITY);
    if !(cost <= start_cost) {
        return Some(LmOutcome {
            params: start,
            cost: start_cost,
            evaluations: report.number_of_evaluations,
            converged: false,
        });
    }
    Some(LmOutcome {
        params,
        cost,
        evaluations: report.number_of_evaluations,
        converged: report.termination.was_successful(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Rosenbrock;

    impl ResidualModel for Rosenbrock {
        fn residuals(&self, p: &[f64]) -> Option<Vec<f64>> {
            Some(vec![10.0 * (p[1] - p[0] * p[0]), 1.0 - p[0]])
        }
    }

    #[test]
    fn solves_rosenbrock() {
        let cfg = LmConfig {
            patience: 500,
            ..LmConfig::default()
        };
        let out = minimize_bounded(&Rosenbrock, &[-1.2, 1.0], &[-5.0, -5.0], &[5.0, 5.0], &cfg)
            .expect("defined at start");
        assert!((out.params[0] - 1.0).abs() < 1e-4, "{:?}", out);
        assert!((out.params[1] - 1.0).abs() < 1e-4, "{:?}", out);
    }

    #[test]
    fn respects_bounds_and_fixed_parameters() {
        let cfg = LmConfig::default();
        let out = minimize_bounded(&Rosenbrock, &[0.0, 0.5], &[-5.0, 0.5], &[0.6, 0.5], &cfg)
            .expect("defined at start");
        assert!(out.params[0] <= 0.6 + 1e-15);
        assert_eq!(out.params[1], 0.5);
        // the unconstrained optimum x = sqrt(0.5) lies past the bound
        assert!(out.params[0] > 0.55, "{:?}", out);
    }

    /// Defined only for x < 1; the minimum of (x - 2)² is reached at the
    /// edge of the domain.
    struct HalfLine;

    impl ResidualModel for HalfLine {
        fn residuals(&self, p: &[f64]) -> Option<Vec<f64>> {
            (p[0] < 1.0).then(|| vec![p[0] - 2.0])
        }
    }

    #[test]
    fn undefined_steps_are_rejected() {
        let out = minimize_bounded(&HalfLine, &[0.0], &[-3.0], &[3.0], &LmConfig::default())
            .expect("defined at start");
        assert!(out.params[0] < 1.0);
        assert!(out.cost <= 2.0);
    }

    struct Undefined;

    impl ResidualModel for Undefined {
        fn residuals(&self, _p: &[f64]) -> Option<Vec<f64>> {
            None
        }
    }

    #[test]
    fn undefined_start_returns_none() {
        assert!(minimize_bounded(&Undefined, &[0.0], &[-1.0], &[1.0], &LmConfig::default()).is_none());
    }
}
