use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conic::TransparentEllipse;
use crate::eye::{EyePose, PoseBounds};
use crate::inverse::solve_prepared;
use crate::optimize::ScalarObjective;
use crate::scene::SceneGeometry;

use super::config::{CalibrateConfig, ObjectiveKind};

/// Prediction error of one selected ellipse under a candidate scene.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EllipseResidual {
    pub frame: usize,
    pub pose: EyePose,
    /// Center distance (pixels).
    pub center_distance: f64,
    pub shape_error: f64,
    pub area_error: f64,
    pub weight: f64,
    /// `d · (1 + k_s·shape) · (1 + k_a·area) · w`; NaN when the pose search
    /// produced no solution.
    pub value: f64,
    pub relaxed: bool,
}

/// Calibration objective over `[tx, ty, tz, eye_radius]`.
pub(super) struct CalibrationObjective<'a> {
    pub base_scene: SceneGeometry,
    pub frames: Vec<usize>,
    pub targets: Vec<TransparentEllipse>,
    pub weights: Vec<f64>,
    /// Warm starts for the per-ellipse pose search.
    pub seeds: Vec<EyePose>,
    pub pose_bounds: &'a PoseBounds,
    pub config: &'a CalibrateConfig,
}

impl CalibrationObjective<'_> {
    pub fn scene_at(&self, params: &[f64]) -> SceneGeometry {
        self.base_scene
            .with_translation([params[0], params[1], params[2]])
            .with_eye_radius(params[3])
    }

    /// Per-ellipse residuals; `None` when the candidate scene is unusable.
    pub fn residuals(&self, params: &[f64]) -> Option<Vec<EllipseResidual>> {
        let scene = self.scene_at(params);
        let eye = scene.eye_model().ok()?;
        let ray_trace = self.config.ray_trace.as_ref();

        let residuals = (0..self.targets.len())
            .into_par_iter()
            .map(|k| {
                let sol = solve_prepared(
                    &self.targets[k],
                    &scene,
                    &eye,
                    self.pose_bounds,
                    Some(self.seeds[k]),
                    &self.config.inverse,
                    ray_trace,
                );
                let d = sol.center_distance_error;
                let value = d
                    * (1.0 + self.config.shape_penalty * sol.shape_error)
                    * (1.0 + self.config.area_penalty * sol.area_error)
                    * self.weights[k];
                EllipseResidual {
                    frame: self.frames[k],
                    pose: sol.pose,
                    center_distance: d,
                    shape_error: sol.shape_error,
                    area_error: sol.area_error,
                    weight: self.weights[k],
                    value,
                    relaxed: sol.relaxed(),
                }
            })
            .collect();
        Some(residuals)
    }

    /// Aggregate residual values, skipping NaN entries.
    pub fn aggregate(&self, residuals: &[EllipseResidual]) -> f64 {
        let finite: Vec<f64> = residuals
            .iter()
            .map(|r| r.value)
            .filter(|v| !v.is_nan())
            .collect();
        if finite.is_empty() {
            return f64::INFINITY;
        }
        let sum_sq: f64 = finite.iter().map(|v| v * v).sum();
        match self.config.objective {
            ObjectiveKind::Rms => (sum_sq / finite.len() as f64).sqrt(),
            ObjectiveKind::SumOfSquares => sum_sq,
        }
    }
}

impl ScalarObjective for CalibrationObjective<'_> {
    fn evaluate(&self, params: &[f64]) -> f64 {
        match self.residuals(params) {
            Some(r) => self.aggregate(&r),
            None => f64::INFINITY,
        }
    }
}
