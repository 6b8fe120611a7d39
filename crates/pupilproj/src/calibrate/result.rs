use serde::{Deserialize, Serialize};

use crate::optimize::PatternSearchStop;
use crate::scene::SceneGeometry;

use super::config::CalibrationBounds;
use super::objective::EllipseResidual;

/// Result of scene calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// Calibrated scene.
    pub scene: SceneGeometry,
    /// Frame indices of the ellipses the objective was built from.
    pub selected_frames: Vec<usize>,
    /// Grid cell `(column, row)` each selected ellipse was drawn from.
    pub bins: Vec<(usize, usize)>,
    /// Objective weights of the selected ellipses (mean 1).
    pub weights: Vec<f64>,
    /// Per-ellipse errors under the calibrated scene.
    pub residuals: Vec<EllipseResidual>,
    /// Bounds the search ran within.
    pub bounds: CalibrationBounds,
    /// Objective value at the calibrated scene.
    pub objective: f64,
    /// Objective value at the initial scene.
    pub initial_objective: f64,
    /// Objective evaluations spent.
    pub evaluations: usize,
    pub stop: PatternSearchStop,
}

impl CalibrationResult {
    /// `[tx, ty, tz, eye_radius]` of the calibrated scene.
    pub fn parameters(&self) -> [f64; 4] {
        let t = self.scene.extrinsic_translation_vector;
        [t[0], t[1], t[2], self.scene.eye_radius]
    }

    /// Bounds for a second, finer search: each free parameter's range is
    /// scaled by `shrink` and re-centered on the calibrated value, staying
    /// inside the previous bounds. Fixed parameters stay fixed.
    pub fn refine_bounds(&self, shrink: f64) -> CalibrationBounds {
        let shrink = shrink.clamp(0.0, 1.0);
        let x = self.parameters();
        let mut lower = self.bounds.lower;
        let mut upper = self.bounds.upper;
        for i in 0..4 {
            if self.bounds.is_fixed(i) {
                continue;
            }
            let half = 0.5 * shrink * (self.bounds.upper[i] - self.bounds.lower[i]);
            lower[i] = (x[i] - half).max(self.bounds.lower[i]);
            upper[i] = (x[i] + half).min(self.bounds.upper[i]);
        }
        CalibrationBounds { lower, upper }
    }

    /// Selected ellipses whose pose fit exceeded the constraint tolerance.
    pub fn relaxed_count(&self) -> usize {
        self.residuals.iter().filter(|r| r.relaxed).count()
    }
}
