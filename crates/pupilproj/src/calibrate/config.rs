use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};
use crate::inverse::InverseConfig;
use crate::optimize::PatternSearchConfig;
use crate::project::RayTraceTables;
use crate::scene::SceneGeometry;

/// Names of the calibrated parameters, in search-vector order.
pub const CALIBRATION_PARAMETERS: [&str; 4] = [
    "translation_x",
    "translation_y",
    "translation_z",
    "eye_radius",
];

/// How per-ellipse errors are aggregated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectiveKind {
    /// Root mean square of the weighted errors.
    Rms,
    /// Sum of squared weighted errors.
    SumOfSquares,
}

/// Box bounds on `[translation_x, translation_y, translation_z, eye_radius]`
/// (mm). A parameter with equal bounds is held fixed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBounds {
    pub lower: [f64; 4],
    pub upper: [f64; 4],
}

impl CalibrationBounds {
    /// Translation free within `half_width_mm` of the scene's translation,
    /// eye radius fixed at the scene's value.
    pub fn translation_only(scene: &SceneGeometry, half_width_mm: [f64; 3]) -> Self {
        let t = scene.extrinsic_translation_vector;
        Self {
            lower: [
                t[0] - half_width_mm[0],
                t[1] - half_width_mm[1],
                t[2] - half_width_mm[2],
                scene.eye_radius,
            ],
            upper: [
                t[0] + half_width_mm[0],
                t[1] + half_width_mm[1],
                t[2] + half_width_mm[2],
                scene.eye_radius,
            ],
        }
    }

    /// Copy that also searches the eye radius within `[lower, upper]`.
    pub fn with_eye_radius(mut self, lower: f64, upper: f64) -> Self {
        self.lower[3] = lower;
        self.upper[3] = upper;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (i, name) in CALIBRATION_PARAMETERS.iter().enumerate() {
            let (lo, hi) = (self.lower[i], self.upper[i]);
            if !lo.is_finite() || !hi.is_finite() {
                return Err(config_err(format!("{name} bounds must be finite")));
            }
            if lo > hi {
                return Err(config_err(format!(
                    "{name} lower bound {lo} exceeds upper bound {hi}"
                )));
            }
        }
        if self.lower[3] <= 0.0 {
            return Err(config_err("eye_radius lower bound must be positive"));
        }
        Ok(())
    }

    pub fn contains(&self, x: &[f64; 4]) -> bool {
        (0..4).all(|i| x[i] >= self.lower[i] && x[i] <= self.upper[i])
    }

    pub fn is_fixed(&self, index: usize) -> bool {
        self.lower[index] == self.upper[index]
    }
}

/// Scene calibration settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrateConfig {
    /// Grid cells per image axis used to pick representative frames.
    pub n_bins_per_dimension: usize,
    pub objective: ObjectiveKind,
    /// Multiplier on the shape error in the per-ellipse penalty.
    pub shape_penalty: f64,
    /// Multiplier on the area error in the per-ellipse penalty.
    pub area_penalty: f64,
    /// Outer search settings, including the poll-order seed.
    pub pattern: PatternSearchConfig,
    /// Per-ellipse pose solver settings.
    pub inverse: InverseConfig,
    /// Corneal refraction; `None` projects without it.
    pub ray_trace: Option<RayTraceTables>,
}

impl Default for CalibrateConfig {
    fn default() -> Self {
        Self {
            n_bins_per_dimension: 4,
            objective: ObjectiveKind::Rms,
            shape_penalty: 100.0,
            area_penalty: 100.0,
            pattern: PatternSearchConfig::default(),
            inverse: InverseConfig::default(),
            ray_trace: None,
        }
    }
}

impl CalibrateConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_bins_per_dimension == 0 {
            return Err(config_err("n_bins_per_dimension must be at least 1"));
        }
        if !(self.shape_penalty >= 0.0 && self.area_penalty >= 0.0) {
            return Err(config_err("penalty multipliers must be non-negative"));
        }
        let p = &self.pattern;
        if !(p.initial_mesh > 0.0 && p.initial_mesh <= 1.0) {
            return Err(config_err("pattern.initial_mesh must lie in (0, 1]"));
        }
        if !(p.mesh_tolerance > 0.0) || !(p.expansion >= 1.0) {
            return Err(config_err(
                "pattern.mesh_tolerance must be positive and pattern.expansion at least 1",
            ));
        }
        if !(p.contraction > 0.0 && p.contraction < 1.0) {
            return Err(config_err("pattern.contraction must lie in (0, 1)"));
        }
        self.inverse.validate()?;
        if let Some(t) = &self.ray_trace {
            t.validate()?;
        }
        Ok(())
    }
}
