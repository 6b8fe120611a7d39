use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};
use crate::inverse::InverseConfig;
use crate::project::RayTraceTables;

/// Temporal smoothing settings for the pupil radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothConfig {
    /// Decay constant of the exponential temporal weights (frames).
    pub decay_tau: f64,
    /// Exponent applied to a frame's radius SD to form its likelihood SD.
    pub likelihood_exponent: f64,
    /// Frames whose perimeter fit RMSE exceeds this are treated as
    /// uninformative.
    pub bad_frame_rmse_threshold: f64,
    /// Pose solver used for the pinned-radius refit.
    pub inverse: InverseConfig,
    pub ray_trace: Option<RayTraceTables>,
}

impl Default for SmoothConfig {
    fn default() -> Self {
        Self {
            decay_tau: 3.0,
            likelihood_exponent: 1.0,
            bad_frame_rmse_threshold: 2.0,
            inverse: InverseConfig::default(),
            ray_trace: None,
        }
    }
}

impl SmoothConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.decay_tau.is_finite() && self.decay_tau > 0.0) {
            return Err(config_err(format!(
                "decay_tau must be positive and finite, got {}",
                self.decay_tau
            )));
        }
        if !(self.likelihood_exponent.is_finite() && self.likelihood_exponent > 0.0) {
            return Err(config_err("likelihood_exponent must be positive and finite"));
        }
        if self.bad_frame_rmse_threshold.is_nan() || self.bad_frame_rmse_threshold < 0.0 {
            return Err(config_err("bad_frame_rmse_threshold must be non-negative"));
        }
        self.inverse.validate()?;
        if let Some(t) = &self.ray_trace {
            t.validate()?;
        }
        Ok(())
    }

    /// Neighbors on each side that inform a frame's prior.
    pub fn window_half_width(&self) -> usize {
        ((10.0 * self.decay_tau).ceil() as usize).max(10)
    }

    pub(super) fn is_bad(&self, fit_rmse: f64) -> bool {
        !(fit_rmse <= self.bad_frame_rmse_threshold)
    }
}
