//! Empirical-Bayes temporal smoothing of the pupil radius.
//!
//! Each frame's radius is combined with a prior formed from its temporal
//! neighbors, then the frame is refit with the radius pinned to the
//! posterior mean. Frames are independent given the input series and run in
//! parallel.

mod config;
mod prior;

pub use config::SmoothConfig;
pub use prior::Gaussian;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};
use crate::eye::{EyeModel, EyePose, PoseBounds};
use crate::inverse::{fit_perimeter_prepared, solve_prepared, InverseSolution};
use crate::observation::{Observation, ObservationSet, PoseEstimate};
use crate::project::RayTraceTables;
use crate::scene::SceneGeometry;
use prior::{radius_likelihood, radius_prior, PrecisionScale};

/// Smoothed radius and pinned-radius refit for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothedFrame {
    pub frame: usize,
    /// Belief from neighboring frames; NaN when none carried a radius.
    pub prior: Gaussian,
    /// The frame's own radius measurement.
    pub likelihood: Gaussian,
    pub posterior: Gaussian,
    /// Pose refit with the radius pinned to the posterior mean.
    pub solution: InverseSolution,
}

impl SmoothedFrame {
    fn missing(frame: usize) -> Self {
        Self {
            frame,
            prior: Gaussian::nan(),
            likelihood: Gaussian::nan(),
            posterior: Gaussian::nan(),
            solution: InverseSolution::nan(),
        }
    }
}

/// Smooth the radius series in `estimates` (one per observation, same
/// order) and refit every frame with its radius pinned to the posterior.
///
/// Frames without data produce NaN output. When no neighbor informs the
/// prior, the posterior is the frame's own measurement.
pub fn smooth(
    observations: &ObservationSet,
    estimates: &[PoseEstimate],
    scene: &SceneGeometry,
    config: &SmoothConfig,
    bounds: &PoseBounds,
) -> Result<Vec<SmoothedFrame>> {
    config.validate()?;
    bounds.validate()?;
    scene.validate()?;
    if estimates.len() != observations.len() {
        return Err(config_err(format!(
            "{} pose estimates for {} observations",
            estimates.len(),
            observations.len()
        )));
    }
    if let Some((o, e)) = observations
        .iter()
        .zip(estimates)
        .find(|(o, e)| o.frame != e.frame)
    {
        return Err(config_err(format!(
            "pose estimate for frame {} paired with observation of frame {}",
            e.frame, o.frame
        )));
    }
    let eye = scene.eye_model()?;
    let ray_trace = config.ray_trace.as_ref();
    let scale = PrecisionScale::from_series(estimates);

    let frames: Vec<SmoothedFrame> = (0..estimates.len())
        .into_par_iter()
        .map(|i| {
            let est = &estimates[i];
            if !est.has_radius() {
                return SmoothedFrame::missing(est.frame);
            }
            let prior = radius_prior(estimates, i, &scale, config);
            let likelihood = radius_likelihood(est, config);
            let posterior = match prior {
                Some(p) => p.update(&likelihood),
                None => likelihood,
            };
            if !posterior.mean.is_finite() {
                return SmoothedFrame::missing(est.frame);
            }

            let pinned = bounds.with_fixed_radius(posterior.mean.max(0.0));
            let seed = Some(pinned.clamp(est.pose));
            let solution = refit(
                observations.as_slice().get(i),
                scene,
                &eye,
                &pinned,
                seed,
                config,
                ray_trace,
            );
            tracing::trace!(
                frame = est.frame,
                measured = est.pose.pupil_radius,
                posterior = posterior.mean,
                "smoothed radius"
            );
            SmoothedFrame {
                frame: est.frame,
                prior: prior.unwrap_or_else(Gaussian::nan),
                likelihood,
                posterior,
                solution,
            }
        })
        .collect();

    let missing = frames.iter().filter(|f| f.solution.is_nan()).count();
    tracing::info!("smoothed {} frames ({} without data)", frames.len(), missing);
    Ok(frames)
}

fn refit(
    observation: Option<&Observation>,
    scene: &SceneGeometry,
    eye: &EyeModel,
    bounds: &PoseBounds,
    seed: Option<EyePose>,
    config: &SmoothConfig,
    ray_trace: Option<&RayTraceTables>,
) -> InverseSolution {
    let Some(obs) = observation else {
        return InverseSolution::nan();
    };
    match &obs.perimeter {
        Some(points) => {
            fit_perimeter_prepared(points, scene, eye, bounds, seed, &config.inverse, ray_trace)
        }
        None => solve_prepared(&obs.ellipse, scene, eye, bounds, seed, &config.inverse, ray_trace),
    }
}
