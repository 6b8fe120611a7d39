use rayon::prelude::*;

use crate::error::{config_err, Result};
use crate::eye::PoseBounds;
use crate::inverse::solve_prepared;
use crate::observation::ObservationSet;
use crate::optimize::pattern_search;
use crate::scene::SceneGeometry;

use super::config::{CalibrateConfig, CalibrationBounds, CALIBRATION_PARAMETERS};
use super::objective::CalibrationObjective;
use super::result::CalibrationResult;
use super::select::select_frames;

/// Fit camera translation (and optionally eye radius) so that the scene
/// model explains a representative sample of observed pupil ellipses.
///
/// Frames are chosen by binning ellipse centers; each is weighted by its
/// inverse fit error. A pattern search over the free parameters minimizes
/// the aggregated, shape- and area-penalized center error of per-ellipse
/// pose fits.
pub fn calibrate(
    observations: &ObservationSet,
    initial_scene: &SceneGeometry,
    bounds: &CalibrationBounds,
    pose_bounds: &PoseBounds,
    config: &CalibrateConfig,
) -> Result<CalibrationResult> {
    bounds.validate()?;
    pose_bounds.validate()?;
    config.validate()?;
    initial_scene.validate()?;

    let t = initial_scene.extrinsic_translation_vector;
    let x0 = [t[0], t[1], t[2], initial_scene.eye_radius];
    if !bounds.contains(&x0) {
        return Err(config_err(format!(
            "initial scene {x0:?} lies outside the calibration bounds"
        )));
    }

    let obs = observations.as_slice();
    let selection = select_frames(obs, config.n_bins_per_dimension)
        .ok_or_else(|| config_err("no valid observations to calibrate against"))?;
    let free: Vec<&str> = (0..4)
        .filter(|&i| !bounds.is_fixed(i))
        .map(|i| CALIBRATION_PARAMETERS[i])
        .collect();
    tracing::info!(
        "calibrating {:?} against {} of {} observations",
        free,
        selection.indices.len(),
        obs.len()
    );

    let targets: Vec<_> = selection.indices.iter().map(|&i| obs[i].ellipse).collect();
    let frames: Vec<usize> = selection.indices.iter().map(|&i| obs[i].frame).collect();

    let eye = initial_scene.eye_model()?;
    let ray_trace = config.ray_trace.as_ref();
    let seeds = targets
        .par_iter()
        .map(|target| {
            solve_prepared(
                target,
                initial_scene,
                &eye,
                pose_bounds,
                None,
                &config.inverse,
                ray_trace,
            )
            .pose
        })
        .collect();

    let objective = CalibrationObjective {
        base_scene: *initial_scene,
        frames,
        targets,
        weights: selection.weights.clone(),
        seeds,
        pose_bounds,
        config,
    };

    let outcome = pattern_search(&objective, &x0, &bounds.lower, &bounds.upper, &config.pattern);
    let scene = objective.scene_at(&outcome.params);
    let residuals = objective.residuals(&outcome.params).unwrap_or_default();
    let final_objective = objective.aggregate(&residuals);

    tracing::info!(
        "calibration {:?} after {} evaluations: objective {:.4} -> {:.4}, translation {:?}, eye radius {:.3}",
        outcome.stop,
        outcome.evaluations,
        outcome.initial_objective,
        final_objective,
        scene.extrinsic_translation_vector,
        scene.eye_radius
    );
    let result = CalibrationResult {
        scene,
        selected_frames: objective.frames.clone(),
        bins: selection.bins,
        weights: selection.weights,
        residuals,
        bounds: *bounds,
        objective: final_objective,
        initial_objective: outcome.initial_objective,
        evaluations: outcome.evaluations,
        stop: outcome.stop,
    };
    if result.relaxed_count() > 0 {
        tracing::warn!(
            "{} of {} calibration ellipses exceed the constraint tolerance",
            result.relaxed_count(),
            result.residuals.len()
        );
    }
    Ok(result)
}
