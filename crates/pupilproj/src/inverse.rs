//! Scene-constrained recovery of eye pose from an observed pupil ellipse.
//!
//! The search runs over azimuth, elevation and pupil radius with torsion held
//! at zero. Center distance is minimized while shape and area mismatch enter
//! as heavily weighted residuals of a bounded Levenberg–Marquardt solve.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::conic::{fit_transparent, TransparentEllipse, MIN_CONIC_POINTS};
use crate::error::{config_err, Result};
use crate::eye::{EyeModel, EyePose, PoseBounds};
use crate::observation::{Observation, ObservationSet, PoseEstimate};
use crate::optimize::{minimize_bounded, LmConfig, ResidualModel};
use crate::project::{project_pupil_ellipse, RayTraceTables};
use crate::scene::SceneGeometry;

/// Inverse solver settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InverseConfig {
    /// Weight of the shape and area residuals relative to the center distance
    /// in pixels.
    pub constraint_weight: f64,
    /// Nodes per axis of the azimuth/elevation seeding grid.
    pub seed_grid_size: usize,
    pub lm: LmConfig,
}

impl Default for InverseConfig {
    fn default() -> Self {
        Self {
            constraint_weight: 1000.0,
            seed_grid_size: 7,
            lm: LmConfig::default(),
        }
    }
}

impl InverseConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.constraint_weight.is_finite() && self.constraint_weight > 0.0) {
            return Err(config_err("constraint_weight must be positive and finite"));
        }
        if self.seed_grid_size == 0 {
            return Err(config_err("seed_grid_size must be at least 1"));
        }
        if !self.lm.is_valid() {
            return Err(config_err(
                "lm settings must have positive patience, step bound and fd_step and non-negative tolerances",
            ));
        }
        Ok(())
    }
}

/// Pose recovered for one ellipse, with the fit quality it achieved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InverseSolution {
    pub pose: EyePose,
    /// Ellipse predicted by `pose`.
    pub predicted: TransparentEllipse,
    /// Distance between predicted and target centers (pixels).
    pub center_distance_error: f64,
    /// Distance between `(e cos 2θ, e sin 2θ)` shape vectors.
    pub shape_error: f64,
    /// `|A_predicted / A_target - 1|`.
    pub area_error: f64,
    /// Tolerance the shape and area errors were judged against.
    pub constraint_tolerance: f64,
    pub converged: bool,
    /// Residual evaluations spent by the least-squares search.
    pub evaluations: usize,
}

impl InverseSolution {
    /// Solution for a target without data.
    pub fn nan() -> Self {
        Self {
            pose: EyePose::nan(),
            predicted: TransparentEllipse::nan(),
            center_distance_error: f64::NAN,
            shape_error: f64::NAN,
            area_error: f64::NAN,
            constraint_tolerance: f64::NAN,
            converged: false,
            evaluations: 0,
        }
    }

    /// True when shape or area mismatch exceeds the constraint tolerance.
    pub fn relaxed(&self) -> bool {
        self.shape_error > self.constraint_tolerance || self.area_error > self.constraint_tolerance
    }

    pub fn is_nan(&self) -> bool {
        !self.pose.is_finite()
    }
}

/// Mismatch of `predicted` against `target`: center distance, shape error,
/// area error.
pub fn ellipse_errors(predicted: &TransparentEllipse, target: &TransparentEllipse) -> [f64; 3] {
    let center = (predicted.center_x - target.center_x).hypot(predicted.center_y - target.center_y);
    let sp = predicted.shape_vector();
    let st = target.shape_vector();
    let shape = (sp[0] - st[0]).hypot(sp[1] - st[1]);
    let area = (predicted.area / target.area - 1.0).abs();
    [center, shape, area]
}

/// Everything a residual evaluation needs besides the parameters.
struct PoseContext<'a> {
    scene: &'a SceneGeometry,
    eye: &'a EyeModel,
    ray_trace: Option<&'a RayTraceTables>,
    torsion: f64,
}

impl PoseContext<'_> {
    fn pose(&self, params: &[f64]) -> EyePose {
        EyePose {
            azimuth: params[0],
            elevation: params[1],
            torsion: self.torsion,
            pupil_radius: params[2],
        }
    }

    fn predict(&self, params: &[f64]) -> TransparentEllipse {
        project_pupil_ellipse(&self.pose(params), self.scene, self.eye, self.ray_trace)
    }
}

/// Residuals `[dx, dy, w·Δshape₀, w·Δshape₁, w·Δarea]` against a target
/// ellipse.
struct EllipseMatch<'a> {
    ctx: PoseContext<'a>,
    target: TransparentEllipse,
    target_shape: [f64; 2],
    weight: f64,
}

impl ResidualModel for EllipseMatch<'_> {
    fn residuals(&self, params: &[f64]) -> Option<Vec<f64>> {
        let p = self.ctx.predict(params);
        if p.has_nan() {
            return None;
        }
        let sp = p.shape_vector();
        Some(vec![
            p.center_x - self.target.center_x,
            p.center_y - self.target.center_y,
            self.weight * (sp[0] - self.target_shape[0]),
            self.weight * (sp[1] - self.target_shape[1]),
            self.weight * (p.area / self.target.area - 1.0),
        ])
    }
}

/// Signed Sampson distances of raw perimeter points to the predicted ellipse.
struct PerimeterMatch<'a> {
    ctx: PoseContext<'a>,
    points: &'a [[f64; 2]],
}

impl ResidualModel for PerimeterMatch<'_> {
    fn residuals(&self, params: &[f64]) -> Option<Vec<f64>> {
        let e = self.ctx.predict(params).to_explicit()?;
        Some(
            self.points
                .iter()
                .map(|&[x, y]| e.signed_sampson_distance(x, y))
                .collect(),
        )
    }
}

fn check_inputs(scene: &SceneGeometry, bounds: &PoseBounds, config: &InverseConfig) -> Result<()> {
    bounds.validate()?;
    config.validate()?;
    scene.validate()
}

fn search_bounds(bounds: &PoseBounds) -> ([f64; 3], [f64; 3]) {
    (
        [
            bounds.lower.azimuth,
            bounds.lower.elevation,
            bounds.lower.pupil_radius,
        ],
        [
            bounds.upper.azimuth,
            bounds.upper.elevation,
            bounds.upper.pupil_radius,
        ],
    )
}

fn linspace(lo: f64, hi: f64, n: usize) -> impl Iterator<Item = f64> {
    (0..n).map(move |i| {
        if n == 1 {
            0.5 * (lo + hi)
        } else {
            lo + (hi - lo) * i as f64 / (n - 1) as f64
        }
    })
}

/// Coarse grid over azimuth and elevation at a mid-range radius; the best
/// node's radius is then rescaled from the area ratio.
fn grid_seed(
    ctx: &PoseContext<'_>,
    target: &TransparentEllipse,
    bounds: &PoseBounds,
    config: &InverseConfig,
) -> [f64; 3] {
    let (lo, hi) = search_bounds(bounds);
    let r0 = if lo[2] > 0.0 {
        (lo[2] * hi[2]).sqrt()
    } else {
        0.5 * (lo[2] + hi[2])
    };
    let st = target.shape_vector();
    let n = config.seed_grid_size;

    let mut best: Option<(f64, [f64; 3], f64)> = None;
    for az in linspace(lo[0], hi[0], n) {
        for el in linspace(lo[1], hi[1], n) {
            let params = [az, el, r0];
            let p = ctx.predict(&params);
            if p.has_nan() {
                continue;
            }
            let sp = p.shape_vector();
            let d2 = (p.center_x - target.center_x).powi(2) + (p.center_y - target.center_y).powi(2);
            let shape2 = (sp[0] - st[0]).powi(2) + (sp[1] - st[1]).powi(2);
            let cost = d2 + (config.constraint_weight.powi(2)) * shape2;
            if best.map_or(true, |(c, ..)| cost < c) {
                best = Some((cost, params, p.area));
            }
        }
    }

    match best {
        Some((_, [az, el, r], area)) => {
            let scaled = r * (target.area / area).sqrt();
            [az, el, scaled.clamp(lo[2], hi[2])]
        }
        None => [
            0.5 * (lo[0] + hi[0]),
            0.5 * (lo[1] + hi[1]),
            r0,
        ],
    }
}

fn start_point(
    ctx: &PoseContext<'_>,
    target: &TransparentEllipse,
    bounds: &PoseBounds,
    x0: Option<EyePose>,
    config: &InverseConfig,
) -> [f64; 3] {
    match x0.filter(EyePose::is_finite) {
        Some(pose) => {
            let p = bounds.clamp(pose);
            [p.azimuth, p.elevation, p.pupil_radius]
        }
        None => grid_seed(ctx, target, bounds, config),
    }
}

fn finish(
    ctx: &PoseContext<'_>,
    target: &TransparentEllipse,
    params: &[f64],
    converged: bool,
    evaluations: usize,
) -> InverseSolution {
    let predicted = ctx.predict(params);
    let [center_distance_error, shape_error, area_error] = ellipse_errors(&predicted, target);
    let solution = InverseSolution {
        pose: ctx.pose(params),
        predicted,
        center_distance_error,
        shape_error,
        area_error,
        constraint_tolerance: ctx.scene.constraint_tolerance,
        converged,
        evaluations,
    };
    if solution.relaxed() {
        tracing::debug!(
            shape_error,
            area_error,
            tolerance = ctx.scene.constraint_tolerance,
            "pose fit relaxed beyond constraint tolerance"
        );
    }
    solution
}

/// Find the pose whose projected pupil best matches `target`.
///
/// A target containing NaN yields [`InverseSolution::nan`]. Parameters whose
/// bounds coincide are held fixed. Exceeding the constraint tolerance is
/// reported through [`InverseSolution::relaxed`], not as an error.
pub fn solve(
    target: &TransparentEllipse,
    scene: &SceneGeometry,
    bounds: &PoseBounds,
    x0: Option<EyePose>,
    config: &InverseConfig,
    ray_trace: Option<&RayTraceTables>,
) -> Result<InverseSolution> {
    check_inputs(scene, bounds, config)?;
    if let Some(t) = ray_trace {
        t.validate()?;
    }
    let eye = scene.eye_model()?;
    Ok(solve_prepared(target, scene, &eye, bounds, x0, config, ray_trace))
}

/// [`solve`] without input validation, for batch callers that validated once.
pub(crate) fn solve_prepared(
    target: &TransparentEllipse,
    scene: &SceneGeometry,
    eye: &EyeModel,
    bounds: &PoseBounds,
    x0: Option<EyePose>,
    config: &InverseConfig,
    ray_trace: Option<&RayTraceTables>,
) -> InverseSolution {
    if target.has_nan() || !(target.area > 0.0) {
        return InverseSolution::nan();
    }
    let ctx = PoseContext {
        scene,
        eye,
        ray_trace,
        torsion: 0.0_f64.clamp(bounds.lower.torsion, bounds.upper.torsion),
    };
    let start = start_point(&ctx, target, bounds, x0, config);
    let (lo, hi) = search_bounds(bounds);
    let model = EllipseMatch {
        ctx,
        target: *target,
        target_shape: target.shape_vector(),
        weight: config.constraint_weight,
    };

    match minimize_bounded(&model, &start, &lo, &hi, &config.lm) {
        Some(out) => finish(&model.ctx, target, &out.params, out.converged, out.evaluations),
        None => {
            tracing::debug!(?start, "pose search start is outside the projectable region");
            finish(&model.ctx, target, &start, false, 0)
        }
    }
}

/// Fit the scene-constrained pupil ellipse directly to raw perimeter points
/// by minimizing their signed Sampson distances.
///
/// Fewer than five finite points yield [`InverseSolution::nan`]. The reported
/// errors compare the constrained ellipse with an unconstrained algebraic fit
/// of the same points.
pub fn fit_perimeter(
    points: &[[f64; 2]],
    scene: &SceneGeometry,
    bounds: &PoseBounds,
    x0: Option<EyePose>,
    config: &InverseConfig,
    ray_trace: Option<&RayTraceTables>,
) -> Result<InverseSolution> {
    check_inputs(scene, bounds, config)?;
    if let Some(t) = ray_trace {
        t.validate()?;
    }
    let eye = scene.eye_model()?;
    Ok(fit_perimeter_prepared(points, scene, &eye, bounds, x0, config, ray_trace))
}

pub(crate) fn fit_perimeter_prepared(
    points: &[[f64; 2]],
    scene: &SceneGeometry,
    eye: &EyeModel,
    bounds: &PoseBounds,
    x0: Option<EyePose>,
    config: &InverseConfig,
    ray_trace: Option<&RayTraceTables>,
) -> InverseSolution {
    let finite: Vec<[f64; 2]> = points
        .iter()
        .copied()
        .filter(|p| p[0].is_finite() && p[1].is_finite())
        .collect();
    if finite.len() < MIN_CONIC_POINTS {
        return InverseSolution::nan();
    }
    let free_fit = fit_transparent(&finite);
    if free_fit.has_nan() {
        return InverseSolution::nan();
    }

    let ctx = PoseContext {
        scene,
        eye,
        ray_trace,
        torsion: 0.0_f64.clamp(bounds.lower.torsion, bounds.upper.torsion),
    };
    let start = start_point(&ctx, &free_fit, bounds, x0, config);
    let (lo, hi) = search_bounds(bounds);
    let model = PerimeterMatch {
        ctx,
        points: &finite,
    };

    match minimize_bounded(&model, &start, &lo, &hi, &config.lm) {
        Some(out) => finish(&model.ctx, &free_fit, &out.params, out.converged, out.evaluations),
        None => finish(&model.ctx, &free_fit, &start, false, 0),
    }
}

/// Radius standard deviation for an observation solved at `pose`.
///
/// Image area scales with the square of the pupil radius, so the relative
/// radius SD is half the relative area SD. Without parameter SDs the
/// perimeter RMSE relative to the equivalent image radius is used.
fn radius_sd(obs: &Observation, pose: &EyePose) -> f64 {
    let r = pose.pupil_radius;
    let area = obs.ellipse.area;
    match obs.area_sd() {
        Some(sd_area) => r * sd_area / (2.0 * area),
        None => r * obs.fit_rmse / (area / std::f64::consts::PI).sqrt(),
    }
}

/// Solve every observation in parallel under one scene.
pub fn estimate_poses(
    observations: &ObservationSet,
    scene: &SceneGeometry,
    bounds: &PoseBounds,
    config: &InverseConfig,
    ray_trace: Option<&RayTraceTables>,
) -> Result<Vec<PoseEstimate>> {
    check_inputs(scene, bounds, config)?;
    if let Some(t) = ray_trace {
        t.validate()?;
    }
    let eye = scene.eye_model()?;

    let estimates: Vec<PoseEstimate> = observations
        .as_slice()
        .par_iter()
        .map(|obs| {
            if !obs.is_valid() {
                return PoseEstimate::missing(obs.frame);
            }
            let sol = solve_prepared(&obs.ellipse, scene, &eye, bounds, None, config, ray_trace);
            if sol.is_nan() {
                return PoseEstimate::missing(obs.frame);
            }
            PoseEstimate {
                frame: obs.frame,
                pose: sol.pose,
                radius_sd: radius_sd(obs, &sol.pose),
                fit_rmse: obs.fit_rmse,
                relaxed: sol.relaxed(),
            }
        })
        .collect();

    let relaxed = estimates.iter().filter(|e| e.relaxed).count();
    let missing = estimates.iter().filter(|e| !e.pose.is_finite()).count();
    tracing::info!(
        "estimated {} poses ({} relaxed, {} missing)",
        estimates.len(),
        relaxed,
        missing
    );
    Ok(estimates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::project;
    use crate::scene::CameraIntrinsics;
    use approx::assert_relative_eq;

    fn scene() -> SceneGeometry {
        SceneGeometry::pinhole(CameraIntrinsics::new(772.55, 320.0, 240.0), [0.0, 0.0, 120.0], 11.29)
    }

    fn target(pose: EyePose, s: &SceneGeometry) -> TransparentEllipse {
        project(&pose, s, None, false).unwrap().ellipse
    }

    #[test]
    fn recovers_pose_from_projected_ellipse() {
        let s = scene();
        let cfg = InverseConfig::default();
        for truth in [
            EyePose::new(-20.0, 10.0, 2.5),
            EyePose::new(15.0, -12.0, 1.2),
            EyePose::new(30.0, 20.0, 3.5),
        ] {
            let sol = solve(&target(truth, &s), &s, &PoseBounds::default(), None, &cfg, None).unwrap();
            assert!(!sol.relaxed(), "{sol:?}");
            assert!((sol.pose.azimuth - truth.azimuth).abs() < 0.1, "{sol:?}");
            assert!((sol.pose.elevation - truth.elevation).abs() < 0.1, "{sol:?}");
            assert!((sol.pose.pupil_radius - truth.pupil_radius).abs() < 0.01, "{sol:?}");
            assert!(sol.center_distance_error < 1e-3);
        }
    }

    #[test]
    fn reprojecting_the_solved_pose_reproduces_the_prediction() {
        let s = scene();
        let cfg = InverseConfig::default();
        let bounds = PoseBounds::default();
        let sol = solve(&target(EyePose::new(-14.0, 9.0, 2.2), &s), &s, &bounds, None, &cfg, None)
            .unwrap();
        let reprojected = target(sol.pose, &s);
        assert_relative_eq!(reprojected.center_x, sol.predicted.center_x, epsilon = 1e-9);
        assert_relative_eq!(reprojected.center_y, sol.predicted.center_y, epsilon = 1e-9);
        assert_relative_eq!(reprojected.area, sol.predicted.area, max_relative = 1e-9);
        assert_relative_eq!(reprojected.eccentricity, sol.predicted.eccentricity, epsilon = 1e-9);
        assert_relative_eq!(reprojected.theta, sol.predicted.theta, epsilon = 1e-9);

        let again = solve(&reprojected, &s, &bounds, Some(sol.pose), &cfg, None).unwrap();
        assert_relative_eq!(again.pose.azimuth, sol.pose.azimuth, epsilon = 1e-6);
        assert_relative_eq!(again.pose.elevation, sol.pose.elevation, epsilon = 1e-6);
        assert_relative_eq!(again.pose.pupil_radius, sol.pose.pupil_radius, epsilon = 1e-8);
    }

    #[test]
    fn warm_start_converges_too() {
        let s = scene();
        let truth = EyePose::new(8.0, -5.0, 2.0);
        let sol = solve(
            &target(truth, &s),
            &s,
            &PoseBounds::default(),
            Some(EyePose::new(5.0, -2.0, 1.5)),
            &InverseConfig::default(),
            None,
        )
        .unwrap();
        assert_relative_eq!(sol.pose.azimuth, truth.azimuth, epsilon = 0.05);
        assert_relative_eq!(sol.pose.pupil_radius, truth.pupil_radius, epsilon = 0.01);
    }

    #[test]
    fn nan_target_gives_nan_solution() {
        let sol = solve(
            &TransparentEllipse::nan(),
            &scene(),
            &PoseBounds::default(),
            None,
            &InverseConfig::default(),
            None,
        )
        .unwrap();
        assert!(sol.is_nan());
        assert!(!sol.relaxed());
    }

    #[test]
    fn inconsistent_bounds_are_rejected() {
        let mut bounds = PoseBounds::default();
        bounds.lower.elevation = 30.0;
        let e = target(EyePose::new(0.0, 0.0, 2.0), &scene());
        assert!(solve(&e, &scene(), &bounds, None, &InverseConfig::default(), None).is_err());
    }

    #[test]
    fn pinned_radius_relaxes_area() {
        let s = scene();
        let truth = EyePose::new(10.0, 5.0, 3.0);
        let bounds = PoseBounds::default().with_fixed_radius(2.0);
        let sol = solve(&target(truth, &s), &s, &bounds, None, &InverseConfig::default(), None)
            .unwrap();
        assert_eq!(sol.pose.pupil_radius, 2.0);
        assert!(sol.relaxed());
        assert!(sol.area_error > 0.2);
    }

    #[test]
    fn perimeter_fit_recovers_pose() {
        let s = scene();
        let truth = EyePose::new(-12.0, 7.0, 2.2);
        let proj = crate::project::project_with_points(&truth, &s, None, false, 24).unwrap();
        let sol = fit_perimeter(
            &proj.image_points,
            &s,
            &PoseBounds::default(),
            None,
            &InverseConfig::default(),
            None,
        )
        .unwrap();
        assert!((sol.pose.azimuth - truth.azimuth).abs() < 0.1, "{sol:?}");
        assert!((sol.pose.pupil_radius - truth.pupil_radius).abs() < 0.01, "{sol:?}");
        assert!(!sol.relaxed());
    }

    #[test]
    fn too_few_perimeter_points_give_nan() {
        let sol = fit_perimeter(
            &[[1.0, 2.0], [3.0, 4.0], [f64::NAN, 1.0]],
            &scene(),
            &PoseBounds::default(),
            None,
            &InverseConfig::default(),
            None,
        )
        .unwrap();
        assert!(sol.is_nan());
    }

    #[test]
    fn estimates_carry_radius_uncertainty() {
        let s = scene();
        let mut observations = Vec::new();
        for (frame, pose) in [
            EyePose::new(0.0, 0.0, 2.0),
            EyePose::new(10.0, 0.0, 2.1),
            EyePose::new(20.0, 5.0, 2.2),
        ]
        .into_iter()
        .enumerate()
        {
            let ellipse = target(pose, &s);
            let mut obs = Observation::from_ellipse(frame, ellipse, 0.5);
            obs.fit_param_sd = Some([0.1, 0.1, ellipse.area * 0.02, 0.01, 0.01]);
            observations.push(obs);
        }
        observations.push(Observation::from_ellipse(3, TransparentEllipse::nan(), f64::NAN));
        let set = ObservationSet::new(observations).unwrap();

        let est = estimate_poses(&set, &s, &PoseBounds::default(), &InverseConfig::default(), None)
            .unwrap();
        assert_eq!(est.len(), 4);
        for e in &est[..3] {
            assert!(e.has_radius());
            assert_relative_eq!(e.radius_sd, e.pose.pupil_radius * 0.01, max_relative = 1e-9);
        }
        assert!(!est[3].has_radius());
        assert_eq!(est[3].frame, 3);
    }
}
