//! Forward projection of the pupil (and optionally the rest of the eye model)
//! into the camera image.
//!
//! Pipeline per point: optional corneal refraction in the unrotated eye frame,
//! rotation about the eye's rotation center, eyeWorld → scene-world, pinhole
//! projection with radial distortion. The pupil ellipse is the conic through
//! the projected pupil perimeter points.

mod raytrace;

pub use raytrace::RayTraceTables;

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::conic::{fit_transparent, TransparentEllipse, MIN_CONIC_POINTS};
use crate::error::{config_err, Error, Result};
use crate::eye::{EyeModel, EyePose};
use crate::scene::SceneGeometry;
use raytrace::virtual_image;

/// Pupil perimeter points used when no count is given.
pub const DEFAULT_PERIMETER_POINTS: usize = MIN_CONIC_POINTS;

const IRIS_PERIMETER_POINTS: usize = 16;
const SURFACE_POLAR_STEPS: usize = 18;
const SURFACE_AZIMUTH_STEPS: usize = 24;

/// What an entry of [`Projection::image_points`] depicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointLabel {
    PupilPerimeter,
    PupilCenter,
    IrisCenter,
    RotationCenter,
    IrisPerimeter,
    PosteriorChamber,
    AnteriorChamber,
}

impl PointLabel {
    /// Points seen through the cornea.
    pub fn is_refracted(self) -> bool {
        matches!(
            self,
            PointLabel::PupilPerimeter
                | PointLabel::PupilCenter
                | PointLabel::IrisCenter
                | PointLabel::IrisPerimeter
        )
    }
}

/// Output of [`project`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    /// Ellipse through the projected pupil perimeter.
    pub ellipse: TransparentEllipse,
    /// Rotated (and, where traced, refracted) points in eyeWorld coordinates.
    pub eye_world_points: Vec<[f64; 3]>,
    /// Distorted pixel coordinates; NaN for points behind the camera.
    pub image_points: Vec<[f64; 2]>,
    pub point_labels: Vec<PointLabel>,
    /// Camera-node miss distance of the traced ray per point (mm); NaN when
    /// the point was not traced.
    pub ray_trace_errors: Vec<f64>,
}

impl Projection {
    /// Image points carrying `label`.
    pub fn points_with_label(&self, label: PointLabel) -> impl Iterator<Item = &[f64; 2]> + '_ {
        self.image_points
            .iter()
            .zip(self.point_labels.iter())
            .filter(move |(_, l)| **l == label)
            .map(|(p, _)| p)
    }
}

/// Project `pose` under `scene` with the default pupil sampling.
///
/// `ray_trace` enables corneal refraction; `full_model` adds the iris, the
/// eye centers and the chamber surfaces to the returned point sets.
pub fn project(
    pose: &EyePose,
    scene: &SceneGeometry,
    ray_trace: Option<&RayTraceTables>,
    full_model: bool,
) -> Result<Projection> {
    project_with_points(pose, scene, ray_trace, full_model, DEFAULT_PERIMETER_POINTS)
}

/// [`project`] with an explicit number of pupil perimeter points.
pub fn project_with_points(
    pose: &EyePose,
    scene: &SceneGeometry,
    ray_trace: Option<&RayTraceTables>,
    full_model: bool,
    n_perimeter_points: usize,
) -> Result<Projection> {
    if n_perimeter_points < MIN_CONIC_POINTS {
        return Err(config_err(format!(
            "at least {MIN_CONIC_POINTS} pupil perimeter points are required, got {n_perimeter_points}"
        )));
    }
    if pose.pupil_radius < 0.0 {
        return Err(config_err(format!(
            "pupil radius must be non-negative, got {}",
            pose.pupil_radius
        )));
    }
    scene.validate()?;
    if let Some(tables) = ray_trace {
        tables.validate()?;
    }
    let eye = scene.eye_model()?;

    let (sources, labels) = model_points(&eye, pose.pupil_radius, n_perimeter_points, full_model)?;
    let frame = PoseFrame::new(pose, scene, &eye);

    let mut eye_world_points = Vec::with_capacity(sources.len());
    let mut image_points = Vec::with_capacity(sources.len());
    let mut ray_trace_errors = Vec::with_capacity(sources.len());
    for (source, label) in sources.iter().zip(labels.iter()) {
        let tables = ray_trace.filter(|_| label.is_refracted());
        let (p, err) = frame.place(&eye, source, tables);
        image_points.push(scene.project_eye_point(&p));
        eye_world_points.push([p.x, p.y, p.z]);
        ray_trace_errors.push(err);
    }

    let ellipse = pupil_ellipse(pose, &image_points[..n_perimeter_points]);
    tracing::trace!(
        azimuth = pose.azimuth,
        elevation = pose.elevation,
        radius = pose.pupil_radius,
        points = image_points.len(),
        "projected eye pose"
    );

    Ok(Projection {
        ellipse,
        eye_world_points,
        image_points,
        point_labels: labels,
        ray_trace_errors,
    })
}

/// Pupil ellipse only, for solver inner loops. The scene and eye model are
/// assumed valid; NaN poses give a NaN ellipse.
pub(crate) fn project_pupil_ellipse(
    pose: &EyePose,
    scene: &SceneGeometry,
    eye: &EyeModel,
    ray_trace: Option<&RayTraceTables>,
) -> TransparentEllipse {
    if !pose.is_finite() || pose.pupil_radius <= 0.0 {
        return TransparentEllipse::nan();
    }
    let frame = PoseFrame::new(pose, scene, eye);
    let image_points: Vec<[f64; 2]> = eye
        .pupil_perimeter(pose.pupil_radius, DEFAULT_PERIMETER_POINTS)
        .iter()
        .map(|source| {
            let (p, _) = frame.place(eye, source, ray_trace);
            scene.project_eye_point(&p)
        })
        .collect();
    pupil_ellipse(pose, &image_points)
}

fn pupil_ellipse(pose: &EyePose, perimeter: &[[f64; 2]]) -> TransparentEllipse {
    if !(pose.pupil_radius > 0.0) {
        return TransparentEllipse::nan();
    }
    fit_transparent(perimeter)
}

fn model_points(
    eye: &EyeModel,
    pupil_radius: f64,
    n_perimeter_points: usize,
    full_model: bool,
) -> Result<(Vec<Vector3<f64>>, Vec<PointLabel>)> {
    let mut points = eye.pupil_perimeter(pupil_radius, n_perimeter_points);
    let mut labels = vec![PointLabel::PupilPerimeter; points.len()];
    if !full_model {
        return Ok((points, labels));
    }

    let mut push = |set: Vec<Vector3<f64>>, label: PointLabel| {
        labels.extend(std::iter::repeat(label).take(set.len()));
        points.extend(set);
    };
    push(vec![eye.pupil_center], PointLabel::PupilCenter);
    push(vec![eye.iris_center], PointLabel::IrisCenter);
    push(vec![eye.rotation_center], PointLabel::RotationCenter);
    push(eye.iris_perimeter(IRIS_PERIMETER_POINTS), PointLabel::IrisPerimeter);

    let posterior = eye.posterior_chamber_points(SURFACE_POLAR_STEPS, SURFACE_AZIMUTH_STEPS);
    if posterior.is_empty() {
        return Err(Error::ModelInconsistency(
            "no posterior chamber points lie between the posterior pole and the iris plane"
                .into(),
        ));
    }
    push(posterior, PointLabel::PosteriorChamber);

    let anterior = eye.anterior_chamber_points(SURFACE_POLAR_STEPS, SURFACE_AZIMUTH_STEPS);
    if anterior.is_empty() {
        return Err(Error::ModelInconsistency(
            "no corneal surface points lie anterior to the iris plane".into(),
        ));
    }
    push(anterior, PointLabel::AnteriorChamber);

    Ok((points, labels))
}

/// Per-pose quantities shared by every projected point.
struct PoseFrame {
    rotation: Matrix3<f64>,
    rotation_center: Vector3<f64>,
    /// Camera node in the unrotated eye frame.
    camera: Vector3<f64>,
}

impl PoseFrame {
    fn new(pose: &EyePose, scene: &SceneGeometry, eye: &EyeModel) -> Self {
        let rotation = pose.rotation_matrix();
        let rotation_center = eye.rotation_center;
        let camera_world = scene.camera_position_eye_world();
        let camera = rotation.transpose() * (camera_world - rotation_center) + rotation_center;
        Self {
            rotation,
            rotation_center,
            camera,
        }
    }

    /// Refract (when `tables` is given) and rotate one eye point. Returns the
    /// eyeWorld position and the ray-trace miss distance.
    fn place(
        &self,
        eye: &EyeModel,
        source: &Vector3<f64>,
        tables: Option<&RayTraceTables>,
    ) -> (Vector3<f64>, f64) {
        let (point, err) = match tables {
            Some(t) => match virtual_image(eye, source, &self.camera, t) {
                Some(vi) => (vi.point, vi.residual),
                None => (Vector3::repeat(f64::NAN), f64::NAN),
            },
            None => (*source, f64::NAN),
        };
        (
            self.rotation * (point - self.rotation_center) + self.rotation_center,
            err,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eye::EyeAnatomy;
    use crate::scene::CameraIntrinsics;
    use approx::assert_relative_eq;
    use rand::prelude::*;
    use std::f64::consts::PI;

    fn scene() -> SceneGeometry {
        SceneGeometry::pinhole(CameraIntrinsics::new(772.55, 320.0, 240.0), [0.0, 0.0, 120.0], 11.29)
    }

    #[test]
    fn straight_ahead_pupil_lands_on_principal_point() {
        let proj = project(&EyePose::new(0.0, 0.0, 2.0), &scene(), None, false).unwrap();
        let e = proj.ellipse;
        assert!((e.center_x - 320.0).abs() < 1.0);
        assert!((e.center_y - 240.0).abs() < 1.0);
        let r_px = 772.55 * 2.0 / 123.7;
        assert_relative_eq!(e.area, PI * r_px * r_px, max_relative = 1e-6);
        assert!(e.eccentricity < 1e-3);
    }

    #[test]
    fn area_grows_with_pupil_radius() {
        let s = scene();
        let mut last = 0.0;
        for r in [0.5, 1.0, 1.5, 2.0, 3.0, 4.0] {
            let area = project(&EyePose::new(12.0, -8.0, r), &s, None, false)
                .unwrap()
                .ellipse
                .area;
            assert!(area > last, "radius {r}: {area} <= {last}");
            last = area;
        }
    }

    #[test]
    fn zero_radius_gives_nan_ellipse() {
        let proj = project(&EyePose::new(5.0, 5.0, 0.0), &scene(), None, false).unwrap();
        assert!(proj.ellipse.has_nan());
        assert!(proj.ellipse.to_array().iter().all(|v| v.is_nan()));
    }

    #[test]
    fn negative_radius_is_rejected() {
        assert!(project(&EyePose::new(0.0, 0.0, -1.0), &scene(), None, false).is_err());
    }

    #[test]
    fn theta_stays_in_half_open_range() {
        let s = scene();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let pose = EyePose::new(
                rng.gen_range(-35.0..35.0),
                rng.gen_range(-25.0..25.0),
                rng.gen_range(0.5..4.0),
            );
            let e = project(&pose, &s, None, false).unwrap().ellipse;
            assert!(e.theta >= 0.0 && e.theta < PI, "{e:?}");
        }
    }

    #[test]
    fn projection_is_deterministic() {
        let s = scene();
        let pose = EyePose::new(-14.0, 9.0, 2.2);
        let a = project(&pose, &s, Some(&RayTraceTables::default()), false).unwrap();
        let b = project(&pose, &s, Some(&RayTraceTables::default()), false).unwrap();
        assert_eq!(a, b);
        let c = project(&pose, &s, None, true).unwrap();
        let d = project(&pose, &s, None, true).unwrap();
        assert_eq!(c.ellipse, d.ellipse);
        assert_eq!(c.image_points, d.image_points);
    }

    #[test]
    fn rotated_pupil_moves_and_flattens() {
        let s = scene();
        let right = project(&EyePose::new(20.0, 0.0, 2.0), &s, None, false).unwrap().ellipse;
        let up = project(&EyePose::new(0.0, 20.0, 2.0), &s, None, false).unwrap().ellipse;
        assert!(right.center_x > 320.0);
        assert!(up.center_y < 240.0);
        assert!(right.eccentricity > 0.2);
        // horizontal rotation foreshortens horizontally: major axis is vertical
        assert!((right.theta - PI / 2.0).abs() < 1e-3, "{right:?}");
        assert!(up.theta < 1e-3 || up.theta > PI - 1e-3, "{up:?}");
    }

    #[test]
    fn distortion_changes_off_center_ellipses_only() {
        let plain = scene();
        let mut distorted = scene();
        distorted.radial_distortion_vector = [-0.3, 0.1];

        let centered = EyePose::new(0.0, 0.0, 2.0);
        let a = project(&centered, &plain, None, false).unwrap().ellipse;
        let b = project(&centered, &distorted, None, false).unwrap().ellipse;
        assert_relative_eq!(a.center_x, b.center_x, epsilon = 1e-9);
        assert!(b.area < a.area);

        let off = EyePose::new(25.0, 15.0, 2.0);
        let c = project(&off, &plain, None, false).unwrap().ellipse;
        let d = project(&off, &distorted, None, false).unwrap().ellipse;
        assert!((c.center_x - d.center_x).abs() > 1e-3);
    }

    #[test]
    fn refraction_enlarges_the_pupil_image() {
        let s = scene();
        let pose = EyePose::new(0.0, 0.0, 2.0);
        let tables = RayTraceTables::default();
        let plain = project(&pose, &s, None, false).unwrap();
        let refracted = project(&pose, &s, Some(&tables), false).unwrap();
        assert!(refracted.ellipse.area > plain.ellipse.area);
        assert!(refracted.ray_trace_errors.iter().all(|e| *e < 1e-6));
        assert!(plain.ray_trace_errors.iter().all(|e| e.is_nan()));
    }

    #[test]
    fn full_model_labels_every_point() {
        let proj = project(&EyePose::new(10.0, 5.0, 2.0), &scene(), None, true).unwrap();
        assert_eq!(proj.image_points.len(), proj.point_labels.len());
        assert_eq!(proj.eye_world_points.len(), proj.point_labels.len());
        assert_eq!(proj.points_with_label(PointLabel::PupilPerimeter).count(), 5);
        assert_eq!(proj.points_with_label(PointLabel::RotationCenter).count(), 1);
        assert_eq!(proj.points_with_label(PointLabel::IrisPerimeter).count(), IRIS_PERIMETER_POINTS);
        assert!(proj.points_with_label(PointLabel::PosteriorChamber).count() > 0);
        assert!(proj.points_with_label(PointLabel::AnteriorChamber).count() > 0);
    }

    #[test]
    fn rotation_center_is_fixed_under_rotation() {
        let s = scene();
        let a = project(&EyePose::new(0.0, 0.0, 2.0), &s, None, true).unwrap();
        let b = project(&EyePose::new(30.0, -20.0, 2.0), &s, None, true).unwrap();
        let ca = a.points_with_label(PointLabel::RotationCenter).next().unwrap();
        let cb = b.points_with_label(PointLabel::RotationCenter).next().unwrap();
        assert_relative_eq!(ca[0], cb[0], epsilon = 1e-9);
        assert_relative_eq!(ca[1], cb[1], epsilon = 1e-9);
    }

    #[test]
    fn empty_surface_filter_is_a_model_inconsistency() {
        let mut s = scene();
        s.anatomy = EyeAnatomy {
            anterior_chamber_depth_mm: -1.0,
            ..EyeAnatomy::default()
        };
        match project(&EyePose::new(0.0, 0.0, 2.0), &s, None, true) {
            Err(Error::ModelInconsistency(_)) => {}
            other => panic!("expected model inconsistency, got {other:?}"),
        }
    }

    #[test]
    fn fast_path_matches_full_projection() {
        let s = scene();
        let eye = s.eye_model().unwrap();
        let pose = EyePose::new(-18.0, 12.0, 1.7);
        let full = project(&pose, &s, None, false).unwrap().ellipse;
        let fast = project_pupil_ellipse(&pose, &s, &eye, None);
        assert_eq!(full, fast);
    }

    #[test]
    fn projection_serializes() {
        let proj = project(&EyePose::new(3.0, 2.0, 2.0), &scene(), None, false).unwrap();
        let json = serde_json::to_string(&proj).unwrap();
        assert!(json.contains("pupil_perimeter"));
        assert!(json.contains("ray_trace_errors"));
    }
}
