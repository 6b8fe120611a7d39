//! Synthetic scenes and observations shared by unit tests.

use crate::conic::TransparentEllipse;
use crate::eye::EyePose;
use crate::observation::{Observation, ObservationSet};
use crate::project::{project, project_with_points};
use crate::scene::{CameraIntrinsics, SceneGeometry};

/// 640×480 camera 120 mm in front of an 11.29 mm eye.
pub(crate) fn reference_scene() -> SceneGeometry {
    SceneGeometry::pinhole(
        CameraIntrinsics::new(772.55, 320.0, 240.0),
        [0.0, 0.0, 120.0],
        11.29,
    )
}

/// Noise-free projected ellipse.
pub(crate) fn ellipse_for(pose: EyePose, scene: &SceneGeometry) -> TransparentEllipse {
    project(&pose, scene, None, false)
        .expect("valid synthetic pose")
        .ellipse
}

/// Azimuth × elevation × radius grid of poses.
pub(crate) fn pose_grid(azimuths: &[f64], elevations: &[f64], radii: &[f64]) -> Vec<EyePose> {
    let mut poses = Vec::new();
    for &r in radii {
        for &el in elevations {
            for &az in azimuths {
                poses.push(EyePose::new(az, el, r));
            }
        }
    }
    poses
}

/// One observation per pose, numbered from frame 0, with `n_perimeter`
/// perimeter points and a fit error that varies slowly across frames.
pub(crate) fn observations_for(
    poses: &[EyePose],
    scene: &SceneGeometry,
    n_perimeter: usize,
) -> ObservationSet {
    let observations = poses
        .iter()
        .enumerate()
        .map(|(frame, pose)| {
            let proj = project_with_points(pose, scene, None, false, n_perimeter)
                .expect("valid synthetic pose");
            Observation {
                frame,
                ellipse: proj.ellipse,
                fit_rmse: 0.2 + 0.05 * ((frame % 7) as f64),
                fit_param_sd: Some([0.1, 0.1, 0.04 * proj.ellipse.area, 0.01, 0.02]),
                perimeter: Some(proj.image_points),
            }
        })
        .collect();
    ObservationSet::new(observations).expect("unique frames")
}
