//! pupilproj: forward and inverse geometry of the pupil seen by an eye
//! camera.
//!
//! The crate models a circular pupil on a rotating eye, projects it through
//! an optional corneal refraction stage into a pinhole camera with radial
//! distortion, and fits the model back to observed pupil ellipses:
//!
//! 1. **Eye** – anatomical eye model derived from the eye radius, and the
//!    eye pose (azimuth, elevation, torsion, pupil radius).
//! 2. **Project** – pose → image-plane pupil ellipse (plus labeled point sets
//!    of the full model), optionally tracing rays through the cornea.
//! 3. **Inverse** – observed ellipse (or raw perimeter) → eye pose under a
//!    given scene, with shape and area matching constraints.
//! 4. **Calibrate** – observed ellipses across many frames → camera
//!    translation (and optionally eye radius).
//! 5. **Smooth** – empirical-Bayes temporal smoothing of the per-frame pupil
//!    radius followed by a pinned-radius refit.
//!
//! Only batch-fatal problems are errors ([`Error`]). A pose fit that cannot
//! meet the constraint tolerance is returned with
//! [`InverseSolution::relaxed`] set, and frames without data produce NaN
//! values.

mod calibrate;
mod conic;
mod error;
mod eye;
mod inverse;
mod observation;
mod optimize;
mod project;
mod scene;
mod smooth;

#[cfg(test)]
mod test_utils;

pub use calibrate::{
    calibrate, CalibrateConfig, CalibrationBounds, CalibrationResult, EllipseResidual,
    ObjectiveKind, CALIBRATION_PARAMETERS,
};
pub use conic::{
    conic_to_ellipse, ellipse_to_conic, fit_conic_algebraic, fit_ellipse_algebraic,
    fit_transparent, normalize_theta, rms_sampson_distance, ConicCoeffs, Ellipse,
    TransparentEllipse, MIN_CONIC_POINTS,
};
pub use error::{Error, Result};
pub use eye::{Ellipsoid, EyeAnatomy, EyeModel, EyePose, PoseBounds, Sphere};
pub use inverse::{
    ellipse_errors, estimate_poses, fit_perimeter, solve, InverseConfig, InverseSolution,
};
pub use observation::{Observation, ObservationSet, PoseEstimate};
pub use optimize::{
    minimize_bounded, pattern_search, LmConfig, LmOutcome, PatternSearchConfig,
    PatternSearchOutcome, PatternSearchStop, ResidualModel, ScalarObjective,
};
pub use project::{
    project, project_with_points, PointLabel, Projection, RayTraceTables,
    DEFAULT_PERIMETER_POINTS,
};
pub use scene::{
    eye_to_scene_world, scene_to_eye_world, CameraIntrinsics, RadialDistortion, SceneGeometry,
};
pub use smooth::{smooth, Gaussian, SmoothConfig, SmoothedFrame};
