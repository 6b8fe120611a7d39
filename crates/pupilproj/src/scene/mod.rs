//! Camera and scene geometry.
//!
//! Scene-world coordinates follow the camera convention: X right, Y down,
//! Z away from the camera. An eyeWorld point `[p1, p2, p3]` maps to
//! `[p2, -p3, -p1]`, so that increasing elevation moves the image point
//! upward.

mod camera;

pub use camera::{CameraIntrinsics, RadialDistortion};

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};
use crate::eye::{EyeAnatomy, EyeModel};
use camera::{matrix_from_rows, vector_from_array};

/// Camera placement and eye size that define the forward projection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneGeometry {
    /// Camera matrix in pixel units (row-major).
    pub intrinsic_camera_matrix: [[f64; 3]; 3],
    /// Rotation from scene-world to camera coordinates (row-major).
    pub extrinsic_rotation_matrix: [[f64; 3]; 3],
    /// Translation from scene-world to camera coordinates (mm).
    pub extrinsic_translation_vector: [f64; 3],
    /// Radial distortion `[k1, k2]`.
    pub radial_distortion_vector: [f64; 2],
    /// Eye radius (mm).
    pub eye_radius: f64,
    /// Tolerance on shape and area mismatch for the inverse solver.
    pub constraint_tolerance: f64,
    /// Population anatomy the eye model is derived from.
    #[serde(default)]
    pub anatomy: EyeAnatomy,
}

impl SceneGeometry {
    /// Default constraint tolerance.
    pub const DEFAULT_CONSTRAINT_TOLERANCE: f64 = 0.02;

    /// Distortion-free camera with identity rotation.
    pub fn pinhole(
        intrinsics: CameraIntrinsics,
        translation_mm: [f64; 3],
        eye_radius: f64,
    ) -> Self {
        Self {
            intrinsic_camera_matrix: intrinsics.to_matrix(),
            extrinsic_rotation_matrix: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            extrinsic_translation_vector: translation_mm,
            radial_distortion_vector: [0.0, 0.0],
            eye_radius,
            constraint_tolerance: Self::DEFAULT_CONSTRAINT_TOLERANCE,
            anatomy: EyeAnatomy::default(),
        }
    }

    pub fn intrinsics(&self) -> CameraIntrinsics {
        CameraIntrinsics::from_matrix(&self.intrinsic_camera_matrix)
    }

    pub fn distortion(&self) -> RadialDistortion {
        RadialDistortion::from_vector(self.radial_distortion_vector)
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        matrix_from_rows(&self.extrinsic_rotation_matrix)
    }

    pub fn translation(&self) -> Vector3<f64> {
        vector_from_array(&self.extrinsic_translation_vector)
    }

    /// Copy with a different camera translation.
    pub fn with_translation(mut self, translation_mm: [f64; 3]) -> Self {
        self.extrinsic_translation_vector = translation_mm;
        self
    }

    /// Copy with a different eye radius.
    pub fn with_eye_radius(mut self, eye_radius: f64) -> Self {
        self.eye_radius = eye_radius;
        self
    }

    /// Build the eye model implied by this scene.
    pub fn eye_model(&self) -> Result<EyeModel> {
        EyeModel::new(self.eye_radius, &self.anatomy)
    }

    /// Check that the camera parameters are usable.
    pub fn validate(&self) -> Result<()> {
        if !self.intrinsics().is_valid() {
            return Err(config_err(
                "intrinsic camera matrix must have positive finite focal lengths",
            ));
        }
        let r = self.rotation();
        if r.iter().any(|v| !v.is_finite()) || (r.determinant() - 1.0).abs() > 1e-6 {
            return Err(config_err("extrinsic rotation matrix must be a proper rotation"));
        }
        if self.extrinsic_translation_vector.iter().any(|v| !v.is_finite()) {
            return Err(config_err("extrinsic translation must be finite"));
        }
        if self.radial_distortion_vector.iter().any(|v| !v.is_finite()) {
            return Err(config_err("radial distortion must be finite"));
        }
        if !self.constraint_tolerance.is_finite() || self.constraint_tolerance < 0.0 {
            return Err(config_err("constraint tolerance must be non-negative"));
        }
        self.eye_model().map(|_| ())
    }

    /// Camera optical center expressed in eyeWorld coordinates.
    pub fn camera_position_eye_world(&self) -> Vector3<f64> {
        let c = -(self.rotation().transpose() * self.translation());
        scene_to_eye_world(&c)
    }

    /// Project a scene-world point to (distorted) pixel coordinates.
    ///
    /// Points at or behind the camera plane map to NaN.
    pub fn project_scene_point(&self, x: &Vector3<f64>) -> [f64; 2] {
        let p = self.rotation() * x + self.translation();
        if !(p.z > 0.0) {
            return [f64::NAN, f64::NAN];
        }
        let normalized = [p.x / p.z, p.y / p.z];
        let distorted = self.distortion().distort_normalized(normalized);
        self.intrinsics().normalized_to_pixel(distorted)
    }

    /// Project an eyeWorld point to pixels.
    pub fn project_eye_point(&self, p: &Vector3<f64>) -> [f64; 2] {
        self.project_scene_point(&eye_to_scene_world(p))
    }
}

/// eyeWorld `[p1, p2, p3]` → scene-world `[p2, -p3, -p1]`.
pub fn eye_to_scene_world(p: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(p.y, -p.z, -p.x)
}

/// Inverse of [`eye_to_scene_world`].
pub fn scene_to_eye_world(x: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(-x.z, x.x, -x.y)
}
