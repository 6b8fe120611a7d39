use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics in pixel units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length along x (pixels).
    pub fx: f64,
    /// Focal length along y (pixels).
    pub fy: f64,
    /// Skew term (pixels); zero for square-pixel sensors.
    #[serde(default)]
    pub skew: f64,
    /// Principal point x (pixels).
    pub cx: f64,
    /// Principal point y (pixels).
    pub cy: f64,
}

impl CameraIntrinsics {
    /// Square-pixel intrinsics with a single focal length.
    pub fn new(focal_px: f64, cx: f64, cy: f64) -> Self {
        Self {
            fx: focal_px,
            fy: focal_px,
            skew: 0.0,
            cx,
            cy,
        }
    }

    /// Read intrinsics from a 3×3 camera matrix (row-major).
    pub fn from_matrix(k: &[[f64; 3]; 3]) -> Self {
        Self {
            fx: k[0][0],
            fy: k[1][1],
            skew: k[0][1],
            cx: k[0][2],
            cy: k[1][2],
        }
    }

    /// The 3×3 camera matrix (row-major).
    pub fn to_matrix(self) -> [[f64; 3]; 3] {
        [
            [self.fx, self.skew, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    /// Map normalized image coordinates to pixels.
    pub fn normalized_to_pixel(self, xy: [f64; 2]) -> [f64; 2] {
        [
            self.fx * xy[0] + self.skew * xy[1] + self.cx,
            self.fy * xy[1] + self.cy,
        ]
    }

    pub(crate) fn is_valid(self) -> bool {
        self.fx.is_finite()
            && self.fy.is_finite()
            && self.fx > 0.0
            && self.fy > 0.0
            && self.skew.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
    }
}

/// Two-term radial lens distortion applied in normalized coordinates:
/// `x_d = x (1 + k1 r² + k2 r⁴)`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct RadialDistortion {
    /// Coefficient of r².
    pub k1: f64,
    /// Coefficient of r⁴.
    pub k2: f64,
}

impl RadialDistortion {
    /// Build from a `[k1, k2]` vector.
    pub fn from_vector(v: [f64; 2]) -> Self {
        Self { k1: v[0], k2: v[1] }
    }

    /// True when both coefficients are zero.
    pub fn is_identity(self) -> bool {
        self.k1 == 0.0 && self.k2 == 0.0
    }

    /// Apply distortion to normalized coordinates.
    pub fn distort_normalized(self, normalized_xy: [f64; 2]) -> [f64; 2] {
        if self.is_identity() {
            return normalized_xy;
        }
        let x = normalized_xy[0];
        let y = normalized_xy[1];
        let r2 = x * x + y * y;
        let radial = 1.0 + self.k1 * r2 + self.k2 * r2 * r2;
        [x * radial, y * radial]
    }
}

/// Rotation matrix from row-major arrays.
pub(crate) fn matrix_from_rows(m: &[[f64; 3]; 3]) -> Matrix3<f64> {
    Matrix3::new(
        m[0][0], m[0][1], m[0][2], m[1][0], m[1][1], m[1][2], m[2][0], m[2][1], m[2][2],
    )
}

pub(crate) fn vector_from_array(v: &[f64; 3]) -> Vector3<f64> {
    Vector3::new(v[0], v[1], v[2])
}
