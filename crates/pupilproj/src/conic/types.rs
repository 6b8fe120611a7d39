//! Conic and ellipse parameterizations with conversions.
//!
//! Three forms are used across the crate:
//! - implicit conic coefficients `A x² + B xy + C y² + D x + E y + F = 0`,
//! - explicit ellipse (center, semi-axes, major-axis angle),
//! - transparent ellipse (center, area, eccentricity, theta).

use std::f64::consts::{FRAC_PI_2, PI};

use nalgebra::{Matrix2, Rotation2, SymmetricEigen, Vector2};
use serde::{Deserialize, Serialize};

/// General conic: A x² + B xy + C y² + D x + E y + F = 0.
/// Stored as [A, B, C, D, E, F].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConicCoeffs(pub [f64; 6]);

/// Explicit ellipse parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ellipse {
    /// Center x (pixels).
    pub cx: f64,
    /// Center y (pixels).
    pub cy: f64,
    /// Semi-major axis length.
    pub a: f64,
    /// Semi-minor axis length.
    pub b: f64,
    /// Rotation angle of the major axis from +x, in radians (−π/2, π/2].
    pub angle: f64,
}

/// Transparent ellipse form used for pupil observations.
///
/// `theta` is the major-axis orientation in [0, π). A degenerate ellipse
/// (zero pupil radius, failed fit) is all-NaN.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TransparentEllipse {
    /// Center x (pixels).
    pub center_x: f64,
    /// Center y (pixels).
    pub center_y: f64,
    /// Area (px²).
    pub area: f64,
    /// Eccentricity in [0, 1).
    pub eccentricity: f64,
    /// Major-axis orientation in [0, π) radians.
    pub theta: f64,
}

impl ConicCoeffs {
    /// Algebraic distance of a point (x, y) to this conic.
    pub fn algebraic_distance(&self, x: f64, y: f64) -> f64 {
        let [a, b, c, d, e, f] = self.0;
        a * x * x + b * x * y + c * y * y + d * x + e * y + f
    }

    /// Check whether the conic represents an ellipse (discriminant B²−4AC < 0).
    pub fn is_ellipse(&self) -> bool {
        let [a, b, c, ..] = self.0;
        b * b - 4.0 * a * c < 0.0
    }

    /// Convert to explicit ellipse parameters.
    /// Returns `None` if the conic is not an ellipse.
    pub fn to_ellipse(self) -> Option<Ellipse> {
        conic_to_ellipse(&self)
    }
}

impl Ellipse {
    /// Check basic validity: positive semi-axes, finite values.
    pub fn is_valid(&self) -> bool {
        self.a > 0.0
            && self.b > 0.0
            && self.a.is_finite()
            && self.b.is_finite()
            && self.cx.is_finite()
            && self.cy.is_finite()
            && self.angle.is_finite()
    }

    /// Convert back to conic coefficients.
    pub fn to_conic(self) -> ConicCoeffs {
        ellipse_to_conic(&self)
    }

    /// `n` evenly spaced boundary points.
    #[cfg(test)]
    pub(crate) fn sample_points(&self, n: usize) -> Vec<[f64; 2]> {
        let cos_a = self.angle.cos();
        let sin_a = self.angle.sin();
        (0..n)
            .map(|i| {
                let t = 2.0 * PI * (i as f64) / (n as f64);
                let px = self.a * t.cos();
                let py = self.b * t.sin();
                let x = self.cx + cos_a * px - sin_a * py;
                let y = self.cy + sin_a * px + cos_a * py;
                [x, y]
            })
            .collect()
    }

    /// Signed first-order geometric distance (Sampson) from a point to the
    /// boundary: negative inside, positive outside.
    pub fn signed_sampson_distance(&self, x: f64, y: f64) -> f64 {
        let c = self.to_conic();
        let [ca, cb, cc, cd, ce, _cf] = c.0;
        let alg = c.algebraic_distance(x, y);
        let gx = 2.0 * ca * x + cb * y + cd;
        let gy = cb * x + 2.0 * cc * y + ce;
        let grad_mag_sq = gx * gx + gy * gy;
        if grad_mag_sq < 1e-30 {
            return alg;
        }
        alg / grad_mag_sq.sqrt()
    }

    /// Approximate geometric distance from a point to the ellipse boundary.
    pub fn sampson_distance(&self, x: f64, y: f64) -> f64 {
        self.signed_sampson_distance(x, y).abs()
    }

    /// Convert to the transparent parameterization.
    pub fn to_transparent(&self) -> TransparentEllipse {
        if !self.is_valid() {
            return TransparentEllipse::nan();
        }
        let (a, b, angle) = if self.a >= self.b {
            (self.a, self.b, self.angle)
        } else {
            (self.b, self.a, self.angle + FRAC_PI_2)
        };
        let ratio = (b / a).min(1.0);
        TransparentEllipse {
            center_x: self.cx,
            center_y: self.cy,
            area: PI * a * b,
            eccentricity: (1.0 - ratio * ratio).sqrt(),
            theta: normalize_theta(angle),
        }
    }
}

impl TransparentEllipse {
    /// The all-NaN degenerate ellipse.
    pub fn nan() -> Self {
        Self {
            center_x: f64::NAN,
            center_y: f64::NAN,
            area: f64::NAN,
            eccentricity: f64::NAN,
            theta: f64::NAN,
        }
    }

    /// Build from a `[x, y, area, eccentricity, theta]` tuple, normalizing theta.
    pub fn from_array(v: [f64; 5]) -> Self {
        Self {
            center_x: v[0],
            center_y: v[1],
            area: v[2],
            eccentricity: v[3],
            theta: normalize_theta(v[4]),
        }
    }

    /// The `[x, y, area, eccentricity, theta]` tuple.
    pub fn to_array(&self) -> [f64; 5] {
        [
            self.center_x,
            self.center_y,
            self.area,
            self.eccentricity,
            self.theta,
        ]
    }

    /// True when every parameter is finite and the area is positive.
    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.area > 0.0
            && (0.0..1.0).contains(&self.eccentricity)
    }

    /// True when any parameter is NaN.
    pub fn has_nan(&self) -> bool {
        self.to_array().iter().any(|v| v.is_nan())
    }

    /// Center as `[x, y]`.
    pub fn center(&self) -> [f64; 2] {
        [self.center_x, self.center_y]
    }

    /// Convert to explicit parameters. Returns `None` for invalid ellipses.
    pub fn to_explicit(&self) -> Option<Ellipse> {
        if !self.is_valid() {
            return None;
        }
        // area = π a b, b = a sqrt(1 - e²)
        let ratio = (1.0 - self.eccentricity * self.eccentricity).sqrt();
        let a = (self.area / (PI * ratio)).sqrt();
        let b = a * ratio;
        Some(Ellipse {
            cx: self.center_x,
            cy: self.center_y,
            a,
            b,
            angle: normalize_angle(self.theta),
        })
    }

    /// Shape descriptor `(e cos 2θ, e sin 2θ)`.
    ///
    /// Continuous through the circular case where theta is undefined.
    pub fn shape_vector(&self) -> [f64; 2] {
        let two_theta = 2.0 * self.theta;
        [
            self.eccentricity * two_theta.cos(),
            self.eccentricity * two_theta.sin(),
        ]
    }
}

/// Explicit parameters of the ellipse described by `c`.
///
/// The quadratic part `Q = [[A, B/2], [B/2, C]]` must be definite; the
/// center solves `2Q·x = −(D, E)` and the semi-axes follow from the
/// eigenvalues of `Q` scaled by the conic value at the center. `None` for
/// parabolas, hyperbolas and imaginary or point ellipses.
pub fn conic_to_ellipse(c: &ConicCoeffs) -> Option<Ellipse> {
    let [a, b, cc, d, e, f] = c.0;
    let q = Matrix2::new(a, 0.5 * b, 0.5 * b, cc);
    if q.determinant() <= 0.0 {
        return None;
    }
    let center = (2.0 * q).lu().solve(&Vector2::new(-d, -e))?;
    // value of the conic at its center
    let k = 0.5 * (d * center.x + e * center.y) + f;
    if !k.is_finite() || k == 0.0 {
        return None;
    }

    let eig = SymmetricEigen::new(q / -k);
    let (minor_idx, major_idx) = if eig.eigenvalues[0] >= eig.eigenvalues[1] {
        (0, 1)
    } else {
        (1, 0)
    };
    let (l_major, l_minor) = (eig.eigenvalues[major_idx], eig.eigenvalues[minor_idx]);
    if !(l_major > 0.0 && l_minor > 0.0) {
        return None;
    }
    let axis = eig.eigenvectors.column(major_idx);

    Some(Ellipse {
        cx: center.x,
        cy: center.y,
        a: l_major.recip().sqrt(),
        b: l_minor.recip().sqrt(),
        angle: normalize_angle(axis[1].atan2(axis[0])),
    })
}

/// Conic coefficients of `e`, scaled so that `F = cᵀ Q c − 1` with `Q`
/// the quadratic form `R diag(1/a², 1/b²) Rᵀ`.
pub fn ellipse_to_conic(e: &Ellipse) -> ConicCoeffs {
    let rot = Rotation2::new(e.angle);
    let q = rot.matrix()
        * Matrix2::from_diagonal(&Vector2::new(e.a.powi(-2), e.b.powi(-2)))
        * rot.matrix().transpose();
    let c = Vector2::new(e.cx, e.cy);
    let g = -2.0 * q * c;
    let f = c.dot(&(q * c)) - 1.0;
    ConicCoeffs([q[(0, 0)], 2.0 * q[(0, 1)], q[(1, 1)], g.x, g.y, f])
}

/// Map an axis angle into (−π/2, π/2].
fn normalize_angle(angle: f64) -> f64 {
    let t = (angle + FRAC_PI_2).rem_euclid(PI) - FRAC_PI_2;
    if t <= -FRAC_PI_2 {
        t + PI
    } else {
        t
    }
}

/// Normalize an axis orientation to [0, π).
pub fn normalize_theta(theta: f64) -> f64 {
    if !theta.is_finite() {
        return theta;
    }
    let t = theta.rem_euclid(PI);
    // rem_euclid can round up to exactly π for tiny negative inputs
    if t >= PI {
        0.0
    } else {
        t
    }
}
