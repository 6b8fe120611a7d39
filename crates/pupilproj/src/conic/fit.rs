//! Algebraic conic fitting.
//!
//! The forward model fits an ellipse through exactly five projected pupil
//! perimeter points, where the conic is fully determined. The same
//! normalized algebraic fit handles larger point sets in the least-squares
//! sense (smallest eigenvector of the scatter matrix under a unit-norm
//! constraint).

use nalgebra::{Matrix6, SymmetricEigen, Vector6};

use super::types::{ConicCoeffs, Ellipse, TransparentEllipse};

/// Minimum number of points that determine a conic.
pub const MIN_CONIC_POINTS: usize = 5;

/// Fit a conic through at least five points by normalized algebraic least
/// squares.
///
/// Returns `None` for too few points, non-finite input or when the best conic
/// is not a proper ellipse.
pub fn fit_conic_algebraic(points: &[[f64; 2]]) -> Option<ConicCoeffs> {
    if points.len() < MIN_CONIC_POINTS {
        return None;
    }
    if points.iter().any(|p| !p[0].is_finite() || !p[1].is_finite()) {
        return None;
    }

    let (mean_x, mean_y, scale) = normalization_params(points);

    // Scatter matrix S = Dᵀ D for D rows [x², xy, y², x, y, 1].
    let mut s = Matrix6::<f64>::zeros();
    for &[px, py] in points {
        let x = (px - mean_x) * scale;
        let y = (py - mean_y) * scale;
        let row = Vector6::new(x * x, x * y, y * y, x, y, 1.0);
        s += row * row.transpose();
    }

    let eig = SymmetricEigen::new(s);
    let min_idx = eig.eigenvalues.imin();
    let coeffs_norm: Vector6<f64> = eig.eigenvectors.column(min_idx).into_owned();
    if coeffs_norm.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let conic = ConicCoeffs(denormalize_conic(&coeffs_norm, mean_x, mean_y, scale));
    if !conic.is_ellipse() {
        return None;
    }
    let ellipse = conic.to_ellipse()?;
    if !ellipse.is_valid() {
        return None;
    }
    Some(conic)
}

/// Fit and return explicit ellipse parameters.
pub fn fit_ellipse_algebraic(points: &[[f64; 2]]) -> Option<Ellipse> {
    fit_conic_algebraic(points)?.to_ellipse()
}

/// Fit and return the transparent form; all-NaN when no ellipse fits.
pub fn fit_transparent(points: &[[f64; 2]]) -> TransparentEllipse {
    fit_ellipse_algebraic(points)
        .map(|e| e.to_transparent())
        .unwrap_or_else(TransparentEllipse::nan)
}

/// Centroid and the isotropic scale that brings the mean distance from it
/// to √2: `(mean_x, mean_y, scale)`.
fn normalization_params(points: &[[f64; 2]]) -> (f64, f64, f64) {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    let (mean_x, mean_y) = (sx / n, sy / n);
    let mean_dist = points
        .iter()
        .map(|p| (p[0] - mean_x).hypot(p[1] - mean_y))
        .sum::<f64>()
        / n;
    let scale = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };
    (mean_x, mean_y, scale)
}

/// Map conic coefficients fitted in normalized coordinates
/// x' = s(x − mx), y' = s(y − my) back to the original frame.
fn denormalize_conic(c: &Vector6<f64>, mx: f64, my: f64, s: f64) -> [f64; 6] {
    let [a_, b_, c_, d_, e_, f_] = [c[0], c[1], c[2], c[3], c[4], c[5]];
    let s2 = s * s;

    let a = a_ * s2;
    let b = b_ * s2;
    let c = c_ * s2;
    let d = -2.0 * a_ * s2 * mx - b_ * s2 * my + d_ * s;
    let e = -b_ * s2 * mx - 2.0 * c_ * s2 * my + e_ * s;
    let f =
        a_ * s2 * mx * mx + b_ * s2 * mx * my + c_ * s2 * my * my - d_ * s * mx - e_ * s * my + f_;

    [a, b, c, d, e, f]
}

/// Compute RMS Sampson distance of points to an ellipse.
pub fn rms_sampson_distance(ellipse: &Ellipse, points: &[[f64; 2]]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = points
        .iter()
        .map(|&[x, y]| ellipse.sampson_distance(x, y).powi(2))
        .sum();
    (sum_sq / points.len() as f64).sqrt()
}
