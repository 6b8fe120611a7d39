//! Ellipse representations and fitting primitives.
//!
//! Implements:
//! - Normalized algebraic conic fit (exact through five points, least squares
//!   beyond).
//! - Conversion between conic coefficients, explicit and transparent ellipse
//!   parameters.
//! - Sampson residuals.

mod fit;
mod types;

pub use fit::{
    fit_conic_algebraic, fit_ellipse_algebraic, fit_transparent, rms_sampson_distance,
    MIN_CONIC_POINTS,
};
pub use types::{
    conic_to_ellipse, ellipse_to_conic, normalize_theta, ConicCoeffs, Ellipse, TransparentEllipse,
};
