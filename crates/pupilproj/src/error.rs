//! Crate error type.
//!
//! Only batch-fatal conditions are errors. Per-frame fit relaxation is reported
//! through [`crate::InverseSolution::relaxed`] and missing data propagates as
//! NaN values.

use thiserror::Error;

/// Fatal errors surfaced by the projection, calibration and smoothing entry
/// points.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Inconsistent or empty parameter bounds, invalid configuration values,
    /// or missing required observation fields.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// Eye model geometry filters removed every candidate point.
    #[error("eye model inconsistency: {0}")]
    ModelInconsistency(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn config_err(msg: impl Into<String>) -> Error {
    Error::Configuration(msg.into())
}
