//! Scene calibration from observed pupil ellipses.
//!
//! The camera translation (and, when its bounds allow, the eye radius) is
//! searched so that scene-constrained pose fits reproduce a representative,
//! error-weighted sample of observed ellipses.

mod config;
mod estimator;
mod objective;
mod result;
mod select;

pub use config::{CalibrateConfig, CalibrationBounds, ObjectiveKind, CALIBRATION_PARAMETERS};
pub use estimator::calibrate;
pub use objective::EllipseResidual;
pub use result::CalibrationResult;
