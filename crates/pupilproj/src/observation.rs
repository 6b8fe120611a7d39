//! Per-frame pupil observations and per-frame pose estimates.

use serde::{Deserialize, Serialize};

use crate::conic::{fit_ellipse_algebraic, rms_sampson_distance, TransparentEllipse};
use crate::error::{config_err, Result};
use crate::eye::EyePose;

/// Detected pupil outline for one video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Frame index in the source video.
    pub frame: usize,
    /// Ellipse fitted to the pupil perimeter (all-NaN when the frame has no
    /// usable perimeter).
    pub ellipse: TransparentEllipse,
    /// RMS distance of the perimeter points from `ellipse` (pixels).
    pub fit_rmse: f64,
    /// Standard deviations of `[x, y, area, eccentricity, theta]`.
    #[serde(default)]
    pub fit_param_sd: Option<[f64; 5]>,
    /// Raw perimeter points (pixels).
    #[serde(default)]
    pub perimeter: Option<Vec<[f64; 2]>>,
}

impl Observation {
    /// Observation carrying only a fitted ellipse and its fit error.
    pub fn from_ellipse(frame: usize, ellipse: TransparentEllipse, fit_rmse: f64) -> Self {
        Self {
            frame,
            ellipse,
            fit_rmse,
            fit_param_sd: None,
            perimeter: None,
        }
    }

    /// Fit the pupil ellipse to raw perimeter points and keep the points for
    /// perimeter refits. The ellipse and RMSE are NaN when no ellipse fits.
    pub fn from_perimeter(frame: usize, perimeter: Vec<[f64; 2]>) -> Self {
        let (ellipse, fit_rmse) = match fit_ellipse_algebraic(&perimeter) {
            Some(e) => (e.to_transparent(), rms_sampson_distance(&e, &perimeter)),
            None => (TransparentEllipse::nan(), f64::NAN),
        };
        Self {
            frame,
            ellipse,
            fit_rmse,
            fit_param_sd: None,
            perimeter: Some(perimeter),
        }
    }

    /// True when the ellipse is usable for fitting.
    pub fn is_valid(&self) -> bool {
        self.ellipse.is_valid() && self.fit_rmse.is_finite() && self.fit_rmse >= 0.0
    }

    /// Standard deviation of the ellipse area, when known.
    pub fn area_sd(&self) -> Option<f64> {
        self.fit_param_sd.map(|sd| sd[2]).filter(|v| v.is_finite())
    }
}

/// Observations ordered by strictly increasing frame index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Observation>", into = "Vec<Observation>")]
pub struct ObservationSet {
    observations: Vec<Observation>,
}

impl ObservationSet {
    /// Sort by frame. Duplicate frame indices are a configuration error.
    pub fn new(mut observations: Vec<Observation>) -> Result<Self> {
        observations.sort_by_key(|o| o.frame);
        if let Some(w) = observations.windows(2).find(|w| w[0].frame == w[1].frame) {
            return Err(config_err(format!("duplicate observation for frame {}", w[0].frame)));
        }
        Ok(Self { observations })
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn as_slice(&self) -> &[Observation] {
        &self.observations
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Observation> {
        self.observations.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Observation> {
        self.observations.get(index)
    }

    /// Number of observations with a usable ellipse.
    pub fn valid_count(&self) -> usize {
        self.observations.iter().filter(|o| o.is_valid()).count()
    }
}

impl TryFrom<Vec<Observation>> for ObservationSet {
    type Error = crate::Error;

    fn try_from(observations: Vec<Observation>) -> Result<Self> {
        Self::new(observations)
    }
}

impl From<ObservationSet> for Vec<Observation> {
    fn from(set: ObservationSet) -> Self {
        set.observations
    }
}

impl<'a> IntoIterator for &'a ObservationSet {
    type Item = &'a Observation;
    type IntoIter = std::slice::Iter<'a, Observation>;

    fn into_iter(self) -> Self::IntoIter {
        self.observations.iter()
    }
}

/// Scene-constrained pose for one frame, input to the radius smoother.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseEstimate {
    pub frame: usize,
    pub pose: EyePose,
    /// Standard deviation of the pupil radius (mm); NaN when unknown.
    pub radius_sd: f64,
    /// Perimeter fit error of the source observation (pixels).
    pub fit_rmse: f64,
    /// Shape or area mismatch exceeded the scene's constraint tolerance.
    pub relaxed: bool,
}

impl PoseEstimate {
    /// Estimate for a frame without data.
    pub fn missing(frame: usize) -> Self {
        Self {
            frame,
            pose: EyePose::nan(),
            radius_sd: f64::NAN,
            fit_rmse: f64::NAN,
            relaxed: false,
        }
    }

    /// True when radius and its uncertainty are both available.
    pub fn has_radius(&self) -> bool {
        self.pose.pupil_radius.is_finite() && self.radius_sd.is_finite()
    }
}
