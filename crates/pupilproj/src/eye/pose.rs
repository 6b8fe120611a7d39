use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};

/// Eye rotation and pupil size for one frame.
///
/// Angles are in degrees, the radius in millimeters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePose {
    pub azimuth: f64,
    pub elevation: f64,
    /// Held at zero by all fitting routines.
    pub torsion: f64,
    pub pupil_radius: f64,
}

impl EyePose {
    /// Pose with zero torsion.
    pub fn new(azimuth: f64, elevation: f64, pupil_radius: f64) -> Self {
        Self {
            azimuth,
            elevation,
            torsion: 0.0,
            pupil_radius,
        }
    }

    /// All-NaN pose for frames without data.
    pub fn nan() -> Self {
        Self::from_array([f64::NAN; 4])
    }

    /// `[azimuth, elevation, torsion, pupil_radius]`.
    pub fn to_array(self) -> [f64; 4] {
        [self.azimuth, self.elevation, self.torsion, self.pupil_radius]
    }

    pub fn from_array(v: [f64; 4]) -> Self {
        Self {
            azimuth: v[0],
            elevation: v[1],
            torsion: v[2],
            pupil_radius: v[3],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }

    /// Head-fixed rotation: azimuth about p3, then elevation about p2, then
    /// torsion about p1 (`R = R_tor · R_ele · R_azi`).
    ///
    /// Positive azimuth turns the pupil toward +p2, positive elevation toward
    /// +p3.
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        let (sa, ca) = self.azimuth.to_radians().sin_cos();
        let (se, ce) = self.elevation.to_radians().sin_cos();
        let (st, ct) = self.torsion.to_radians().sin_cos();

        #[rustfmt::skip]
        let r_azi = Matrix3::new(
            ca, -sa, 0.0,
            sa,  ca, 0.0,
            0.0, 0.0, 1.0,
        );
        #[rustfmt::skip]
        let r_ele = Matrix3::new(
            ce, 0.0, -se,
            0.0, 1.0, 0.0,
            se, 0.0,  ce,
        );
        #[rustfmt::skip]
        let r_tor = Matrix3::new(
            1.0, 0.0, 0.0,
            0.0,  ct, -st,
            0.0,  st,  ct,
        );
        r_tor * r_ele * r_azi
    }
}

/// Box constraints on the pose search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoseBounds {
    pub lower: EyePose,
    pub upper: EyePose,
}

impl Default for PoseBounds {
    /// Physiological limits: ±35° azimuth, ±25° elevation, 0.25–4 mm radius.
    fn default() -> Self {
        Self {
            lower: EyePose::new(-35.0, -25.0, 0.25),
            upper: EyePose::new(35.0, 25.0, 4.0),
        }
    }
}

impl PoseBounds {
    /// Check that every bound is finite and ordered.
    pub fn validate(&self) -> Result<()> {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        for (i, name) in ["azimuth", "elevation", "torsion", "pupil_radius"]
            .iter()
            .enumerate()
        {
            if !lo[i].is_finite() || !hi[i].is_finite() {
                return Err(config_err(format!("{name} bounds must be finite")));
            }
            if lo[i] > hi[i] {
                return Err(config_err(format!(
                    "{name} lower bound {} exceeds upper bound {}",
                    lo[i], hi[i]
                )));
            }
        }
        if self.lower.pupil_radius < 0.0 {
            return Err(config_err("pupil_radius lower bound must be non-negative"));
        }
        Ok(())
    }

    /// Copy with the pupil radius pinned to `radius`.
    pub fn with_fixed_radius(mut self, radius: f64) -> Self {
        self.lower.pupil_radius = radius;
        self.upper.pupil_radius = radius;
        self
    }

    /// Clamp each component of `pose` into the bounds.
    pub fn clamp(&self, pose: EyePose) -> EyePose {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        let mut v = pose.to_array();
        for i in 0..4 {
            v[i] = v[i].clamp(lo[i], hi[i]);
        }
        EyePose::from_array(v)
    }

    pub fn contains(&self, pose: &EyePose) -> bool {
        let lo = self.lower.to_array();
        let hi = self.upper.to_array();
        pose.to_array()
            .iter()
            .enumerate()
            .all(|(i, v)| *v >= lo[i] && *v <= hi[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    #[test]
    fn rotation_directions() {
        let axis = Vector3::new(1.0, 0.0, 0.0);
        let right = EyePose::new(10.0, 0.0, 2.0).rotation_matrix() * axis;
        assert!(right.y > 0.0);
        assert_relative_eq!(right.z, 0.0);
        let up = EyePose::new(0.0, 10.0, 2.0).rotation_matrix() * axis;
        assert!(up.z > 0.0);
        assert_relative_eq!(up.y, 0.0);
    }

    #[test]
    fn rotation_order_is_not_fick() {
        let pose = EyePose::new(30.0, 20.0, 2.0);
        let axis = Vector3::new(1.0, 0.0, 0.0);
        let head_fixed = pose.rotation_matrix() * axis;
        let azi_only = EyePose::new(30.0, 0.0, 2.0).rotation_matrix();
        let ele_only = EyePose::new(0.0, 20.0, 2.0).rotation_matrix();
        let fick = azi_only * ele_only * axis;
        assert!((head_fixed - fick).norm() > 1e-3);
        assert_relative_eq!(pose.rotation_matrix().determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn bounds_validation() {
        assert!(PoseBounds::default().validate().is_ok());
        let mut bad = PoseBounds::default();
        bad.lower.azimuth = 40.0;
        assert!(bad.validate().is_err());
        let mut nan = PoseBounds::default();
        nan.upper.elevation = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn fixed_radius_clamps() {
        let b = PoseBounds::default().with_fixed_radius(2.5);
        let p = b.clamp(EyePose::new(50.0, -40.0, 1.0));
        assert_eq!(p, EyePose::new(35.0, -25.0, 2.5));
        assert!(b.contains(&p));
    }
}
