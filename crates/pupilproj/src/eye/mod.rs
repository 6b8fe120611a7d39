//! Anatomical eye model and eye pose.
//!
//! Coordinates are "eyeWorld": millimeters, origin at the corneal apex,
//! axes `[p1, p2, p3]` with p1 along the optical axis (positive toward the
//! camera), p2 horizontal and p3 vertical (positive up).

mod pose;

pub use pose::{EyePose, PoseBounds};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};

/// Population-level anatomical constants.
///
/// Everything that is not derived from the eye radius lives here so that
/// per-subject measurements can override the defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EyeAnatomy {
    /// Distance from the corneal apex back to the iris plane (mm).
    pub anterior_chamber_depth_mm: f64,
    /// Iris radius (mm).
    pub iris_radius_mm: f64,
    /// Radius of curvature of the corneal front surface (mm).
    pub cornea_front_radius_mm: f64,
    /// Radius of curvature of the corneal back surface (mm).
    pub cornea_back_radius_mm: f64,
    /// Central corneal thickness (mm).
    pub cornea_thickness_mm: f64,
    /// Ratio of the lateral to the axial semi-axis of the posterior chamber.
    pub posterior_chamber_lateral_ratio: f64,
    /// Axial length beyond twice the eye radius (mm).
    pub axial_length_offset_mm: f64,
    /// Rotation center depth as a fraction of the axial length.
    pub rotation_center_fraction: f64,
    /// Refractive index of the aqueous humor.
    pub aqueous_index: f64,
    /// Refractive index of the cornea.
    pub cornea_index: f64,
    /// Refractive index of the medium between cornea and camera.
    pub air_index: f64,
}

impl Default for EyeAnatomy {
    fn default() -> Self {
        Self {
            anterior_chamber_depth_mm: 3.7,
            iris_radius_mm: 5.9,
            cornea_front_radius_mm: 7.8,
            cornea_back_radius_mm: 6.5,
            cornea_thickness_mm: 0.55,
            posterior_chamber_lateral_ratio: 1.04,
            axial_length_offset_mm: 1.5,
            rotation_center_fraction: 0.55,
            aqueous_index: 1.3374,
            cornea_index: 1.376,
            air_index: 1.0,
        }
    }
}

/// Sphere in eyeWorld coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sphere {
    pub center: Vector3<f64>,
    pub radius: f64,
}

/// Axis-aligned ellipsoid in eyeWorld coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    pub center: Vector3<f64>,
    /// Semi-axes along p1, p2, p3.
    pub radii: Vector3<f64>,
}

impl Ellipsoid {
    /// Point on the surface at polar angle `polar` (from +p1) and azimuth `phi`.
    pub(crate) fn surface_point(&self, polar: f64, phi: f64) -> Vector3<f64> {
        self.center
            + Vector3::new(
                self.radii.x * polar.cos(),
                self.radii.y * polar.sin() * phi.cos(),
                self.radii.z * polar.sin() * phi.sin(),
            )
    }
}

/// Derived eye geometry for one eye radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EyeModel {
    /// Eye radius (mm) the model was built from.
    pub eye_radius: f64,
    /// Center of the pupil aperture.
    pub pupil_center: Vector3<f64>,
    /// Center of the iris.
    pub iris_center: Vector3<f64>,
    /// Iris radius (mm).
    pub iris_radius: f64,
    /// Center of eye rotation.
    pub rotation_center: Vector3<f64>,
    /// Posterior chamber (vitreous body) ellipsoid.
    pub posterior_chamber: Ellipsoid,
    /// Corneal front surface; bounds the anterior chamber.
    pub cornea_front: Sphere,
    /// Corneal back surface.
    pub cornea_back: Sphere,
    /// Refractive indices `[aqueous, cornea, air]` along a ray leaving the eye.
    pub refractive_indices: [f64; 3],
}

impl EyeModel {
    /// Build the eye model for `eye_radius` (mm).
    pub fn new(eye_radius: f64, anatomy: &EyeAnatomy) -> Result<Self> {
        if !eye_radius.is_finite() || eye_radius <= 0.0 {
            return Err(config_err(format!(
                "eye radius must be positive and finite, got {eye_radius}"
            )));
        }

        let axial_length = 2.0 * eye_radius + anatomy.axial_length_offset_mm;
        let iris_plane = -anatomy.anterior_chamber_depth_mm;
        let lateral = eye_radius * anatomy.posterior_chamber_lateral_ratio;

        Ok(Self {
            eye_radius,
            pupil_center: Vector3::new(iris_plane, 0.0, 0.0),
            iris_center: Vector3::new(iris_plane, 0.0, 0.0),
            iris_radius: anatomy.iris_radius_mm,
            rotation_center: Vector3::new(
                -anatomy.rotation_center_fraction * axial_length,
                0.0,
                0.0,
            ),
            posterior_chamber: Ellipsoid {
                center: Vector3::new(-axial_length + eye_radius, 0.0, 0.0),
                radii: Vector3::new(eye_radius, lateral, lateral),
            },
            cornea_front: Sphere {
                center: Vector3::new(-anatomy.cornea_front_radius_mm, 0.0, 0.0),
                radius: anatomy.cornea_front_radius_mm,
            },
            cornea_back: Sphere {
                center: Vector3::new(
                    -anatomy.cornea_thickness_mm - anatomy.cornea_back_radius_mm,
                    0.0,
                    0.0,
                ),
                radius: anatomy.cornea_back_radius_mm,
            },
            refractive_indices: [
                anatomy.aqueous_index,
                anatomy.cornea_index,
                anatomy.air_index,
            ],
        })
    }

    /// Axial position of the iris plane.
    pub fn iris_plane(&self) -> f64 {
        self.iris_center.x
    }

    /// Axial position of the posterior pole.
    pub fn posterior_pole(&self) -> f64 {
        self.posterior_chamber.center.x - self.posterior_chamber.radii.x
    }

    /// Points on the pupil circle of `radius` in the iris plane.
    pub fn pupil_perimeter(&self, radius: f64, n: usize) -> Vec<Vector3<f64>> {
        circle_points(&self.pupil_center, radius, n)
    }

    /// Points on the iris boundary.
    pub fn iris_perimeter(&self, n: usize) -> Vec<Vector3<f64>> {
        circle_points(&self.iris_center, self.iris_radius, n)
    }

    /// Posterior chamber surface samples lying between the posterior pole and
    /// the iris plane.
    pub fn posterior_chamber_points(&self, n_polar: usize, n_phi: usize) -> Vec<Vector3<f64>> {
        let pole = self.posterior_pole();
        let iris = self.iris_plane();
        let e = &self.posterior_chamber;
        surface_grid(n_polar, n_phi)
            .map(|(polar, phi)| e.surface_point(polar, phi))
            .filter(|p| p.x >= pole && p.x < iris)
            .collect()
    }

    /// Corneal front surface samples anterior to the iris plane.
    pub fn anterior_chamber_points(&self, n_polar: usize, n_phi: usize) -> Vec<Vector3<f64>> {
        let iris = self.iris_plane();
        let s = Ellipsoid {
            center: self.cornea_front.center,
            radii: Vector3::repeat(self.cornea_front.radius),
        };
        surface_grid(n_polar, n_phi)
            .map(|(polar, phi)| s.surface_point(polar, phi))
            .filter(|p| p.x > iris)
            .collect()
    }
}

fn circle_points(center: &Vector3<f64>, radius: f64, n: usize) -> Vec<Vector3<f64>> {
    (0..n)
        .map(|i| {
            let t = 2.0 * std::f64::consts::PI * (i as f64) / (n as f64);
            center + Vector3::new(0.0, radius * t.cos(), radius * t.sin())
        })
        .collect()
}

fn surface_grid(n_polar: usize, n_phi: usize) -> impl Iterator<Item = (f64, f64)> {
    let pi = std::f64::consts::PI;
    (0..=n_polar).flat_map(move |i| {
        let polar = pi * (i as f64) / (n_polar.max(1) as f64);
        (0..n_phi).map(move |j| (polar, 2.0 * pi * (j as f64) / (n_phi.max(1) as f64)))
    })
}
