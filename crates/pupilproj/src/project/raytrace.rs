//! Refraction of eye points through the cornea.
//!
//! Rays are traced in two planes that contain the optical axis (p1p2 and
//! p1p3). In each plane the launch angle is grid-searched and then refined so
//! that the ray leaving the corneal front surface passes through the camera
//! node. The virtual image is where that exit ray, extended backwards,
//! crosses the axial depth of the source point.

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{config_err, Result};
use crate::eye::EyeModel;

/// Angular search settings for corneal ray tracing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RayTraceTables {
    /// Largest launch angle from the optical axis searched (degrees).
    pub max_abs_ray_theta: f64,
    /// Grid spacing of the launch angle search (degrees).
    pub ray_theta_resolution: f64,
    /// Bracket width at which the launch angle refinement stops (radians).
    pub refine_tolerance: f64,
    /// Evaluation budget of the refinement.
    pub refine_max_evals: usize,
}

impl Default for RayTraceTables {
    fn default() -> Self {
        Self {
            max_abs_ray_theta: 60.0,
            ray_theta_resolution: 2.0,
            refine_tolerance: 1e-12,
            refine_max_evals: 80,
        }
    }
}

impl RayTraceTables {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_abs_ray_theta > 0.0 && self.max_abs_ray_theta < 90.0) {
            return Err(config_err("max_abs_ray_theta must lie in (0, 90) degrees"));
        }
        if !(self.ray_theta_resolution > 0.0 && self.ray_theta_resolution <= self.max_abs_ray_theta)
        {
            return Err(config_err(
                "ray_theta_resolution must be positive and at most max_abs_ray_theta",
            ));
        }
        if !(self.refine_tolerance > 0.0) {
            return Err(config_err("refine_tolerance must be positive"));
        }
        Ok(())
    }
}

/// Refracted image of one eye point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct VirtualImage {
    pub point: Vector3<f64>,
    /// Distance of the best exit rays from the camera node, combined over
    /// both planes (mm).
    pub residual: f64,
}

/// Virtual image of `source` as seen from `camera`, both given in the
/// unrotated eye frame. `None` when no ray leaves the cornea toward the
/// camera.
pub(crate) fn virtual_image(
    eye: &EyeModel,
    source: &Vector3<f64>,
    camera: &Vector3<f64>,
    tables: &RayTraceTables,
) -> Option<VirtualImage> {
    let section = CorneaSection::new(eye);
    let (p2, err_p2) = section.trace(
        Vector2::new(source.x, source.y),
        Vector2::new(camera.x, camera.y),
        tables,
    )?;
    let (p3, err_p3) = section.trace(
        Vector2::new(source.x, source.z),
        Vector2::new(camera.x, camera.z),
        tables,
    )?;
    Some(VirtualImage {
        point: Vector3::new(source.x, p2, p3),
        residual: err_p2.hypot(err_p3),
    })
}

#[derive(Debug, Clone, Copy)]
struct Ray {
    origin: Vector2<f64>,
    dir: Vector2<f64>,
}

impl Ray {
    /// Leave the circle `(center, radius)` from the inside, bending by the
    /// index ratio `eta = n_inside / n_outside`.
    fn refract_out_of(&self, center: Vector2<f64>, radius: f64, eta: f64) -> Option<Ray> {
        let oc = self.origin - center;
        let b = oc.dot(&self.dir);
        let c = oc.norm_squared() - radius * radius;
        let disc = b * b - c;
        if disc < 0.0 {
            return None;
        }
        let t = -b + disc.sqrt();
        if t < 0.0 {
            return None;
        }
        let hit = self.origin + self.dir * t;
        let normal = (hit - center) / radius;
        let cos_i = normal.dot(&self.dir);
        let sin_t2 = eta * eta * (1.0 - cos_i * cos_i);
        if sin_t2 > 1.0 {
            // total internal reflection
            return None;
        }
        let dir = self.dir * eta + normal * ((1.0 - sin_t2).sqrt() - eta * cos_i);
        Some(Ray {
            origin: hit,
            dir: dir.normalize(),
        })
    }

    /// Signed perpendicular offset of `point` from the ray, positive to the
    /// left of the direction of travel. `None` when `point` lies behind the
    /// ray origin.
    fn signed_offset(&self, point: Vector2<f64>) -> Option<f64> {
        let v = point - self.origin;
        if v.dot(&self.dir) <= 0.0 {
            return None;
        }
        Some(self.dir.x * v.y - self.dir.y * v.x)
    }

    /// Lateral coordinate where the ray line crosses axial position `p1`.
    fn lateral_at(&self, p1: f64) -> Option<f64> {
        if self.dir.x.abs() < 1e-12 {
            return None;
        }
        let t = (p1 - self.origin.x) / self.dir.x;
        Some(self.origin.y + t * self.dir.y)
    }
}

/// The two corneal surfaces cut by a plane through the optical axis.
struct CorneaSection {
    back_center: Vector2<f64>,
    back_radius: f64,
    front_center: Vector2<f64>,
    front_radius: f64,
    indices: [f64; 3],
}

impl CorneaSection {
    fn new(eye: &EyeModel) -> Self {
        Self {
            back_center: Vector2::new(eye.cornea_back.center.x, 0.0),
            back_radius: eye.cornea_back.radius,
            front_center: Vector2::new(eye.cornea_front.center.x, 0.0),
            front_radius: eye.cornea_front.radius,
            indices: eye.refractive_indices,
        }
    }

    fn exit_ray(&self, source: Vector2<f64>, theta: f64) -> Option<Ray> {
        let [aqueous, cornea, air] = self.indices;
        let mut ray = Ray {
            origin: source,
            dir: Vector2::new(theta.cos(), theta.sin()),
        };
        // Points outside the back surface already sit in corneal tissue.
        if (source - self.back_center).norm() < self.back_radius {
            ray = ray.refract_out_of(self.back_center, self.back_radius, aqueous / cornea)?;
        }
        ray.refract_out_of(self.front_center, self.front_radius, cornea / air)
    }

    /// Returns the lateral coordinate of the virtual image and the exit-ray
    /// miss distance at the camera.
    ///
    /// The launch angle grid is scanned for a sign change of the signed miss
    /// offset; the bracket is then closed by Illinois false position. Without
    /// a sign change the grid angle of smallest miss is used.
    fn trace(
        &self,
        source: Vector2<f64>,
        camera: Vector2<f64>,
        tables: &RayTraceTables,
    ) -> Option<(f64, f64)> {
        let max = tables.max_abs_ray_theta.to_radians();
        let step = tables.ray_theta_resolution.to_radians();
        let offset = |theta: f64| {
            self.exit_ray(source, theta)
                .and_then(|ray| ray.signed_offset(camera))
        };

        let n_steps = (2.0 * max / step).floor() as usize;
        let samples: Vec<(f64, Option<f64>)> = (0..=n_steps)
            .map(|i| {
                let theta = -max + step * i as f64;
                (theta, offset(theta))
            })
            .collect();

        let mut best: Option<(f64, f64)> = None;
        for &(theta, s) in &samples {
            if let Some(s) = s {
                if best.map_or(true, |(_, b)| s.abs() < b.abs()) {
                    best = Some((theta, s));
                }
            }
        }
        let (grid_theta, grid_offset) = best?;

        // Bracket with the smallest miss among all sign changes.
        let bracket = samples
            .windows(2)
            .filter_map(|w| match (w[0], w[1]) {
                ((a, Some(fa)), (b, Some(fb))) if fa * fb < 0.0 => Some((a, fa, b, fb)),
                _ => None,
            })
            .min_by(|x, y| {
                let mx = x.1.abs().min(x.3.abs());
                let my = y.1.abs().min(y.3.abs());
                mx.total_cmp(&my)
            });

        let (theta, miss) = match bracket {
            Some(b) if grid_offset != 0.0 => {
                refine_root(&offset, b, tables.refine_tolerance, tables.refine_max_evals)
            }
            _ => (grid_theta, grid_offset.abs()),
        };

        let lateral = self.exit_ray(source, theta)?.lateral_at(source.x)?;
        Some((lateral, miss))
    }
}

/// Illinois false position on a sign-changing bracket `(a, f(a), b, f(b))`.
/// Returns the best angle found and its absolute offset.
fn refine_root(
    f: &impl Fn(f64) -> Option<f64>,
    (mut a, mut fa, mut b, mut fb): (f64, f64, f64, f64),
    tolerance: f64,
    max_evals: usize,
) -> (f64, f64) {
    let mut best = if fa.abs() < fb.abs() {
        (a, fa.abs())
    } else {
        (b, fb.abs())
    };
    for _ in 0..max_evals {
        if (b - a).abs() <= tolerance || best.1 == 0.0 {
            break;
        }
        let mut c = (a * fb - b * fa) / (fb - fa);
        if !(c > a.min(b) && c < a.max(b)) {
            c = 0.5 * (a + b);
        }
        let Some(fc) = f(c) else {
            break;
        };
        if fc.abs() < best.1 {
            best = (c, fc.abs());
        }
        if fc * fb < 0.0 {
            a = b;
            fa = fb;
        } else {
            fa *= 0.5;
        }
        b = c;
        fb = fc;
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eye::EyeAnatomy;
    use approx::assert_relative_eq;

    fn camera_on_axis() -> Vector3<f64> {
        Vector3::new(120.0, 0.0, 0.0)
    }

    #[test]
    fn matched_indices_leave_points_in_place() {
        let anatomy = EyeAnatomy {
            aqueous_index: 1.0,
            cornea_index: 1.0,
            ..EyeAnatomy::default()
        };
        let eye = EyeModel::new(12.0, &anatomy).unwrap();
        let source = Vector3::new(-3.7, 1.5, -0.8);
        let vi = virtual_image(&eye, &source, &camera_on_axis(), &RayTraceTables::default())
            .expect("ray reaches camera");
        assert_relative_eq!(vi.point, source, epsilon = 1e-6);
        assert!(vi.residual < 1e-6);
    }

    #[test]
    fn cornea_magnifies_the_pupil() {
        let eye = EyeModel::new(12.0, &EyeAnatomy::default()).unwrap();
        let source = Vector3::new(-3.7, 2.0, 0.0);
        let vi = virtual_image(&eye, &source, &camera_on_axis(), &RayTraceTables::default())
            .expect("ray reaches camera");
        assert!(vi.point.y > 2.0 && vi.point.y < 2.6, "{:?}", vi.point);
        assert_relative_eq!(vi.point.z, 0.0, epsilon = 1e-6);
        assert!(vi.residual < 1e-6);
    }

    #[test]
    fn false_position_closes_the_bracket() {
        let f = |x: f64| Some(x * x * x - 2.0);
        let (x, miss) = refine_root(&f, (0.0, -2.0, 2.0, 6.0), 1e-14, 80);
        assert_relative_eq!(x, 2.0_f64.cbrt(), epsilon = 1e-12);
        assert!(miss < 1e-12);

        // an undefined evaluation ends the search with the best end so far
        let g = |_: f64| -> Option<f64> { None };
        let (x, miss) = refine_root(&g, (0.0, -2.0, 2.0, 6.0), 1e-14, 80);
        assert_eq!((x, miss), (0.0, 2.0));
    }

    #[test]
    fn rejects_bad_tables() {
        assert!(RayTraceTables::default().validate().is_ok());
        let bad = RayTraceTables {
            ray_theta_resolution: 0.0,
            ..RayTraceTables::default()
        };
        assert!(bad.validate().is_err());
    }
}
