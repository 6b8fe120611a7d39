use serde::{Deserialize, Serialize};

use crate::observation::PoseEstimate;

use super::config::SmoothConfig;

/// Inflation of a bad frame's likelihood SD.
const BAD_FRAME_SD_INFLATION: f64 = 1e20;

/// Mean and standard deviation of a Gaussian belief about the pupil radius.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gaussian {
    pub mean: f64,
    pub sd: f64,
}

impl Gaussian {
    pub fn nan() -> Self {
        Self {
            mean: f64::NAN,
            sd: f64::NAN,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.mean.is_finite() && self.sd.is_finite()
    }

    /// Conjugate update of this prior with `likelihood`. With both variances
    /// zero the prior mean is kept.
    pub fn update(&self, likelihood: &Gaussian) -> Gaussian {
        let vp = self.sd * self.sd;
        let vl = likelihood.sd * likelihood.sd;
        let total = vp + vl;
        if total == 0.0 {
            return Gaussian {
                mean: self.mean,
                sd: 0.0,
            };
        }
        Gaussian {
            mean: (vl * self.mean + vp * likelihood.mean) / total,
            sd: (vp * vl / total).sqrt(),
        }
    }
}

fn precision(radius_sd: f64) -> f64 {
    1.0 / radius_sd.max(f64::EPSILON)
}

/// Min-max scaling of radius precision (1/SD), fixed over a whole series so
/// that a frame's weight does not depend on which frames share its window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(super) struct PrecisionScale {
    min: f64,
    max: f64,
}

impl PrecisionScale {
    pub fn from_series(estimates: &[PoseEstimate]) -> Self {
        estimates
            .iter()
            .filter(|e| e.has_radius())
            .map(|e| precision(e.radius_sd))
            .fold(
                Self {
                    min: f64::INFINITY,
                    max: f64::NEG_INFINITY,
                },
                |s, p| Self {
                    min: s.min.min(p),
                    max: s.max.max(p),
                },
            )
    }

    /// 0 for the least precise frame of the series, 1 for the most precise;
    /// 1 throughout when all precisions are equal.
    fn weight(&self, radius_sd: f64) -> f64 {
        if self.max > self.min {
            ((precision(radius_sd) - self.min) / (self.max - self.min)).clamp(0.0, 1.0)
        } else {
            1.0
        }
    }
}

/// Prior on the radius of `estimates[index]` from its temporal neighbors.
///
/// `estimates` must be sorted by frame. `None` when no neighbor within the
/// window carries a radius. If every neighbor has zero precision weight the
/// mean falls back to temporal weights alone.
pub(super) fn radius_prior(
    estimates: &[PoseEstimate],
    index: usize,
    scale: &PrecisionScale,
    config: &SmoothConfig,
) -> Option<Gaussian> {
    let frame = estimates[index].frame;
    let half = config.window_half_width();
    let first = frame.saturating_sub(half);
    let last = frame.saturating_add(half);
    let start = estimates.partition_point(|e| e.frame < first);
    let end = estimates.partition_point(|e| e.frame <= last);

    let usable: Vec<&PoseEstimate> = (start..end)
        .filter(|&j| j != index)
        .map(|j| &estimates[j])
        .filter(|e| e.has_radius())
        .collect();
    let good: Vec<&PoseEstimate> = usable
        .iter()
        .copied()
        .filter(|e| !config.is_bad(e.fit_rmse))
        .collect();
    let neighbors = if good.is_empty() { usable } else { good };
    if neighbors.is_empty() {
        return None;
    }

    let temporal: Vec<f64> = neighbors
        .iter()
        .map(|e| (-(e.frame.abs_diff(frame) as f64) / config.decay_tau).exp())
        .collect();
    let radii: Vec<f64> = neighbors.iter().map(|e| e.pose.pupil_radius).collect();
    let mean_weights: Vec<f64> = neighbors
        .iter()
        .zip(temporal.iter())
        .map(|(e, &t)| scale.weight(e.radius_sd) * t)
        .collect();

    let temporal_mean = weighted_mean(&radii, &temporal)?;
    let mean = weighted_mean(&radii, &mean_weights).unwrap_or(temporal_mean);
    let w_sum: f64 = temporal.iter().sum();
    let var = radii
        .iter()
        .zip(temporal.iter())
        .map(|(r, w)| w * (r - temporal_mean).powi(2))
        .sum::<f64>()
        / w_sum;

    Some(Gaussian {
        mean,
        sd: var.sqrt(),
    })
}

fn weighted_mean(values: &[f64], weights: &[f64]) -> Option<f64> {
    let w_sum: f64 = weights.iter().sum();
    if !(w_sum > 0.0) {
        return None;
    }
    Some(values.iter().zip(weights).map(|(v, w)| v * w).sum::<f64>() / w_sum)
}

/// The frame's own radius measurement as a likelihood.
pub(super) fn radius_likelihood(estimate: &PoseEstimate, config: &SmoothConfig) -> Gaussian {
    let mut sd = estimate.radius_sd.powf(config.likelihood_exponent);
    if config.is_bad(estimate.fit_rmse) {
        sd = sd.max(f64::EPSILON) * BAD_FRAME_SD_INFLATION;
    }
    Gaussian {
        mean: estimate.pose.pupil_radius,
        sd,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eye::EyePose;
    use approx::assert_relative_eq;

    fn est(frame: usize, radius: f64, sd: f64, rmse: f64) -> PoseEstimate {
        PoseEstimate {
            frame,
            pose: EyePose::new(0.0, 0.0, radius),
            radius_sd: sd,
            fit_rmse: rmse,
            relaxed: false,
        }
    }

    fn prior_of(series: &[PoseEstimate], index: usize, cfg: &SmoothConfig) -> Option<Gaussian> {
        radius_prior(series, index, &PrecisionScale::from_series(series), cfg)
    }

    #[test]
    fn equal_precision_gives_temporal_weighting() {
        let cfg = SmoothConfig::default();
        let series = vec![est(0, 2.0, 0.1, 0.5), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.1, 0.5)];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        // symmetric neighbors at equal distance
        assert_relative_eq!(prior.mean, 3.0, epsilon = 1e-12);
        assert_relative_eq!(prior.sd, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn precision_scaling_zeroes_the_least_precise_neighbor() {
        let cfg = SmoothConfig::default();
        let series = vec![est(0, 2.0, 0.1, 0.5), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.4, 0.5)];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn bad_neighbors_excluded_unless_all_bad() {
        let cfg = SmoothConfig::default();
        let series = vec![est(0, 2.0, 0.1, 0.5), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.1, 5.0)];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 2.0, epsilon = 1e-12);
        assert_relative_eq!(prior.sd, 0.0, epsilon = 1e-12);

        let all_bad = vec![est(0, 2.0, 0.1, 5.0), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.1, 5.0)];
        let prior = prior_of(&all_bad, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn window_limits_neighbors() {
        let cfg = SmoothConfig {
            decay_tau: 0.5,
            ..SmoothConfig::default()
        };
        assert_eq!(cfg.window_half_width(), 10);
        let series = vec![est(0, 2.0, 0.1, 0.5), est(20, 9.0, 0.1, 0.5), est(31, 4.0, 0.1, 0.5)];
        assert!(prior_of(&series, 1, &cfg).is_none());
        assert_eq!(SmoothConfig { decay_tau: 2.5, ..cfg }.window_half_width(), 25);
    }

    #[test]
    fn missing_neighbors_contribute_nothing() {
        let cfg = SmoothConfig::default();
        let series = vec![
            est(0, 2.0, 0.1, 0.5),
            est(1, 9.0, 0.1, 0.5),
            PoseEstimate::missing(2),
        ];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 2.0, epsilon = 1e-12);
    }

    #[test]
    fn precision_scale_spans_the_whole_series() {
        let cfg = SmoothConfig::default();
        // frame 30 is the least precise of the series but outside the window
        let series = vec![
            est(0, 2.0, 0.1, 0.5),
            est(1, 9.0, 0.1, 0.5),
            est(2, 4.0, 0.2, 0.5),
            est(30, 5.0, 0.4, 0.5),
        ];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 2.5, epsilon = 1e-12);
    }

    #[test]
    fn zero_precision_weights_fall_back_to_temporal_mean() {
        let cfg = SmoothConfig::default();
        let series = vec![est(0, 2.0, 0.4, 0.5), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.4, 0.5)];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 3.0, epsilon = 1e-12);
    }

    #[test]
    fn huge_decay_constant_covers_the_series() {
        let cfg = SmoothConfig {
            decay_tau: 1e30,
            ..SmoothConfig::default()
        };
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.window_half_width(), usize::MAX);
        let series = vec![est(0, 2.0, 0.1, 0.5), est(1, 9.0, 0.1, 0.5), est(2, 4.0, 0.1, 0.5)];
        let prior = prior_of(&series, 1, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 3.0, epsilon = 1e-12);
        let last = prior_of(&series, 2, &cfg).unwrap();
        assert_relative_eq!(last.mean, 5.5, epsilon = 1e-12);
    }

    #[test]
    fn identical_exact_neighbors_override_a_bad_frame() {
        let cfg = SmoothConfig::default();
        let series = vec![
            est(0, 2.5, 0.0, 0.5),
            est(1, 2.5, 0.0, 0.5),
            est(2, 9.0, 0.1, 5.0),
            est(3, 2.5, 0.0, 0.5),
            est(4, 2.5, 0.0, 0.5),
        ];
        let prior = prior_of(&series, 2, &cfg).unwrap();
        assert_relative_eq!(prior.mean, 2.5, epsilon = 1e-12);
        assert!(prior.sd < 1e-12);
        let post = prior.update(&radius_likelihood(&series[2], &cfg));
        assert_relative_eq!(post.mean, 2.5, epsilon = 1e-12);
        assert!(post.sd < 1e-12);
    }

    #[test]
    fn posterior_lies_between_prior_and_likelihood() {
        let prior = Gaussian { mean: 2.0, sd: 0.3 };
        let likelihood = Gaussian { mean: 3.0, sd: 0.2 };
        let post = prior.update(&likelihood);
        assert!(post.mean > 2.0 && post.mean < 3.0);
        assert!(post.sd <= 0.2 && post.sd <= 0.3);
        // the more certain source pulls harder
        assert!(post.mean > 2.5);
    }

    #[test]
    fn zero_variances_keep_prior_mean() {
        let post = Gaussian { mean: 2.0, sd: 0.0 }.update(&Gaussian { mean: 3.0, sd: 0.0 });
        assert_eq!(post, Gaussian { mean: 2.0, sd: 0.0 });
    }

    #[test]
    fn bad_frames_get_uninformative_likelihood() {
        let cfg = SmoothConfig::default();
        let bad = radius_likelihood(&est(0, 3.0, 0.0, 9.0), &cfg);
        assert!(bad.sd >= f64::EPSILON * 1e20);
        let post = Gaussian { mean: 2.0, sd: 0.1 }.update(&bad);
        assert_relative_eq!(post.mean, 2.0, epsilon = 1e-9);

        let squared = SmoothConfig {
            likelihood_exponent: 2.0,
            ..cfg
        };
        assert_relative_eq!(radius_likelihood(&est(0, 3.0, 0.5, 0.1), &squared).sd, 0.25);
    }
}
