use std::collections::BTreeMap;

use crate::observation::Observation;

/// Fit errors below this are treated as this value when weighting.
const MIN_FIT_ERROR: f64 = 1e-6;

/// Frames chosen to represent the spread of pupil positions.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Selection {
    /// Indices into the observation slice.
    pub indices: Vec<usize>,
    /// Grid cell `(column, row)` of each selected index.
    pub bins: Vec<(usize, usize)>,
    /// Inverse fit error, normalized to mean 1.
    pub weights: Vec<f64>,
}

/// Bin valid ellipse centers on an `n_bins × n_bins` grid spanning their
/// bounding box and keep the lowest-error ellipse of each occupied cell.
pub(super) fn select_frames(observations: &[Observation], n_bins: usize) -> Option<Selection> {
    let valid: Vec<usize> = (0..observations.len())
        .filter(|&i| observations[i].is_valid())
        .collect();
    if valid.is_empty() || n_bins == 0 {
        return None;
    }

    let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
    let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
    for &i in &valid {
        let [x, y] = observations[i].ellipse.center();
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);
    }

    let cell = |v: f64, lo: f64, hi: f64| -> usize {
        if hi > lo {
            (((v - lo) / (hi - lo)) * n_bins as f64).floor().min((n_bins - 1) as f64) as usize
        } else {
            0
        }
    };

    let mut grid: BTreeMap<(usize, usize), Vec<usize>> = BTreeMap::new();
    for &i in &valid {
        let [x, y] = observations[i].ellipse.center();
        grid.entry((cell(x, min_x, max_x), cell(y, min_y, max_y)))
            .or_default()
            .push(i);
    }

    let mut indices = Vec::with_capacity(grid.len());
    let mut bins = Vec::with_capacity(grid.len());
    for (bin, members) in &grid {
        let best = members.iter().copied().min_by(|&a, &b| {
            observations[a]
                .fit_rmse
                .total_cmp(&observations[b].fit_rmse)
        })?;
        indices.push(best);
        bins.push(*bin);
    }

    let inverse: Vec<f64> = indices
        .iter()
        .map(|&i| 1.0 / observations[i].fit_rmse.max(MIN_FIT_ERROR))
        .collect();
    let mean = inverse.iter().sum::<f64>() / inverse.len() as f64;
    let weights = inverse.iter().map(|w| w / mean).collect();

    Some(Selection {
        indices,
        bins,
        weights,
    })
}
