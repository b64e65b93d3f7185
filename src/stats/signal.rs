//! Mean and median inverse logarithm of a p-value map.

use crate::error::{Error, Result};
use ndarray::ArrayD;

use super::{mean, median};

/// Summary of a significance map: mean and median of `-log10(p)` over the
/// retained voxels.
///
/// The all-NaN value doubles as the sentinel for a missing or degenerate
/// unit, so a batch result always carries one entry per input record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalSummary {
    /// Mean of the transformed retained voxels.
    pub mean: f64,
    /// Median of the transformed retained voxels.
    pub median: f64,
}

impl SignalSummary {
    /// The sentinel emitted for units whose map is absent or degenerate.
    pub fn missing() -> Self {
        Self {
            mean: f64::NAN,
            median: f64::NAN,
        }
    }

    /// True when both fields are NaN, i.e. the unit produced no statistic.
    pub fn is_missing(&self) -> bool {
        self.mean.is_nan() && self.median.is_nan()
    }
}

/// Compute the mean and median of the negative base-10 logarithm of a
/// statistic map, optionally restricted to a region-of-interest mask.
///
/// Statistic images populate the whole 3D circumscribed space around the
/// structure of interest and commonly assign null values to the background.
/// In an inverse-logarithm computation null corresponds to infinity, which
/// can considerably bias the evaluation; a mask is therefore almost always
/// wanted. Mask voxels < 0.5 are excluded from every step. Exact-zero
/// retained voxels are floored to `0.99 * min(nonzero)` before the transform.
///
/// Degenerate inputs (no retained voxels, no nonzero voxels, or NaNs in an
/// unmasked map) yield the NaN sentinel rather than an error, the same
/// graceful degradation applied to missing files.
pub fn significant_signal(
    data: &ArrayD<f32>,
    mask: Option<&ArrayD<f32>>,
) -> Result<SignalSummary> {
    let retained: Vec<f64> = match mask {
        Some(mask) => {
            if mask.shape() != data.shape() {
                return Err(Error::InvalidDimensions(format!(
                    "mask shape {:?} does not match data shape {:?}",
                    mask.shape(),
                    data.shape()
                )));
            }
            data.iter()
                .zip(mask.iter())
                .filter(|(v, m)| **m >= 0.5 && !v.is_nan())
                .map(|(v, _)| f64::from(*v))
                .collect()
        }
        None => {
            if data.iter().any(|v| v.is_nan()) {
                tracing::debug!("unmasked map contains NaN voxels, emitting NaN summary");
                return Ok(SignalSummary::missing());
            }
            data.iter().map(|v| f64::from(*v)).collect()
        }
    };

    let min_nonzero = retained
        .iter()
        .copied()
        .filter(|v| *v != 0.0)
        .fold(f64::INFINITY, f64::min);

    if retained.is_empty() || !min_nonzero.is_finite() {
        tracing::debug!(
            voxels = retained.len(),
            "no usable voxels for significance summary, emitting NaN"
        );
        return Ok(SignalSummary::missing());
    }

    // Floor substituted for exact zeros so -log10 stays finite
    let floor = min_nonzero * 0.99;
    let mut transformed: Vec<f64> = retained
        .into_iter()
        .map(|v| if v == 0.0 { floor } else { v })
        .map(|v| -v.log10())
        .collect();

    Ok(SignalSummary {
        mean: mean(&transformed),
        median: median(&mut transformed),
    })
}
