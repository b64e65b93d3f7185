//! Per-timepoint base metrics of a 4D acquisition.

use crate::error::{Error, Result};
use ndarray::{ArrayD, Axis};

use super::{mean, median};

/// Base metrics of one 3D volume within a 4D series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesSummary {
    /// Mean over the volume.
    pub mean: f64,
    /// Median over the volume.
    pub median: f64,
    /// Mode over the volume; the smallest value among the most frequent.
    pub mode: f64,
    /// Population standard deviation over the volume.
    pub std: f64,
}

/// Compute standard deviation, mean, median, and mode for every timepoint of
/// a 4D series.
///
/// The 4th axis is the series axis; each 3D volume along it is reduced
/// independently and unmasked. Requires a 4D input.
pub fn series_metrics(data: &ArrayD<f32>) -> Result<Vec<SeriesSummary>> {
    if data.ndim() != 4 {
        return Err(Error::InvalidDimensions(format!(
            "per-timepoint metrics need a 4D series, got {} dimensions",
            data.ndim()
        )));
    }

    let n_timepoints = data.len_of(Axis(3));
    let mut rows = Vec::with_capacity(n_timepoints);

    for t in 0..n_timepoints {
        let volume = data.index_axis(Axis(3), t);
        let mut values: Vec<f64> = volume.iter().map(|v| f64::from(*v)).collect();

        let m = mean(&values);
        let std = if values.is_empty() || m.is_nan() {
            f64::NAN
        } else {
            let var = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
            var.sqrt()
        };
        let mode = modal_value(&mut values);
        let med = median(&mut values);

        rows.push(SeriesSummary {
            mean: m,
            median: med,
            mode,
            std,
        });
    }

    Ok(rows)
}

/// Smallest value among those with the highest exact-equality count.
///
/// Sorts the slice; ties between equally frequent values resolve to the
/// first (smallest) run encountered.
fn modal_value(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(f64::total_cmp);

    let mut best_value = values[0];
    let mut best_count = 1usize;
    let mut run_value = values[0];
    let mut run_count = 1usize;

    for &v in &values[1..] {
        if v == run_value {
            run_count += 1;
        } else {
            run_value = v;
            run_count = 1;
        }
        if run_count > best_count {
            best_count = run_count;
            best_value = run_value;
        }
    }

    best_value
}
