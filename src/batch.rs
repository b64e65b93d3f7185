//! Parallel batch execution over substitution lists.
//!
//! For each substitution record, independently: resolve the path template,
//! attempt the load, compute the requested statistic. Units run on a bounded
//! rayon pool and share no mutable state; each owns its loaded volume and
//! drops it on completion. Output order always equals input order, collected
//! positionally rather than by completion.

use crate::error::{Error, Result};
use crate::nifti;
use crate::stats::{self, SeriesSummary, SignalSummary};
use crate::table::{self, Table};
use crate::template::{self, Substitution};
use ndarray::ArrayD;
use rayon::prelude::*;
use std::path::PathBuf;

/// Explicit parallelism configuration for a batch call.
///
/// The default worker count is derived once from available hardware
/// parallelism minus a two-thread reservation for the orchestrating process,
/// floored at one; callers override it by constructing the config directly.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Number of worker threads the batch may occupy.
    pub workers: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl BatchConfig {
    /// Config with an explicit worker count (floored at 1).
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }
}

/// Available hardware parallelism minus a small reservation, floored at 1.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .saturating_sub(2)
        .max(1)
}

fn worker_pool(config: &BatchConfig) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers.max(1))
        .build()
        .map_err(|e| Error::Io(std::io::Error::other(format!("worker pool failed: {e}"))))
}

/// Load the batch-wide mask once; it is shared read-only across all units.
fn load_mask(mask_path: &str) -> Result<ArrayD<f32>> {
    let path = template::expand_path(mask_path)?;
    match nifti::load_if_present(&path)? {
        Some(img) => img.to_f32(),
        None => Err(Error::MapNotFound(path)),
    }
}

/// Compute the significance summary for every substitution record.
///
/// A unit whose resolved map does not exist contributes the NaN sentinel and
/// the batch continues; template defects and corrupt files abort the whole
/// call. The optional mask is loaded once up front and a missing mask is
/// fatal.
pub fn run_significance(
    template: &str,
    substitutions: &[Substitution],
    mask_path: Option<&str>,
    config: &BatchConfig,
) -> Result<Vec<SignalSummary>> {
    let mask = mask_path.map(load_mask).transpose()?;
    let pool = worker_pool(config)?;

    tracing::debug!(
        units = substitutions.len(),
        workers = config.workers,
        masked = mask.is_some(),
        "running significance batch"
    );

    let results: Result<Vec<SignalSummary>> = pool.install(|| {
        substitutions
            .par_iter()
            .map(|record| {
                let path = template::resolve(template, record)?;
                match nifti::load_if_present(&path)? {
                    Some(img) => {
                        let data = img.to_f32()?;
                        stats::significant_signal(&data, mask.as_ref())
                    }
                    None => {
                        tracing::warn!(path = %path.display(), "map missing, emitting NaN row");
                        Ok(SignalSummary::missing())
                    }
                }
            })
            .collect()
    });
    let results = results?;

    let missing = results.iter().filter(|r| r.is_missing()).count();
    tracing::info!(
        units = results.len(),
        missing,
        "significance batch complete"
    );
    Ok(results)
}

/// Compute per-timepoint base metrics for every substitution record.
///
/// Unlike the significance path there is no per-unit recovery: a missing or
/// corrupt 4D file fails the whole batch call.
pub fn run_series(
    template: &str,
    substitutions: &[Substitution],
    config: &BatchConfig,
) -> Result<Vec<Vec<SeriesSummary>>> {
    let pool = worker_pool(config)?;

    tracing::debug!(
        units = substitutions.len(),
        workers = config.workers,
        "running per-timepoint batch"
    );

    let results: Result<Vec<Vec<SeriesSummary>>> = pool.install(|| {
        substitutions
            .par_iter()
            .map(|record| {
                let path = template::resolve(template, record)?;
                match nifti::load_if_present(&path)? {
                    Some(img) => stats::series_metrics(&img.to_f32()?),
                    None => Err(Error::MapNotFound(path)),
                }
            })
            .collect()
    });
    let results = results?;

    tracing::info!(units = results.len(), "per-timepoint batch complete");
    Ok(results)
}

/// Run a significance batch and tabulate the result, optionally persisting
/// it as CSV.
///
/// The save destination, when given, is validated before any unit runs so an
/// unsupported extension never discards computed work.
pub fn significance_table(
    template: &str,
    substitutions: &[Substitution],
    mask_path: Option<&str>,
    save_as: Option<&str>,
    config: &BatchConfig,
) -> Result<Table> {
    let destination = validate_save(save_as)?;
    let results = run_significance(template, substitutions, mask_path, config)?;
    let table = table::assemble_signal(&results, substitutions)?;
    persist(&table, destination)?;
    Ok(table)
}

/// Run a per-timepoint batch and tabulate the result, optionally persisting
/// it as CSV. Each unit contributes one row per timepoint.
pub fn series_table(
    template: &str,
    substitutions: &[Substitution],
    save_as: Option<&str>,
    config: &BatchConfig,
) -> Result<Table> {
    let destination = validate_save(save_as)?;
    let results = run_series(template, substitutions, config)?;
    let table = table::assemble_series(&results, substitutions)?;
    persist(&table, destination)?;
    Ok(table)
}

fn validate_save(save_as: Option<&str>) -> Result<Option<PathBuf>> {
    save_as.map(table::validate_destination).transpose()
}

fn persist(t: &Table, destination: Option<PathBuf>) -> Result<()> {
    if let Some(destination) = destination {
        table::write_csv(t, &destination)?;
        tracing::info!(path = %destination.display(), rows = t.n_rows(), "table written");
    }
    Ok(())
}
