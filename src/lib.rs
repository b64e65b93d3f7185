//! Batch summary statistics over volumetric NIfTI statistical maps.
//!
//! One map per experimental unit (subject × session × task × acquisition),
//! addressed through a `{field}`-placeholder path template rendered against a
//! list of substitution records. Each unit is resolved, loaded, and reduced
//! independently on a bounded worker pool, and the per-unit results are
//! merged into a row-per-unit table annotated with the records' metadata.
//!
//! Two statistic families are provided:
//!
//! - **Significance summary** — mean and median of the masked `-log10`
//!   transform of a 3D p-value map, with zero-voxel flooring so background
//!   nulls cannot bias the reductions. Units whose map is absent recover to a
//!   NaN row; the batch always returns one row per input record.
//! - **Per-timepoint base metrics** — mean, median, mode, and standard
//!   deviation of every 3D volume along the series axis of a 4D acquisition.
//!
//! ```ignore
//! use voxstats::{significance_table, BatchConfig};
//!
//! let table = significance_table(
//!     "{base}/sub-{subject}/ses-{session}/p_map.nii.gz",
//!     &substitutions,
//!     Some("/data/templates/roi_mask.nii.gz"),
//!     Some("significance.csv"),
//!     &BatchConfig::default(),
//! )?;
//! ```

#![deny(unsafe_code)]

pub mod batch;
pub mod error;
pub mod nifti;
pub mod stats;
pub mod table;
pub mod template;

pub use batch::{
    default_workers, run_series, run_significance, series_table, significance_table, BatchConfig,
};
pub use error::{Error, Result};
pub use stats::{series_metrics, significant_signal, SeriesSummary, SignalSummary};
pub use table::{Cell, Table, METADATA_FIELDS};
pub use template::{expand_path, render, resolve, Substitution};
