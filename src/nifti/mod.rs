//! `NIfTI` file format support.
//!
//! `NIfTI` (Neuroimaging Informatics Technology Initiative) is the standard
//! format for the volumetric statistical maps this crate summarizes. The
//! module provides reading of `.nii` and `.nii.gz` files, a typed
//! missing-file outcome for batch callers, and a minimal writer for fixtures.

pub(crate) mod header;
pub(crate) mod image;
pub mod io;

pub use header::{DataType, Endianness, NiftiHeader, NiftiVersion};
pub use image::NiftiImage;
pub use io::{load, load_header, load_if_present, save};
