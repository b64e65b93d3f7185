//! Assembly and persistence of batch results.
//!
//! One row per processed unit (significance mode) or per (unit, timepoint)
//! pair (series mode), in input order, annotated with whichever of the
//! candidate metadata fields occur in the substitution records. Persistence
//! is delimited text, gated on the destination extension before anything is
//! written.

use crate::error::{Error, Result};
use crate::stats::{SeriesSummary, SignalSummary};
use crate::template::{expand_path, Substitution};
use std::path::{Path, PathBuf};

/// Metadata keys promoted to output columns when present in the
/// substitution records.
pub const METADATA_FIELDS: [&str; 4] = ["subject", "session", "task", "acquisition"];

/// One table cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// A numeric statistic; NaN renders as an empty CSV field.
    Float(f64),
    /// A metadata value.
    Text(String),
    /// A metadata key absent from this row's record.
    Empty,
}

impl Cell {
    fn to_csv_field(&self) -> String {
        match self {
            Cell::Float(v) if v.is_nan() => String::new(),
            Cell::Float(v) => format!("{v}"),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

/// Row-ordered tabular result of a batch run.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    /// Column names, statistics first, then metadata.
    pub columns: Vec<String>,
    /// One entry per row, each the same length as `columns`.
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Index of a named column, if present.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// The cell at `(row, column-name)`, if both exist.
    pub fn cell(&self, row: usize, column: &str) -> Option<&Cell> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }
}

/// Metadata columns to attach: each candidate field present in at least one
/// record, in the fixed candidate order.
fn metadata_columns(substitutions: &[Substitution]) -> Vec<&'static str> {
    METADATA_FIELDS
        .iter()
        .copied()
        .filter(|field| substitutions.iter().any(|s| s.contains_key(*field)))
        .collect()
}

fn metadata_cells(record: &Substitution, fields: &[&'static str]) -> Vec<Cell> {
    fields
        .iter()
        .map(|field| match record.get(*field) {
            Some(value) => Cell::Text(value.clone()),
            None => Cell::Empty,
        })
        .collect()
}

fn ensure_len(results: usize, records: usize) -> Result<()> {
    if results != records {
        return Err(Error::InvalidDimensions(format!(
            "result/record length mismatch: {results} != {records}"
        )));
    }
    Ok(())
}

/// Tabulate significance summaries: columns `Mean`, `Median`, plus metadata;
/// one row per unit, in input order.
pub fn assemble_signal(results: &[SignalSummary], substitutions: &[Substitution]) -> Result<Table> {
    ensure_len(results.len(), substitutions.len())?;
    let meta = metadata_columns(substitutions);

    let mut columns: Vec<String> = vec!["Mean".to_string(), "Median".to_string()];
    columns.extend(meta.iter().map(|f| f.to_string()));

    let rows = results
        .iter()
        .zip(substitutions)
        .map(|(summary, record)| {
            let mut row = vec![Cell::Float(summary.mean), Cell::Float(summary.median)];
            row.extend(metadata_cells(record, &meta));
            row
        })
        .collect();

    Ok(Table { columns, rows })
}

/// Tabulate per-timepoint metrics: columns `Mean`, `Median`, `Mode`,
/// `Standard Deviation`, plus metadata; each unit contributes one row per
/// timepoint with its metadata repeated.
pub fn assemble_series(
    results: &[Vec<SeriesSummary>],
    substitutions: &[Substitution],
) -> Result<Table> {
    ensure_len(results.len(), substitutions.len())?;
    let meta = metadata_columns(substitutions);

    let mut columns: Vec<String> = vec![
        "Mean".to_string(),
        "Median".to_string(),
        "Mode".to_string(),
        "Standard Deviation".to_string(),
    ];
    columns.extend(meta.iter().map(|f| f.to_string()));

    let mut rows = Vec::new();
    for (unit_rows, record) in results.iter().zip(substitutions) {
        let meta_cells = metadata_cells(record, &meta);
        for summary in unit_rows {
            let mut row = vec![
                Cell::Float(summary.mean),
                Cell::Float(summary.median),
                Cell::Float(summary.mode),
                Cell::Float(summary.std),
            ];
            row.extend(meta_cells.iter().cloned());
            rows.push(row);
        }
    }

    Ok(Table { columns, rows })
}

/// Expand and validate a save destination without touching the filesystem.
///
/// Rejects every extension except `.csv` (case-insensitive), so an
/// unsupported destination fails before any computation's results are at
/// risk and before any file is created.
pub fn validate_destination(path: &str) -> Result<PathBuf> {
    let expanded = expand_path(path)?;
    let is_csv = expanded
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        return Err(Error::UnsupportedOutputFormat(expanded));
    }
    Ok(expanded)
}

/// Persist a table as CSV.
///
/// The destination is tilde-expanded, absolutized, and extension-checked
/// before the file is created. Returns the path written.
pub fn save(table: &Table, path: &str) -> Result<PathBuf> {
    let destination = validate_destination(path)?;
    write_csv(table, &destination)?;
    Ok(destination)
}

pub(crate) fn write_csv(table: &Table, destination: &Path) -> Result<()> {
    let mut writer = csv::Writer::from_path(destination)
        .map_err(|e| Error::Io(std::io::Error::other(format!(
            "failed to create {}: {e}",
            destination.display()
        ))))?;

    writer
        .write_record(&table.columns)
        .map_err(|e| Error::Io(std::io::Error::other(format!("csv write failed: {e}"))))?;
    for row in &table.rows {
        let fields: Vec<String> = row.iter().map(Cell::to_csv_field).collect();
        writer
            .write_record(&fields)
            .map_err(|e| Error::Io(std::io::Error::other(format!("csv write failed: {e}"))))?;
    }
    writer
        .flush()
        .map_err(|e| Error::Io(std::io::Error::other(format!("csv flush failed: {e}"))))?;
    Ok(())
}
