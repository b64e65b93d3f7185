//! End-to-end batch tests: template resolution, missing-file tolerance,
//! ordering under parallelism, and the two table-producing entry points.

use ndarray::{ArrayD, IxDyn};
use std::path::Path;
use tempfile::tempdir;
use voxstats::nifti::{self, NiftiImage};
use voxstats::{batch, BatchConfig, Cell, Error, Substitution, Table};

fn record(pairs: &[(&str, &str)]) -> Substitution {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn write_map(dir: &Path, name: &str, shape: &[usize], values: Vec<f32>) {
    let data = ArrayD::from_shape_vec(IxDyn(shape), values).unwrap();
    let img = NiftiImage::from_array(data).unwrap();
    nifti::save(&img, dir.join(name)).unwrap();
}

fn float_cell(table: &Table, row: usize, column: &str) -> f64 {
    match table.cell(row, column) {
        Some(Cell::Float(v)) => *v,
        other => panic!("expected float cell at ({row}, {column}), got {other:?}"),
    }
}

fn text_cell(table: &Table, row: usize, column: &str) -> String {
    match table.cell(row, column) {
        Some(Cell::Text(s)) => s.clone(),
        other => panic!("expected text cell at ({row}, {column}), got {other:?}"),
    }
}

/// NaN-aware table comparison: NaN cells compare equal to NaN cells.
fn assert_tables_identical(a: &Table, b: &Table) {
    assert_eq!(a.columns, b.columns);
    assert_eq!(a.rows.len(), b.rows.len());
    for (ra, rb) in a.rows.iter().zip(&b.rows) {
        assert_eq!(ra.len(), rb.len());
        for (ca, cb) in ra.iter().zip(rb) {
            match (ca, cb) {
                (Cell::Float(x), Cell::Float(y)) => {
                    assert!(
                        (x.is_nan() && y.is_nan()) || x == y,
                        "cells differ: {x} vs {y}"
                    );
                }
                _ => assert_eq!(ca, cb),
            }
        }
    }
}

#[test]
fn missing_units_recover_to_nan_rows_in_order() {
    let dir = tempdir().unwrap();
    // files exist for subjects 4001 and 4003; 4002 is absent
    write_map(dir.path(), "sub-4001.nii", &[3, 1, 1], vec![0.1, 0.01, 0.001]);
    write_map(dir.path(), "sub-4003.nii", &[3, 1, 1], vec![0.5, 0.05, 0.005]);

    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let subs = vec![
        record(&[("subject", "4001")]),
        record(&[("subject", "4002")]),
        record(&[("subject", "4003")]),
    ];

    let results =
        batch::run_significance(&template, &subs, None, &BatchConfig::default()).unwrap();
    assert_eq!(results.len(), 3);
    assert!(results[0].mean.is_finite());
    assert!(results[1].is_missing());
    assert!(results[2].mean.is_finite());

    // -log10 of {0.1, 0.01, 0.001} has mean and median exactly 2
    assert!((results[0].mean - 2.0).abs() < 1e-6);
    assert!((results[0].median - 2.0).abs() < 1e-6);
}

#[test]
fn masked_batch_matches_analytic_values() {
    let dir = tempdir().unwrap();
    // 3 signal voxels in a zero background
    let mut values = vec![0.0f32; 27];
    values[0] = 0.1;
    values[1] = 0.01;
    values[2] = 0.001;
    write_map(dir.path(), "sub-a.nii", &[3, 3, 3], values);

    let mut mask_values = vec![0.0f32; 27];
    mask_values[0] = 1.0;
    mask_values[1] = 1.0;
    mask_values[2] = 1.0;
    write_map(dir.path(), "roi_mask.nii", &[3, 3, 3], mask_values);

    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let mask_path = dir.path().join("roi_mask.nii");
    let subs = vec![record(&[("subject", "a")])];

    let results = batch::run_significance(
        &template,
        &subs,
        Some(mask_path.to_str().unwrap()),
        &BatchConfig::default(),
    )
    .unwrap();

    assert!((results[0].mean - 2.0).abs() < 1e-6);
    assert!((results[0].median - 2.0).abs() < 1e-6);
}

#[test]
fn missing_mask_is_fatal() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "sub-a.nii", &[2, 1, 1], vec![0.5, 0.5]);
    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let subs = vec![record(&[("subject", "a")])];

    let err = batch::run_significance(
        &template,
        &subs,
        Some("/nonexistent/mask.nii"),
        &BatchConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, Error::MapNotFound(_)));
}

#[test]
fn template_defect_aborts_the_batch() {
    let subs = vec![record(&[("subject", "a")])];
    let err = batch::run_significance(
        "/data/sub-{subject}/ses-{session}.nii",
        &subs,
        None,
        &BatchConfig::default(),
    )
    .unwrap_err();
    match err {
        Error::TemplateField { field, .. } => assert_eq!(field, "session"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn worker_count_does_not_change_the_table() {
    let dir = tempdir().unwrap();
    for i in 0..6 {
        // leave subject 3 missing
        if i == 3 {
            continue;
        }
        let v = 10f32.powi(-(i as i32) - 1);
        write_map(dir.path(), &format!("sub-{i}.nii"), &[2, 2, 1], vec![v; 4]);
    }

    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let subs: Vec<Substitution> = (0..6)
        .map(|i| record(&[("subject", &i.to_string())]))
        .collect();

    let serial = batch::significance_table(
        &template,
        &subs,
        None,
        None,
        &BatchConfig::with_workers(1),
    )
    .unwrap();
    let parallel = batch::significance_table(
        &template,
        &subs,
        None,
        None,
        &BatchConfig::with_workers(4),
    )
    .unwrap();

    assert_tables_identical(&serial, &parallel);
    assert_eq!(serial.n_rows(), 6);
    assert!(float_cell(&serial, 3, "Mean").is_nan());
}

#[test]
fn significance_table_attaches_metadata_columns() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "sub-a_ses-1.nii", &[2, 1, 1], vec![0.1, 0.01]);
    write_map(dir.path(), "sub-b_ses-2.nii", &[2, 1, 1], vec![0.1, 0.01]);

    let template = format!("{}/sub-{{subject}}_ses-{{session}}.nii", dir.path().display());
    let subs = vec![
        record(&[("subject", "a"), ("session", "1"), ("task", "rest")]),
        record(&[("subject", "b"), ("session", "2")]),
    ];

    let table =
        batch::significance_table(&template, &subs, None, None, &BatchConfig::default()).unwrap();

    assert_eq!(
        table.columns,
        vec!["Mean", "Median", "subject", "session", "task"]
    );
    assert_eq!(text_cell(&table, 0, "task"), "rest");
    assert_eq!(table.cell(1, "task"), Some(&Cell::Empty));
    assert_eq!(text_cell(&table, 1, "subject"), "b");
}

#[test]
fn series_table_has_one_row_per_timepoint() {
    let dir = tempdir().unwrap();
    let (x, y, z, t) = (2, 2, 2, 3);
    // C-order layout: last axis fastest, volume tt is constant tt + 1
    let mut values = vec![0.0f32; x * y * z * t];
    for (idx, v) in values.iter_mut().enumerate() {
        *v = ((idx % t) + 1) as f32;
    }
    write_map(dir.path(), "bold-a.nii", &[x, y, z, t], values.clone());
    write_map(dir.path(), "bold-b.nii", &[x, y, z, t], values);

    let template = format!("{}/bold-{{subject}}.nii", dir.path().display());
    let subs = vec![record(&[("subject", "a")]), record(&[("subject", "b")])];

    let table =
        batch::series_table(&template, &subs, None, &BatchConfig::default()).unwrap();

    assert_eq!(table.n_rows(), 2 * t);
    assert_eq!(
        table.columns,
        vec!["Mean", "Median", "Mode", "Standard Deviation", "subject"]
    );
    for unit in 0..2 {
        for tt in 0..t {
            let row = unit * t + tt;
            let c = (tt + 1) as f64;
            assert_eq!(float_cell(&table, row, "Mean"), c);
            assert_eq!(float_cell(&table, row, "Median"), c);
            assert_eq!(float_cell(&table, row, "Mode"), c);
            assert_eq!(float_cell(&table, row, "Standard Deviation"), 0.0);
        }
    }
    assert_eq!(text_cell(&table, 0, "subject"), "a");
    assert_eq!(text_cell(&table, t, "subject"), "b");
}

#[test]
fn series_batch_has_no_missing_file_recovery() {
    let dir = tempdir().unwrap();
    let values: Vec<f32> = (0..16).map(|i| i as f32).collect();
    write_map(dir.path(), "bold-a.nii", &[2, 2, 2, 2], values);

    let template = format!("{}/bold-{{subject}}.nii", dir.path().display());
    let subs = vec![record(&[("subject", "a")]), record(&[("subject", "b")])];

    let err = batch::run_series(&template, &subs, &BatchConfig::default()).unwrap_err();
    assert!(matches!(err, Error::MapNotFound(_)));
}

#[test]
fn unsupported_save_extension_fails_before_any_work() {
    let dir = tempdir().unwrap();
    let out = dir.path().join("results.txt");
    // deliberately point the template at nothing: validation must fire first
    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let subs = vec![record(&[("subject", "a")])];

    let err = batch::series_table(
        &template,
        &subs,
        Some(out.to_str().unwrap()),
        &BatchConfig::default(),
    )
    .unwrap_err();

    assert!(matches!(err, Error::UnsupportedOutputFormat(_)));
    assert!(!out.exists());
}

#[test]
fn csv_persistence_writes_header_plus_rows() {
    let dir = tempdir().unwrap();
    write_map(dir.path(), "sub-a.nii", &[2, 1, 1], vec![0.1, 0.01]);

    let template = format!("{}/sub-{{subject}}.nii", dir.path().display());
    let subs = vec![record(&[("subject", "a")]), record(&[("subject", "b")])];
    let out = dir.path().join("significance.csv");

    let table = batch::significance_table(
        &template,
        &subs,
        None,
        Some(out.to_str().unwrap()),
        &BatchConfig::default(),
    )
    .unwrap();

    let contents = std::fs::read_to_string(&out).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), table.n_rows() + 1);
    assert_eq!(lines[0], "Mean,Median,subject");
    // the missing unit's NaN statistics serialize as empty fields
    assert_eq!(lines[2], ",,b");
}
