//! Path template resolution against the public API.

use voxstats::{resolve, Error, Substitution};

fn record(pairs: &[(&str, &str)]) -> Substitution {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn resolved_paths_are_absolute_with_no_placeholders_left() {
    let sub = record(&[
        ("base", "/data/study"),
        ("subject", "4007"),
        ("session", "ofMcM1"),
        ("task", "JogB"),
    ]);
    let path = resolve(
        "{base}/sub-{subject}/ses-{session}/task-{task}_pvalue.nii.gz",
        &sub,
    )
    .unwrap();

    assert!(path.is_absolute());
    let rendered = path.to_str().unwrap();
    assert!(!rendered.contains('{') && !rendered.contains('}'));
    assert_eq!(
        rendered,
        "/data/study/sub-4007/ses-ofMcM1/task-JogB_pvalue.nii.gz"
    );
}

#[test]
fn relative_results_are_anchored_to_the_working_directory() {
    let sub = record(&[("subject", "1")]);
    let path = resolve("maps/sub-{subject}.nii", &sub).unwrap();
    assert!(path.is_absolute());
    assert!(path.ends_with("maps/sub-1.nii"));
}

#[test]
fn tilde_expands_against_home() {
    if let Some(home) = std::env::var_os("HOME") {
        let sub = record(&[("subject", "1")]);
        let path = resolve("~/maps/sub-{subject}.nii", &sub).unwrap();
        assert!(path.starts_with(home));
        assert!(path.ends_with("maps/sub-1.nii"));
    }
}

#[test]
fn every_missing_placeholder_fails_resolution() {
    let sub = record(&[("subject", "1")]);
    for template in [
        "{acquisition}/sub-{subject}.nii",
        "sub-{subject}_{session}.nii",
        "{missing}",
    ] {
        match resolve(template, &sub) {
            Err(Error::TemplateField { field, .. }) => {
                assert_ne!(field, "subject");
            }
            other => panic!("expected TemplateField for {template}, got {other:?}"),
        }
    }
}
