//! Tests for error types

use trueno_mlrepo::Error;

#[test]
fn test_not_found_error() {
    let error = Error::not_found("m/model", Some(4));
    let error_str = format!("{error}");
    assert!(error_str.contains("Object not found: m/model"));
    assert!(error_str.contains("version 4"));
    assert!(error.is_not_found());

    let bare = format!("{}", Error::not_found("m/model", None));
    assert!(!bare.contains("version"));
}

#[test]
fn test_integrity_error() {
    let error = Error::Integrity("'p' appears more than once in one commit".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Integrity check failed"));
    assert!(error_str.contains("Nothing was written"));
    assert!(!error.is_not_found());
}

#[test]
fn test_shape_mismatch_error() {
    let error = Error::ShapeMismatch {
        field: "x_data".to_string(),
        expected: vec![3],
        actual: vec![2],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("x_data"));
    assert!(error_str.contains("[3]"));
    assert!(error_str.contains("[2]"));
}

#[test]
fn test_duplicate_label_error() {
    let error = Error::DuplicateLabel {
        label: "production".to_string(),
        model: "m/model".to_string(),
        version: 2,
    };
    assert_eq!(
        format!("{error}"),
        "Label 'production' is already bound to m/model version 2"
    );
}

#[test]
fn test_stage_execution_error() {
    let error = Error::StageExecution {
        stage: "evaluation".to_string(),
        failures: vec!["m/eval/a [m/model@0]: boom".to_string(), "m/eval/b [m/model@0]: boom".to_string()],
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("Stage evaluation failed for all 2 target(s)"));
    assert!(error_str.contains("m/eval/b [m/model@0]: boom"));
}

#[test]
fn test_remote_sync_error() {
    let error = Error::RemoteSync("pull failed after 3 attempt(s): timed out".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Remote sync failed"));
    assert!(error_str.contains("unchanged"));
}

#[test]
fn test_ambiguous_match_error() {
    let error = Error::AmbiguousMatch {
        name: "m/model".to_string(),
        count: 3,
    };
    assert!(format!("{error}").contains("3 versions match"));
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    let error_str = format!("{error}");
    assert!(error_str.contains("IO error"));
    assert!(error_str.contains("file not found"));
}

#[test]
fn test_serialization_error_conversion() {
    let parse: Result<serde_json::Value, _> = serde_json::from_str("{not json");
    let error: Error = parse.unwrap_err().into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_error_debug_format() {
    let error = Error::InvalidName("a#b".to_string());
    let debug_str = format!("{error:?}");
    assert!(debug_str.contains("InvalidName"));
}
