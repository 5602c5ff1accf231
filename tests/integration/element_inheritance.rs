//! Reset/unmerge behavior of simple elements across levels

use super::test_utils::{load, web_section};
use confstack::{Element, ErrorKind, SaveMode, ScalarValue};

const MACHINE: &str = r#"<configuration>
  <session timeout="45" mode="SQLServer"/>
</configuration>"#;

#[test]
fn test_child_inherits_parent_values() {
    let machine = load(None, MACHINE);
    let app = load(Some(&machine), "<configuration/>");
    let session = app.child("session").unwrap();
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(45)));
    assert_eq!(session.get("mode").unwrap(), Some(&ScalarValue::from("SQLServer")));
    assert!(session.values().is_inherited("timeout"));
    assert!(!session.is_present());
}

#[test]
fn test_defaults_apply_without_any_level() {
    let baseline = web_section().baseline().unwrap();
    let session = baseline.child("session").unwrap();
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(20)));
    assert_eq!(session.get("mode").unwrap(), Some(&ScalarValue::from("InProc")));
}

#[test]
fn test_unchanged_level_saves_nothing_in_minimal_mode() {
    let machine = load(None, MACHINE);
    let app = load(Some(&machine), "<configuration/>");
    let saved = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap();
    assert_eq!(saved, None);
}

#[test]
fn test_full_mode_reproduces_parent_values() {
    let machine = load(None, MACHINE);
    let app = load(Some(&machine), "<configuration/>");
    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Full)
        .unwrap()
        .unwrap();
    assert!(text.contains("timeout=\"45\""), "{}", text);
    assert!(text.contains("mode=\"SQLServer\""), "{}", text);

    let standalone = load(None, &text);
    assert_eq!(standalone, machine);
}

#[test]
fn test_minimal_mode_writes_only_the_change() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    app.child_mut("session")
        .unwrap()
        .set("timeout", Some(90.into()))
        .unwrap();
    let text = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap()
        .unwrap();
    assert!(text.contains("timeout=\"90\""), "{}", text);
    assert!(!text.contains("mode="), "{}", text);
    assert!(!text.contains("appSettings"), "{}", text);
}

#[test]
fn test_setting_the_inherited_value_again_is_not_a_change() {
    let machine = load(None, MACHINE);
    let mut app = load(Some(&machine), "<configuration/>");
    app.child_mut("session")
        .unwrap()
        .set("timeout", Some(45.into()))
        .unwrap();
    assert!(app.is_modified());
    let minimal = web_section()
        .save(&app, Some(&machine), SaveMode::Minimal)
        .unwrap();
    assert_eq!(minimal, None);

    let modified = web_section()
        .save(&app, Some(&machine), SaveMode::Modified)
        .unwrap()
        .unwrap();
    assert!(modified.contains("timeout=\"45\""), "{}", modified);
}

#[test]
fn test_invalid_value_surfaces_on_read_and_round_trips() {
    let app = load(None, "<configuration><session timeout=\"never\"/></configuration>");
    let session = app.child("session").unwrap();
    let err = session.get("timeout").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(app.errors().len(), 1);

    let text = web_section().save(&app, None, SaveMode::Minimal).unwrap().unwrap();
    assert!(text.contains("timeout=\"never\""), "{}", text);
}

#[test]
fn test_out_of_range_assignment_is_rejected() {
    let mut app = load(None, "<configuration/>");
    let session = app.child_mut("session").unwrap();
    let err = session.set("timeout", Some(601.into())).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationFailure);
    assert_eq!(session.get("timeout").unwrap(), Some(&ScalarValue::Integer(20)));
}

#[test]
fn test_read_only_tree_rejects_changes() {
    let mut app: Element = load(None, MACHINE);
    app.set_read_only();
    let err = app
        .child_mut("session")
        .unwrap()
        .set("mode", Some("Off".into()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReadOnlyViolation);
}

#[test]
fn test_explicit_empty_value_reads_as_none() {
    let mut app = load(None, MACHINE);
    let session = app.child_mut("session").unwrap();
    session.set("mode", None).unwrap();
    assert_eq!(session.get("mode").unwrap(), None);
}
